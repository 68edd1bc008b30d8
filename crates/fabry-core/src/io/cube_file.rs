//! `.fpc` cube container.
//!
//! Layout (little-endian):
//! - magic `FABRYFPC` (8 bytes), version `u32`
//! - planes, rows, cols (`u32` each)
//! - metadata entry count `u32`, then per entry a `u32`-length-prefixed key and value
//! - payload: `planes * rows * cols` `f32` samples in (plane, row, col) order

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use memmap2::Mmap;
use ndarray::{Array3, ArrayView2};

use crate::cube::{Cube, CubeSource, Map2, MapElement};
use crate::error::{FabryError, Result};

pub const FPC_MAGIC: &[u8; 8] = b"FABRYFPC";
pub const FPC_VERSION: u32 = 1;

/// Fixed part of the header: magic, version, three axes, metadata count.
const FIXED_HEADER_SIZE: usize = 8 + 4 * 5;

#[derive(Clone, Debug, PartialEq)]
pub struct FpcHeader {
    pub planes: usize,
    pub rows: usize,
    pub cols: usize,
    pub metadata: BTreeMap<String, String>,
}

impl FpcHeader {
    /// `planes * rows * cols`, or `None` when the product overflows.
    pub fn sample_count(&self) -> Option<usize> {
        self.planes.checked_mul(self.rows)?.checked_mul(self.cols)
    }
}

/// Memory-mapped `.fpc` reader.
pub struct CubeFile {
    mmap: Mmap,
    pub header: FpcHeader,
    payload_offset: usize,
    samples: usize,
    path: PathBuf,
}

impl CubeFile {
    /// Open a container and validate its header against the file size.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Err(FabryError::InvalidContainer("file is empty".into()));
        }
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < FIXED_HEADER_SIZE {
            return Err(FabryError::InvalidContainer("file too small for a cube header".into()));
        }
        if &mmap[0..8] != FPC_MAGIC {
            return Err(FabryError::InvalidContainer("missing FABRYFPC magic".into()));
        }

        let (header, payload_offset) = parse_header(&mmap)?;
        let overflow = || FabryError::InvalidContainer("cube dimensions overflow".into());
        let samples = header.sample_count().ok_or_else(overflow)?;
        let expected = samples
            .checked_mul(4)
            .and_then(|n| n.checked_add(payload_offset))
            .ok_or_else(overflow)?;
        if mmap.len() < expected {
            return Err(FabryError::InvalidContainer(format!(
                "file truncated: expected at least {expected} bytes, got {}",
                mmap.len()
            )));
        }

        Ok(Self {
            mmap,
            header,
            payload_offset,
            samples,
            path: path.to_path_buf(),
        })
    }

    fn payload(&self) -> &[u8] {
        &self.mmap[self.payload_offset..self.payload_offset + self.samples * 4]
    }

    /// Decode the whole payload into a [`Cube`] carrying the file name and metadata.
    pub fn read_cube(&self) -> Result<Cube> {
        let FpcHeader {
            planes, rows, cols, ..
        } = self.header;
        let mut samples = vec![0.0f32; self.samples];
        LittleEndian::read_f32_into(self.payload(), &mut samples);
        let data = Array3::from_shape_vec((planes, rows, cols), samples)
            .map_err(|e| FabryError::InvalidContainer(e.to_string()))?;
        let mut cube = Cube::new(data)?.with_source(&self.path);
        for (k, v) in &self.header.metadata {
            cube = cube.with_metadata(k.clone(), v.clone());
        }
        Ok(cube)
    }
}

impl CubeSource for CubeFile {
    fn shape(&self) -> (usize, usize, usize) {
        (self.header.planes, self.header.rows, self.header.cols)
    }

    fn value(&self, plane: usize, row: usize, col: usize) -> f32 {
        let index = (plane * self.header.rows + row) * self.header.cols + col;
        let offset = self.payload_offset + index * 4;
        LittleEndian::read_f32(&self.mmap[offset..offset + 4])
    }

    fn metadata(&self) -> BTreeMap<String, String> {
        self.header.metadata.clone()
    }

    fn source_name(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

fn parse_header(buf: &[u8]) -> Result<(FpcHeader, usize)> {
    let mut cursor = Cursor::new(&buf[8..]);
    let version = cursor.read_u32::<LittleEndian>()?;
    if version != FPC_VERSION {
        return Err(FabryError::InvalidContainer(format!("unsupported version {version}")));
    }
    let planes = cursor.read_u32::<LittleEndian>()? as usize;
    let rows = cursor.read_u32::<LittleEndian>()? as usize;
    let cols = cursor.read_u32::<LittleEndian>()? as usize;
    if planes == 0 || rows == 0 || cols == 0 {
        return Err(FabryError::InvalidContainer(format!(
            "empty cube dimensions {planes}x{rows}x{cols}"
        )));
    }

    let entries = cursor.read_u32::<LittleEndian>()?;
    let mut metadata = BTreeMap::new();
    for _ in 0..entries {
        let key = read_string(&mut cursor)?;
        let value = read_string(&mut cursor)?;
        metadata.insert(key, value);
    }

    let offset = 8 + cursor.position() as usize;
    Ok((
        FpcHeader {
            planes,
            rows,
            cols,
            metadata,
        },
        offset,
    ))
}

fn read_string(cursor: &mut Cursor<&[u8]>) -> Result<String> {
    let len = cursor.read_u32::<LittleEndian>()? as usize;
    let remaining = cursor.get_ref().len().saturating_sub(cursor.position() as usize);
    if len > remaining {
        return Err(FabryError::InvalidContainer("metadata entry runs past the end of the file".into()));
    }
    let mut bytes = vec![0u8; len];
    cursor.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| FabryError::InvalidContainer(e.to_string()))
}

/// Streams planes into a new `.fpc` file.
pub struct CubeWriter {
    writer: BufWriter<File>,
    header: FpcHeader,
    planes_written: usize,
}

impl CubeWriter {
    /// Create the file and write its header.
    pub fn create(path: &Path, header: &FpcHeader) -> Result<Self> {
        let axis = |n: usize| {
            u32::try_from(n).map_err(|_| FabryError::InvalidContainer(format!("axis length {n} exceeds u32")))
        };
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(FPC_MAGIC)?;
        writer.write_u32::<LittleEndian>(FPC_VERSION)?;
        writer.write_u32::<LittleEndian>(axis(header.planes)?)?;
        writer.write_u32::<LittleEndian>(axis(header.rows)?)?;
        writer.write_u32::<LittleEndian>(axis(header.cols)?)?;
        writer.write_u32::<LittleEndian>(header.metadata.len() as u32)?;
        for (k, v) in &header.metadata {
            write_string(&mut writer, k)?;
            write_string(&mut writer, v)?;
        }
        Ok(Self {
            writer,
            header: header.clone(),
            planes_written: 0,
        })
    }

    /// Append one `(rows, cols)` plane.
    pub fn write_plane(&mut self, plane: ArrayView2<'_, f32>) -> Result<()> {
        let expected = (self.header.rows, self.header.cols);
        if plane.dim() != expected {
            return Err(FabryError::DimensionMismatch {
                expected,
                found: plane.dim(),
            });
        }
        if self.planes_written >= self.header.planes {
            return Err(FabryError::InvalidContainer(format!(
                "header declares {} planes",
                self.header.planes
            )));
        }
        for &v in plane.iter() {
            self.writer.write_f32::<LittleEndian>(v)?;
        }
        self.planes_written += 1;
        Ok(())
    }

    /// Flush and finalize; every declared plane must have been written.
    pub fn finalize(mut self) -> Result<()> {
        if self.planes_written != self.header.planes {
            return Err(FabryError::InvalidContainer(format!(
                "wrote {} of {} planes",
                self.planes_written, self.header.planes
            )));
        }
        self.writer.flush()?;
        Ok(())
    }
}

fn write_string(w: &mut impl Write, s: &str) -> Result<()> {
    w.write_u32::<LittleEndian>(s.len() as u32)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

/// Write `cube` with its metadata.
pub fn write_cube(path: &Path, cube: &Cube) -> Result<()> {
    let (planes, rows, cols) = cube.shape();
    let header = FpcHeader {
        planes,
        rows,
        cols,
        metadata: cube.metadata().clone(),
    };
    let mut writer = CubeWriter::create(path, &header)?;
    for plane in cube.array().outer_iter() {
        writer.write_plane(plane)?;
    }
    writer.finalize()
}

/// Write a map as a single-plane container; `kind` is recorded in the metadata.
pub fn write_map<T: MapElement>(path: &Path, map: &Map2<T>, kind: &str) -> Result<()> {
    let (rows, cols) = map.dim();
    let mut metadata = BTreeMap::new();
    metadata.insert("product".to_string(), kind.to_string());
    metadata.insert("element".to_string(), T::TAG.to_string());
    metadata.insert("hash".to_string(), map.hash().to_hex());
    let header = FpcHeader {
        planes: 1,
        rows,
        cols,
        metadata,
    };
    let mut writer = CubeWriter::create(path, &header)?;
    writer.write_plane(map.to_f64().mapv(|v| v as f32).view())?;
    writer.finalize()
}

/// Open and decode a cube in one step.
pub fn read_cube(path: &Path) -> Result<Cube> {
    CubeFile::open(path)?.read_cube()
}
