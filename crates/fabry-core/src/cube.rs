use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ndarray::{Array2, Array3, ArrayD, ArrayView1, ArrayView2, ArrayView3, Axis, Ix3};

use crate::error::{FabryError, Result};
use crate::hash::{ContentHash, ContentHasher};

/// Read-only access to a three-dimensional scan, indexed (plane, row, column).
///
/// File readers implement this so the pipeline never depends on a container
/// format.
pub trait CubeSource {
    /// `(planes, rows, cols)`.
    fn shape(&self) -> (usize, usize, usize);

    /// Photon count at `(plane, row, col)`.
    fn value(&self, plane: usize, row: usize, col: usize) -> f32;

    fn metadata(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn source_name(&self) -> Option<&Path> {
        None
    }
}

/// A Fabry-Pérot data cube. Values are photon counts.
#[derive(Clone, Debug)]
pub struct Cube {
    data: Array3<f32>,
    hash: ContentHash,
    source: Option<PathBuf>,
    metadata: BTreeMap<String, String>,
}

impl Cube {
    /// Wrap an array of shape `(planes, rows, cols)`. Every axis must be non-empty.
    pub fn new(data: Array3<f32>) -> Result<Self> {
        let (p, h, w) = data.dim();
        if p == 0 || h == 0 || w == 0 {
            return Err(FabryError::InvalidCube {
                reason: format!("empty axis in shape {p}x{h}x{w}"),
            });
        }
        let hash = hash_array3(&data);
        Ok(Self {
            data,
            hash,
            source: None,
            metadata: BTreeMap::new(),
        })
    }

    /// Accept an array of any rank, rejecting anything that is not 3-D.
    pub fn from_dyn(data: ArrayD<f32>) -> Result<Self> {
        let ndim = data.ndim();
        let data = data
            .into_dimensionality::<Ix3>()
            .map_err(|_| FabryError::InvalidShape {
                expected: 3,
                found: ndim,
            })?;
        Self::new(data)
    }

    /// Materialise any [`CubeSource`].
    pub fn from_source(source: &dyn CubeSource) -> Result<Self> {
        let (p, h, w) = source.shape();
        let data = Array3::from_shape_fn((p, h, w), |(pl, row, col)| source.value(pl, row, col));
        let mut cube = Self::new(data)?;
        cube.metadata = source.metadata();
        cube.source = source.source_name().map(Path::to_path_buf);
        Ok(cube)
    }

    pub fn with_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = Some(path.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn array(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    pub fn planes(&self) -> usize {
        self.data.dim().0
    }

    pub fn rows(&self) -> usize {
        self.data.dim().1
    }

    pub fn cols(&self) -> usize {
        self.data.dim().2
    }

    /// `(planes, rows, cols)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// `(rows, cols)` of one plane.
    pub fn plane_dim(&self) -> (usize, usize) {
        (self.rows(), self.cols())
    }

    pub fn hash(&self) -> ContentHash {
        self.hash
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn plane(&self, index: usize) -> ArrayView2<'_, f32> {
        self.data.index_axis(Axis(0), index)
    }

    pub fn spectrum(&self, row: usize, col: usize) -> ArrayView1<'_, f32> {
        self.data.slice(ndarray::s![.., row, col])
    }

    /// Sum over planes for each pixel.
    pub fn summed(&self) -> Array2<f64> {
        let (_, h, w) = self.data.dim();
        let mut out = Array2::<f64>::zeros((h, w));
        for plane in self.data.outer_iter() {
            out.zip_mut_with(&plane, |acc, &v| *acc += v as f64);
        }
        out
    }

    /// Pixels whose summed spectrum is finite and positive.
    pub fn signal_mask(&self) -> Array2<bool> {
        self.summed().mapv(|s| s.is_finite() && s > 0.0)
    }
}

impl CubeSource for Cube {
    fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    fn value(&self, plane: usize, row: usize, col: usize) -> f32 {
        self.data[[plane, row, col]]
    }

    fn metadata(&self) -> BTreeMap<String, String> {
        self.metadata.clone()
    }

    fn source_name(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

fn hash_array3(data: &Array3<f32>) -> ContentHash {
    let (p, h, w) = data.dim();
    let mut hasher = ContentHasher::new();
    hasher.tag("cube").usize(p).usize(h).usize(w);
    for &v in data.iter() {
        hasher.bytes(&v.to_le_bytes());
    }
    hasher.finish()
}

/// Element types that can live in a [`Map2`].
pub trait MapElement: Copy + Send + Sync + 'static {
    const TAG: &'static str;
    fn write_le(self, hasher: &mut ContentHasher);
    fn to_f64(self) -> f64;
}

impl MapElement for f64 {
    const TAG: &'static str = "f64";
    fn write_le(self, hasher: &mut ContentHasher) {
        hasher.f64(self);
    }
    fn to_f64(self) -> f64 {
        self
    }
}

impl MapElement for u32 {
    const TAG: &'static str = "u32";
    fn write_le(self, hasher: &mut ContentHasher) {
        hasher.bytes(&self.to_le_bytes());
    }
    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl MapElement for u8 {
    const TAG: &'static str = "u8";
    fn write_le(self, hasher: &mut ContentHasher) {
        hasher.bytes(&[self]);
    }
    fn to_f64(self) -> f64 {
        self as f64
    }
}

/// An immutable two-dimensional product with the `(rows, cols)` of a cube plane.
#[derive(Clone, Debug)]
pub struct Map2<T: MapElement> {
    data: Array2<T>,
    hash: ContentHash,
}

/// Real-valued map: continuum, wrapped and unwrapped phase, fits, wavelength.
pub type PlaneMap = Map2<f64>;

/// `1` marks a pixel to be treated as unreliable.
pub type NoiseMask = Map2<u8>;

/// Interference order per pixel.
pub type OrderMap = Map2<u32>;

impl<T: MapElement> Map2<T> {
    pub fn new(data: Array2<T>) -> Self {
        let (h, w) = data.dim();
        let mut hasher = ContentHasher::new();
        hasher.tag("map").tag(T::TAG).usize(h).usize(w);
        for &v in data.iter() {
            v.write_le(&mut hasher);
        }
        let hash = hasher.finish();
        Self { data, hash }
    }

    pub fn array(&self) -> ArrayView2<'_, T> {
        self.data.view()
    }

    /// `(rows, cols)`.
    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn hash(&self) -> ContentHash {
        self.hash
    }

    pub fn get(&self, row: usize, col: usize) -> T {
        self.data[[row, col]]
    }

    /// Copy out as `f64`, for writers and previews.
    pub fn to_f64(&self) -> Array2<f64> {
        self.data.mapv(MapElement::to_f64)
    }
}

impl Map2<f64> {
    pub fn min_max(&self) -> Option<(f64, f64)> {
        self.data
            .iter()
            .filter(|v| v.is_finite())
            .fold(None, |acc, &v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

impl Map2<u8> {
    pub fn is_noise(&self, row: usize, col: usize) -> bool {
        self.data[[row, col]] != 0
    }

    pub fn noise_count(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }

    /// Every pixel is flagged.
    pub fn is_saturated(&self) -> bool {
        self.data.iter().all(|&v| v != 0)
    }
}

impl Map2<u32> {
    pub fn max_order(&self) -> u32 {
        self.data.iter().copied().max().unwrap_or(0)
    }
}
