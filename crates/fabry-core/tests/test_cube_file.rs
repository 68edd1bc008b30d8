#[allow(dead_code)]
mod common;

use std::collections::BTreeMap;

use ndarray::{Array2, Array3};
use tempfile::TempDir;

use fabry_core::cube::Cube;
use fabry_core::io::{read_cube, save_preview, write_cube, write_map, CubeFile, CubeWriter, FpcHeader};
use fabry_core::{CubeSource, FabryError, OrderMap, PlaneMap};

// ---------------------------------------------------------------------------
// Round trips
// ---------------------------------------------------------------------------

#[test]
fn test_cube_round_trip_keeps_data_and_metadata() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cube.fpc");
    let cube = common::cube_from_fn(3, 4, 5, |p, r, c| (p * 100 + r * 10 + c) as f32 * 0.5)
        .with_metadata("instrument", "etalon-a");
    write_cube(&path, &cube).unwrap();

    let back = read_cube(&path).unwrap();
    assert_eq!(back.shape(), (3, 4, 5));
    assert_eq!(back.array(), cube.array());
    assert_eq!(back.hash(), cube.hash());
    assert_eq!(back.metadata().get("instrument").map(String::as_str), Some("etalon-a"));
    assert_eq!(back.source(), Some(path.as_path()));
}

#[test]
fn test_mapped_file_reads_single_voxels() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("voxels.fpc");
    let cube = common::cube_from_fn(2, 3, 3, |p, r, c| (p + 2 * r + 3 * c) as f32);
    write_cube(&path, &cube).unwrap();

    let file = CubeFile::open(&path).unwrap();
    assert_eq!(CubeSource::shape(&file), (2, 3, 3));
    assert_eq!(file.value(1, 2, 1), 8.0);
    let materialised = Cube::from_source(&file).unwrap();
    assert_eq!(materialised.array(), cube.array());
}

#[test]
fn test_map_is_written_as_single_plane() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("order.fpc");
    let order = OrderMap::new(Array2::from_shape_fn((4, 6), |(r, c)| (r + c) as u32));
    write_map(&path, &order, "order").unwrap();

    let file = CubeFile::open(&path).unwrap();
    assert_eq!(file.header.planes, 1);
    assert_eq!(file.header.metadata.get("product").map(String::as_str), Some("order"));
    assert_eq!(file.header.metadata.get("element").map(String::as_str), Some("u32"));
    assert_eq!(file.header.metadata.get("hash"), Some(&order.hash().to_hex()));
    assert_eq!(file.value(0, 3, 5), 8.0);
}

// ---------------------------------------------------------------------------
// Writer checks
// ---------------------------------------------------------------------------

#[test]
fn test_writer_rejects_wrong_plane_shape() {
    let dir = TempDir::new().unwrap();
    let header = FpcHeader {
        planes: 1,
        rows: 2,
        cols: 2,
        metadata: BTreeMap::new(),
    };
    let mut writer = CubeWriter::create(&dir.path().join("bad.fpc"), &header).unwrap();
    let err = writer.write_plane(Array2::<f32>::zeros((3, 2)).view()).unwrap_err();
    assert!(matches!(err, FabryError::DimensionMismatch { .. }));
}

#[test]
fn test_writer_requires_every_plane() {
    let dir = TempDir::new().unwrap();
    let header = FpcHeader {
        planes: 2,
        rows: 2,
        cols: 2,
        metadata: BTreeMap::new(),
    };
    let mut writer = CubeWriter::create(&dir.path().join("short.fpc"), &header).unwrap();
    writer.write_plane(Array2::<f32>::zeros((2, 2)).view()).unwrap();
    let err = writer.finalize().unwrap_err();
    assert!(matches!(err, FabryError::InvalidContainer(_)));
}

// ---------------------------------------------------------------------------
// Malformed containers
// ---------------------------------------------------------------------------

#[test]
fn test_empty_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.fpc");
    std::fs::write(&path, b"").unwrap();
    let err = CubeFile::open(&path).err().unwrap();
    assert!(matches!(err, FabryError::InvalidContainer(_)), "{err}");
}

#[test]
fn test_bad_magic_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("magic.fpc");
    std::fs::write(&path, [0u8; 64]).unwrap();
    let err = CubeFile::open(&path).err().unwrap();
    assert!(matches!(err, FabryError::InvalidContainer(_)), "{err}");
}

#[test]
fn test_truncated_payload_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("truncated.fpc");
    write_cube(&path, &common::cube_from_fn(2, 4, 4, |_, _, _| 1.0)).unwrap();
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();
    let err = CubeFile::open(&path).err().unwrap();
    assert!(matches!(err, FabryError::InvalidContainer(_)), "{err}");
}

#[test]
fn test_overflowing_dimensions_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("huge.fpc");
    let mut bytes = b"FABRYFPC".to_vec();
    for field in [1u32, u32::MAX, u32::MAX, u32::MAX, 0] {
        bytes.extend_from_slice(&field.to_le_bytes());
    }
    bytes.extend_from_slice(&[0u8; 16]);
    std::fs::write(&path, &bytes).unwrap();
    let err = CubeFile::open(&path).err().unwrap();
    assert!(matches!(err, FabryError::InvalidContainer(_)), "{err}");
}

#[test]
fn test_sample_count_reports_overflow() {
    let header = FpcHeader {
        planes: usize::MAX,
        rows: 2,
        cols: 1,
        metadata: BTreeMap::new(),
    };
    assert_eq!(header.sample_count(), None);
    let header = FpcHeader {
        planes: 3,
        rows: 4,
        cols: 5,
        metadata: BTreeMap::new(),
    };
    assert_eq!(header.sample_count(), Some(60));
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let err = read_cube(&dir.path().join("absent.fpc")).unwrap_err();
    assert!(matches!(err, FabryError::Io(_)));
}

// ---------------------------------------------------------------------------
// Cube shape checks
// ---------------------------------------------------------------------------

#[test]
fn test_cube_rejects_empty_axes() {
    let err = Cube::new(Array3::<f32>::zeros((0, 3, 3))).unwrap_err();
    assert!(matches!(err, FabryError::InvalidCube { .. }));
}

#[test]
fn test_cube_from_dyn_requires_three_axes() {
    let err = Cube::from_dyn(ndarray::ArrayD::<f32>::zeros(ndarray::IxDyn(&[4, 4]))).unwrap_err();
    assert!(matches!(err, FabryError::InvalidShape { expected: 3, found: 2 }));
}

#[test]
fn test_summed_adds_planes() {
    let cube = common::cube_from_fn(3, 2, 2, |p, _, _| (p + 1) as f32);
    let summed = cube.summed();
    assert!(summed.iter().all(|&v| v == 6.0));
}

// ---------------------------------------------------------------------------
// Previews
// ---------------------------------------------------------------------------

#[test]
fn test_png_and_tiff_previews_are_written() {
    let dir = TempDir::new().unwrap();
    let map = PlaneMap::new(Array2::from_shape_fn((8, 12), |(r, c)| (r * c) as f64));
    let png = dir.path().join("map.png");
    let tiff = dir.path().join("map.tiff");
    save_preview(&map, &png).unwrap();
    save_preview(&map, &tiff).unwrap();

    let img = image::open(&png).unwrap();
    assert_eq!((img.width(), img.height()), (12, 8));
    assert!(std::fs::metadata(&tiff).unwrap().len() > 0);
}
