#[allow(dead_code)]
mod common;

use approx::assert_abs_diff_eq;

use fabry_core::continuum::{continuum_channel_count, continuum_map, discontinuum, ContinuumDetector};
use fabry_core::FabryError;

// ---------------------------------------------------------------------------
// Channel count
// ---------------------------------------------------------------------------

#[test]
fn test_channel_count_rounds_up() {
    assert_eq!(continuum_channel_count(16, 0.125), 2);
    assert_eq!(continuum_channel_count(48, 0.125), 6);
    assert_eq!(continuum_channel_count(10, 0.125), 2);
}

#[test]
fn test_channel_count_is_at_least_one() {
    assert_eq!(continuum_channel_count(3, 0.01), 1);
    assert_eq!(continuum_channel_count(1, 1.0), 1);
}

// ---------------------------------------------------------------------------
// Continuum map
// ---------------------------------------------------------------------------

#[test]
fn test_continuum_is_median_of_faintest_channels() {
    // Sorted: 1, 3, 5, 7, 50, 90, 100, 200; ratio 0.5 keeps the four faintest.
    let spectrum = [50.0, 3.0, 100.0, 7.0, 1.0, 200.0, 5.0, 90.0];
    let cube = common::uniform_spectrum_cube(&spectrum, 3, 4);
    let map = continuum_map(&cube, ContinuumDetector::LowestChannelsMedian, 0.5).unwrap();
    assert_eq!(map.dim(), (3, 4));
    for &v in map.array().iter() {
        assert_abs_diff_eq!(v, 4.0, epsilon = 1e-9);
    }
}

#[test]
fn test_continuum_of_flat_spectrum_is_the_flat_level() {
    let cube = common::uniform_spectrum_cube(&[12.5; 16], 2, 2);
    let map = continuum_map(&cube, ContinuumDetector::default(), 0.125).unwrap();
    for &v in map.array().iter() {
        assert_abs_diff_eq!(v, 12.5, epsilon = 1e-9);
    }
}

#[test]
fn test_continuum_rejects_ratio_outside_unit_interval() {
    let cube = common::uniform_spectrum_cube(&[1.0; 8], 2, 2);
    for ratio in [0.0, -0.5, 1.5, f64::NAN] {
        let err = continuum_map(&cube, ContinuumDetector::default(), ratio).unwrap_err();
        assert!(matches!(err, FabryError::InvalidConfig(_)), "ratio {ratio}: {err}");
    }
}

#[test]
fn test_continuum_on_synthetic_cube_is_near_the_model_floor() {
    let cube = common::airy_cube(40, 16);
    let map = continuum_map(&cube, ContinuumDetector::default(), 0.125).unwrap();
    // Airy floor is continuum + intensity / (1 + K) with K = (2F/pi)^2 ~ 91.
    let (lo, hi) = map.min_max().unwrap();
    assert!(lo > 10.0, "continuum below model floor: {lo}");
    assert!(hi < 40.0, "continuum far above model floor: {hi}");
}

// ---------------------------------------------------------------------------
// Discontinuum
// ---------------------------------------------------------------------------

#[test]
fn test_discontinuum_is_absolute_difference() {
    let spectrum = [2.0, 10.0, 0.0, 4.0];
    let cube = common::uniform_spectrum_cube(&spectrum, 2, 3);
    let cont = fabry_core::PlaneMap::new(ndarray::Array2::from_elem((2, 3), 3.0));
    let out = discontinuum(&cube, &cont).unwrap();
    assert_eq!(out.shape(), (4, 2, 3));
    let expected = [1.0f32, 7.0, 3.0, 1.0];
    for (p, &e) in expected.iter().enumerate() {
        for &v in out.plane(p).iter() {
            assert_abs_diff_eq!(v, e, epsilon = 1e-6);
        }
    }
}

#[test]
fn test_discontinuum_rejects_mismatched_continuum() {
    let cube = common::uniform_spectrum_cube(&[1.0; 4], 2, 3);
    let cont = fabry_core::PlaneMap::new(ndarray::Array2::zeros((3, 2)));
    let err = discontinuum(&cube, &cont).unwrap_err();
    assert!(matches!(err, FabryError::DimensionMismatch { .. }));
}
