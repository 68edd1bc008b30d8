use approx::assert_abs_diff_eq;
use ndarray::Array2;

use fabry_core::calibration::{calibrate_wavelength, CalibrationInputs, CalibrationMode};
use fabry_core::rings::RingCenter;
use fabry_core::{FabryError, PipelineConfig, PlaneMap};

fn inputs(planes: usize, center: RingCenter) -> CalibrationInputs {
    PipelineConfig::default().calibration_inputs(planes, center)
}

fn constant(value: f64) -> PlaneMap {
    PlaneMap::new(Array2::from_elem((9, 9), value))
}

// ---------------------------------------------------------------------------
// Orders and offset
// ---------------------------------------------------------------------------

#[test]
fn test_orders_from_reference_line() {
    let i = inputs(16, RingCenter::new(4.0, 4.0));
    assert_eq!(i.order_at(i.calibration_wavelength), 787);
    assert_eq!(i.order_at(i.scanning_wavelength), 785);
    assert_eq!(i.order_at(i.interference_reference_wavelength), 791);
}

#[test]
fn test_center_inside_period_needs_no_wrap() {
    let (calibrated, report) = calibrate_wavelength(&constant(12.0), &inputs(16, RingCenter::new(4.0, 4.0))).unwrap();
    assert_eq!(report.mode, CalibrationMode::Anchored);
    assert_eq!(report.order_cal, 787);
    assert_eq!(report.order_scan, 785);
    assert_abs_diff_eq!(report.decalage, 5.849657688879, epsilon = 1e-6);
    assert_eq!(report.wrap_shift, 0.0);
    let center = report.center_value.unwrap();
    assert_abs_diff_eq!(center, 12.0 - 5.849657688879, epsilon = 1e-6);
    for &v in calibrated.array().iter() {
        assert_abs_diff_eq!(v, center, epsilon = 1e-9);
    }
}

#[test]
fn test_negative_center_is_wrapped_up() {
    let (_, report) = calibrate_wavelength(&constant(2.0), &inputs(16, RingCenter::new(4.0, 4.0))).unwrap();
    assert_eq!(report.wrap_shift, 16.0);
    let center = report.center_value.unwrap();
    assert!((0.0..=16.0).contains(&center), "center {center}");
}

#[test]
fn test_large_center_is_wrapped_down() {
    let (_, report) = calibrate_wavelength(&constant(40.0), &inputs(16, RingCenter::new(4.0, 4.0))).unwrap();
    assert_eq!(report.wrap_shift, -32.0);
    let center = report.center_value.unwrap();
    assert!((0.0..=16.0).contains(&center), "center {center}");
}

#[test]
fn test_calibration_preserves_differences() {
    let unwrapped = PlaneMap::new(Array2::from_shape_fn((9, 9), |(r, c)| 20.0 + r as f64 - 0.5 * c as f64));
    let (calibrated, report) = calibrate_wavelength(&unwrapped, &inputs(12, RingCenter::new(4.2, 3.9))).unwrap();
    let offset = report.offset();
    for ((r, c), &v) in calibrated.array().indexed_iter() {
        assert_abs_diff_eq!(v - unwrapped.get(r, c), offset, epsilon = 1e-9);
    }
}

#[test]
fn test_invert_recovers_unwrapped() {
    let unwrapped = PlaneMap::new(Array2::from_shape_fn((9, 9), |(r, c)| (r * c) as f64 * 0.3));
    let (calibrated, report) = calibrate_wavelength(&unwrapped, &inputs(16, RingCenter::new(4.0, 4.0))).unwrap();
    let back = report.invert(&calibrated);
    for (a, b) in back.array().iter().zip(unwrapped.array().iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-9);
    }
}

// ---------------------------------------------------------------------------
// Pass-through and validation
// ---------------------------------------------------------------------------

#[test]
fn test_center_outside_image_passes_through() {
    let unwrapped = constant(7.5);
    let (calibrated, report) = calibrate_wavelength(&unwrapped, &inputs(16, RingCenter::new(30.0, 4.0))).unwrap();
    assert_eq!(report.mode, CalibrationMode::PassThrough);
    assert_eq!(report.offset(), 0.0);
    assert!(report.center_value.is_none());
    assert_eq!(calibrated.array(), unwrapped.array());
}

#[test]
fn test_non_finite_center_value_is_not_wrapped() {
    let mut data = Array2::from_elem((9, 9), 3.0);
    data[[4, 4]] = f64::NAN;
    let (_, report) = calibrate_wavelength(&PlaneMap::new(data), &inputs(16, RingCenter::new(4.0, 4.0))).unwrap();
    assert_eq!(report.wrap_shift, 0.0);
    assert!(report.center_value.is_none());
}

#[test]
fn test_invalid_inputs_are_rejected() {
    let mut i = inputs(0, RingCenter::new(4.0, 4.0));
    let err = calibrate_wavelength(&constant(1.0), &i).unwrap_err();
    assert!(matches!(err, FabryError::InvalidConfig(_)));

    i.planes = 16;
    i.free_spectral_range = 0.0;
    let err = calibrate_wavelength(&constant(1.0), &i).unwrap_err();
    assert!(matches!(err, FabryError::InvalidConfig(_)));

    i.free_spectral_range = 8.0;
    i.interference_order = 0;
    assert!(i.validate().is_err());
}
