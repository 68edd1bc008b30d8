#[allow(dead_code)]
mod common;

use std::sync::{Arc, Mutex};

use ndarray::{ArrayD, IxDyn};

use fabry_core::cache::ResultCache;
use fabry_core::fsr::{border_thickness, dedup_radii, ScanDirection};
use fabry_core::overscan::Overscan;
use fabry_core::pipeline::{
    CenterCheck, Diagnostic, PipelineStage, ProgressReporter,
};
use fabry_core::rings::RingCenter;
use fabry_core::synth::AiryCubeBuilder;
use fabry_core::{PhaseMapPipeline, PipelineConfig, PipelineOutput, PipelineStatus};

const SIZE: usize = 80;
const PLANES: usize = 16;

fn run(builder: &AiryCubeBuilder, config: PipelineConfig) -> PipelineOutput {
    let cube = builder.build().unwrap();
    PhaseMapPipeline::new(config).unwrap().run(&cube)
}

/// Pixels whose order is unambiguous: not noise, and inside the last ring's border band.
fn reliable_pixels(out: &PipelineOutput) -> Vec<(usize, usize, f64)> {
    let rings = out.rings.as_ref().unwrap();
    let radii = dedup_radii(rings.radii.iter().copied());
    let limit = radii.last().copied().unwrap_or(0.0) - border_thickness(&radii);
    let noise = out.noise.as_ref().unwrap();
    let (h, w) = noise.dim();
    let mut pixels = Vec::new();
    for row in 0..h {
        for col in 0..w {
            let d = ((row as f64 - rings.center.y).powi(2) + (col as f64 - rings.center.x).powi(2)).sqrt();
            if d < limit && !noise.is_noise(row, col) {
                pixels.push((row, col, d));
            }
        }
    }
    pixels
}

#[derive(Default)]
struct StageRecorder {
    begun: Mutex<Vec<PipelineStage>>,
    finished: Mutex<Vec<PipelineStage>>,
}

impl ProgressReporter for StageRecorder {
    fn begin_stage(&self, stage: PipelineStage, _total_items: Option<usize>) {
        self.begun.lock().unwrap().push(stage);
    }

    fn finish_stage(&self, stage: PipelineStage) {
        self.finished.lock().unwrap().push(stage);
    }
}

// ---------------------------------------------------------------------------
// Full runs
// ---------------------------------------------------------------------------

#[test]
fn test_no_fit_run_unwraps_synthetic_rings() {
    let builder = common::airy_builder(SIZE, PLANES);
    let out = run(&builder, common::no_fit_config());

    assert_eq!(out.status, PipelineStatus::Complete);
    assert!(out.airy.is_none());
    assert!(out.parabola.is_none());
    assert!(!out.has_diagnostic(|d| matches!(d, Diagnostic::ParabolicFitSkipped { .. })));
    assert_eq!(out.planes(), Some(PLANES));

    let rings = out.rings.as_ref().unwrap();
    assert!(rings.ring_count() >= 2);
    assert!(out.order.as_ref().unwrap().max_order() <= rings.ring_count() as u32);

    let unwrapped = out.unwrapped.as_ref().unwrap();
    let pixels = reliable_pixels(&out);
    assert!(pixels.len() > 500, "only {} reliable pixels", pixels.len());
    for (row, col, d) in pixels {
        let expected = common::expected_unwrapped(&builder, PLANES, d);
        let got = unwrapped.get(row, col);
        assert!((got - expected).abs() < 0.1, "({row}, {col}) d={d:.2}: {got} vs {expected}");
    }
}

#[test]
fn test_no_fit_run_calibrates_on_ring_center() {
    let out = run(&common::airy_builder(SIZE, PLANES), common::no_fit_config());
    let report = out.calibration.as_ref().unwrap();
    assert_eq!(report.order_cal, 787);
    assert_eq!(report.order_scan, 785);

    let center = out.rings.as_ref().unwrap().center;
    let (row, col) = center.pixel(SIZE, SIZE).unwrap();
    let calibrated = out.calibrated.as_ref().unwrap().get(row, col);
    assert!((0.0..=PLANES as f64).contains(&calibrated), "center value {calibrated}");
    assert!((report.center_value.unwrap() - calibrated).abs() < 1e-9);

    let unwrapped = out.unwrapped.as_ref().unwrap().get(row, col);
    assert!((calibrated - unwrapped - report.offset()).abs() < 1e-9);
}

#[test]
fn test_fit_run_adds_airy_and_parabola() {
    let builder = common::airy_builder(SIZE, PLANES);
    let config = PipelineConfig {
        channel_subset: vec![3],
        ..PipelineConfig::default()
    };
    let fitted = run(&builder, config);
    let plain = run(&builder, common::no_fit_config());

    assert_eq!(fitted.status, PipelineStatus::Complete);
    let airy = fitted.airy.as_ref().unwrap();
    assert_eq!(airy.direction(), Some(ScanDirection::Outward));
    assert_eq!(airy.per_plane.len(), PLANES);

    let b = builder.params_for_plane(0).b;
    let focal = fitted.focal_length_um.unwrap();
    assert!((focal * b / PipelineConfig::default().pixel_size - 1.0).abs() < 0.01, "focal length {focal}");
    assert!(plain.focal_length_um.is_none());

    let parabola = fitted.parabola.as_ref().unwrap();
    assert!((parabola.coefficients.ratio() - 1.0).abs() < 0.05, "ratio {}", parabola.coefficients.ratio());
    assert!(parabola.samples > 0);

    let substituted = fitted.substituted.as_ref().unwrap();
    assert_eq!(substituted.shape(), (PLANES, SIZE, SIZE));
    assert_eq!(substituted.plane(0), fitted.trimmed.as_ref().unwrap().plane(0));

    // Same direction either way, so the order maps agree.
    assert_eq!(
        fitted.unwrapped.as_ref().unwrap().hash(),
        plain.unwrapped.as_ref().unwrap().hash()
    );
}

#[test]
fn test_fine_scan_calibrates_linearly_along_a_radius() {
    const FINE: usize = 36;
    let builder = common::airy_builder(SIZE, FINE);
    let out = run(&builder, PipelineConfig::default());
    assert_eq!(out.status, PipelineStatus::Complete);
    assert_eq!(out.airy.as_ref().unwrap().direction(), Some(ScanDirection::Outward));

    // Along the center row, calibrated - P (m0 - m(d)) stays constant.
    let rings = out.rings.as_ref().unwrap();
    let (row, center_col) = rings.center.pixel(SIZE, SIZE).unwrap();
    let m0 = builder.central_order_of(0);
    let b = builder.params_for_plane(0).b;
    let calibrated = out.calibrated.as_ref().unwrap();
    let residuals: Vec<f64> = reliable_pixels(&out)
        .into_iter()
        .filter(|&(r, c, _)| r == row && c >= center_col)
        .map(|(r, c, d)| {
            let m = m0 / (1.0 + b * b * d * d).sqrt();
            calibrated.get(r, c) - FINE as f64 * (m0 - m)
        })
        .collect();
    assert!(residuals.len() > 20, "only {} pixels on the radius", residuals.len());
    let lo = residuals.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = residuals.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    assert!(hi - lo < 0.2, "spread {}", hi - lo);
}

#[test]
fn test_inward_scan_unwraps_consistently() {
    let builder = common::airy_builder(SIZE, PLANES);
    let builder = builder.clone().channel_gap(-builder.wavelength_um() / 2.0 / PLANES as f64);
    let config = PipelineConfig {
        scan_direction: Some(ScanDirection::Inward),
        ..common::no_fit_config()
    };
    let out = run(&builder, config);
    assert_eq!(out.status, PipelineStatus::Complete);

    // unwrapped + P (m0 - m(d)) is constant when every order is right.
    let m0 = builder.central_order_of(0);
    let b = builder.params_for_plane(0).b;
    let unwrapped = out.unwrapped.as_ref().unwrap();
    let values: Vec<f64> = reliable_pixels(&out)
        .into_iter()
        .map(|(row, col, d)| {
            let m = m0 / (1.0 + b * b * d * d).sqrt();
            unwrapped.get(row, col) + PLANES as f64 * (m0 - m)
        })
        .collect();
    let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    assert!(hi - lo < 0.2, "spread {}", hi - lo);
}

// ---------------------------------------------------------------------------
// Degraded runs
// ---------------------------------------------------------------------------

#[test]
fn test_blank_rows_are_masked_and_fits_still_run() {
    let builder = common::airy_builder(SIZE, PLANES).blank(0..8, 0..SIZE);
    let out = run(&builder, PipelineConfig::default());

    assert_eq!(out.status, PipelineStatus::Complete);
    let noise = out.noise.as_ref().unwrap();
    for col in 0..SIZE {
        assert!(noise.is_noise(0, col) && noise.is_noise(7, col));
    }

    let rings = out.rings.as_ref().unwrap();
    assert!(rings.ring_count() >= 2, "radii {:?}", rings.radii);
    assert!(rings.center.distance_to(&RingCenter::new(39.5, 39.5)) < 0.5, "center {}", rings.center);
    assert!(!out.has_diagnostic(|d| matches!(d, Diagnostic::InsufficientRings { .. })));

    assert!(out.airy.is_some());
    assert!(out.parabola.is_some());
    assert!(!out.has_diagnostic(|d| matches!(d, Diagnostic::ParabolicFitSkipped { .. })));

    let calibrated = out.calibrated.as_ref().unwrap();
    for ((row, col), &v) in calibrated.array().indexed_iter() {
        if !noise.is_noise(row, col) {
            assert!(v.is_finite(), "({row}, {col}) calibrated {v}");
        }
    }
}

#[test]
fn test_saturated_noise_mask_skips_parabola_and_passes_calibration_through() {
    let config = PipelineConfig {
        noise_threshold: Some(1e12),
        channel_subset: vec![3],
        ..PipelineConfig::default()
    };
    let out = run(&common::airy_builder(SIZE, PLANES), config);

    assert_eq!(out.status, PipelineStatus::Complete);
    assert!(out.noise.as_ref().unwrap().is_saturated());
    assert!(out.parabola.is_none());
    assert!(out.has_diagnostic(|d| matches!(d, Diagnostic::ParabolicFitSkipped { .. })));
    assert!(out.has_diagnostic(|d| matches!(
        d,
        Diagnostic::CalibrationPassThrough { reason } if reason.contains("noise")
    )));

    let unwrapped = out.unwrapped.as_ref().unwrap();
    let calibrated = out.calibrated.as_ref().unwrap();
    assert_eq!(calibrated.dim(), unwrapped.dim());
}

#[test]
fn test_center_verification_stops_the_run() {
    let config = PipelineConfig {
        verify_center: Some(CenterCheck {
            x: 10.0,
            y: 10.0,
            max_pixel_error: 2.0,
        }),
        ..common::no_fit_config()
    };
    let out = run(&common::airy_builder(SIZE, PLANES), config);
    assert_eq!(out.status, PipelineStatus::CenterVerificationFailed);
    assert!(out.has_diagnostic(|d| matches!(d, Diagnostic::CenterVerificationFailed { .. })));
    assert!(out.rings.is_some());
    assert!(out.wrapped.is_some());
    assert!(out.order.is_none());
    assert!(out.unwrapped.is_none());
    assert!(out.calibrated.is_none());
}

#[test]
fn test_center_verification_passes_near_the_axis() {
    let config = PipelineConfig {
        verify_center: Some(CenterCheck {
            x: 39.0,
            y: 40.0,
            max_pixel_error: 2.0,
        }),
        ..common::no_fit_config()
    };
    let out = run(&common::airy_builder(SIZE, PLANES), config);
    assert_eq!(out.status, PipelineStatus::Complete);
    assert!(!out.has_diagnostic(|d| matches!(d, Diagnostic::CenterVerificationFailed { .. })));
}

#[test]
fn test_unwrapped_only_stops_before_calibration() {
    let config = PipelineConfig {
        unwrapped_only: true,
        ..common::no_fit_config()
    };
    let out = run(&common::airy_builder(SIZE, PLANES), config);
    assert_eq!(out.status, PipelineStatus::UnwrappedOnly);
    assert!(out.unwrapped.is_some());
    assert!(out.calibrated.is_none());
    assert!(out.calibration.is_none());
    assert!(out.parabola.is_none());
}

#[test]
fn test_flat_cube_has_no_rings_but_completes() {
    let cube = common::cube_from_fn(8, 24, 24, |p, _, _| if p == 3 { 50.0 } else { 5.0 });
    let out = PhaseMapPipeline::new(common::no_fit_config()).unwrap().run(&cube);
    assert_eq!(out.status, PipelineStatus::Complete);
    assert!(out.has_diagnostic(|d| matches!(d, Diagnostic::CenterFallback)));
    assert!(out.has_diagnostic(|d| matches!(d, Diagnostic::NoRingsForOrderMap)));
    assert_eq!(out.order.as_ref().unwrap().max_order(), 0);
    // Every pixel peaks on channel 3.
    for &v in out.unwrapped.as_ref().unwrap().array().iter() {
        assert!((v - 3.0).abs() < 1e-9, "unwrapped {v}");
    }
}

#[test]
fn test_three_plane_cube_runs() {
    let out = run(&common::airy_builder(40, 3), common::no_fit_config());
    assert_eq!(out.status, PipelineStatus::Complete);
    assert_eq!(out.unwrapped.as_ref().unwrap().dim(), (40, 40));
    for &v in out.wrapped.as_ref().unwrap().array().iter() {
        assert!((0.0..3.0).contains(&v));
    }
}

// ---------------------------------------------------------------------------
// Input handling
// ---------------------------------------------------------------------------

#[test]
fn test_two_dimensional_input_is_rejected() {
    let pipeline = PhaseMapPipeline::new(common::no_fit_config()).unwrap();
    let out = pipeline.run_dyn(ArrayD::zeros(IxDyn(&[8, 8])));
    assert_eq!(out.status, PipelineStatus::InvalidInput);
    assert!(out.trimmed.is_none());
    assert!(out.unwrapped.is_none());
}

#[test]
fn test_three_dimensional_dyn_input_runs() {
    let cube = common::airy_cube(32, 8);
    let data = cube.array().to_owned().into_dyn();
    let out = PhaseMapPipeline::new(common::no_fit_config()).unwrap().run_dyn(data);
    assert_eq!(out.status, PipelineStatus::Complete);
}

#[test]
fn test_overscan_trim_shrinks_every_product() {
    let mut config = common::no_fit_config();
    config.algorithms.overscan = Overscan::Trim {
        top: 2,
        bottom: 2,
        left: 3,
        right: 1,
    };
    let out = run(&common::airy_builder(SIZE, PLANES), config);
    assert_eq!(out.status, PipelineStatus::Complete);
    assert_eq!(out.trimmed.as_ref().unwrap().shape(), (PLANES, 76, 76));
    assert_eq!(out.unwrapped.as_ref().unwrap().dim(), (76, 76));
    assert_eq!(out.calibrated.as_ref().unwrap().dim(), (76, 76));
}

#[test]
fn test_overscan_larger_than_plane_is_invalid_input() {
    let mut config = common::no_fit_config();
    config.algorithms.overscan = Overscan::Trim {
        top: 10,
        bottom: 10,
        left: 0,
        right: 0,
    };
    let out = run(&common::airy_builder(20, 4), config);
    assert_eq!(out.status, PipelineStatus::InvalidInput);
    assert!(out.trimmed.is_none());
}

#[test]
fn test_invalid_config_is_rejected_up_front() {
    let config = PipelineConfig {
        continuum_to_fsr_ratio: 0.0,
        ..PipelineConfig::default()
    };
    assert!(PhaseMapPipeline::new(config).is_err());
}

// ---------------------------------------------------------------------------
// Determinism, cache and progress
// ---------------------------------------------------------------------------

#[test]
fn test_repeated_runs_are_identical() {
    let cube = common::airy_cube(48, 8);
    let pipeline = PhaseMapPipeline::new(common::no_fit_config()).unwrap();
    let a = pipeline.run(&cube);
    let b = pipeline.run(&cube);
    assert_eq!(a.wrapped.unwrap().hash(), b.wrapped.unwrap().hash());
    assert_eq!(a.order.unwrap().hash(), b.order.unwrap().hash());
    assert_eq!(a.calibrated.unwrap().hash(), b.calibrated.unwrap().hash());
}

#[test]
fn test_shared_cache_serves_the_second_run() {
    let cube = common::airy_cube(48, 8);
    let cache = Arc::new(ResultCache::new());
    let pipeline = PhaseMapPipeline::new(common::no_fit_config())
        .unwrap()
        .with_cache(Arc::clone(&cache));

    let first = pipeline.run(&cube);
    let (hits_before, misses_before) = cache.stats();
    assert!(misses_before > 0);
    assert!(!cache.is_empty());

    let second = pipeline.run(&cube);
    let (hits_after, misses_after) = cache.stats();
    assert!(hits_after > hits_before);
    assert_eq!(misses_after, misses_before);
    assert_eq!(
        first.unwrapped.unwrap().hash(),
        second.unwrapped.unwrap().hash()
    );
}

#[test]
fn test_reporter_sees_every_stage_that_ran() {
    let recorder = Arc::new(StageRecorder::default());
    let pipeline = PhaseMapPipeline::new(common::no_fit_config())
        .unwrap()
        .with_reporter(recorder.clone());
    let out = pipeline.run(&common::airy_cube(40, 8));
    assert_eq!(out.status, PipelineStatus::Complete);

    let begun = recorder.begun.lock().unwrap().clone();
    for stage in [
        PipelineStage::Overscan,
        PipelineStage::Continuum,
        PipelineStage::Barycenter,
        PipelineStage::Noise,
        PipelineStage::Rings,
        PipelineStage::OrderMap,
        PipelineStage::Unwrap,
        PipelineStage::Calibration,
    ] {
        assert!(begun.contains(&stage), "{stage} not reported");
    }
    assert!(!begun.contains(&PipelineStage::AiryFit));
    assert_eq!(recorder.finished.lock().unwrap().len(), begun.len());
}
