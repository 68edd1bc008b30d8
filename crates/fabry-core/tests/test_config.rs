use fabry_core::barycenter::BarycenterAlgorithm;
use fabry_core::fsr::ScanDirection;
use fabry_core::overscan::Overscan;
use fabry_core::pipeline::{CenterCheck, PipelineStage};
use fabry_core::{FabryError, PipelineConfig};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

#[test]
fn test_default_instrument_constants() {
    let c = PipelineConfig::default();
    assert_eq!(c.calibration_wavelength, 6598.953125);
    assert_eq!(c.scanning_wavelength, 6616.89);
    assert_eq!(c.interference_reference_wavelength, 6562.7797852);
    assert_eq!(c.interference_order, 791);
    assert_eq!(c.free_spectral_range, 8.36522123894);
    assert_eq!(c.finesse, 15.0);
    assert_eq!(c.continuum_to_fsr_ratio, 0.125);
    assert_eq!(c.noise_mask_radius, 1);
    assert_eq!(c.min_rings, 1);
    assert!(!c.dont_fit);
    assert!(c.validate().is_ok());
}

#[test]
fn test_calibration_order_from_reference() {
    assert_eq!(PipelineConfig::default().calibration_order(), 787);
}

#[test]
fn test_ring_percentile_default() {
    let mut c = PipelineConfig::default();
    assert_eq!(c.ring_percentile(), 50);
    c.ring_minimal_percentile = Some(80);
    assert_eq!(c.ring_percentile(), 80);
}

// ---------------------------------------------------------------------------
// TOML
// ---------------------------------------------------------------------------

#[test]
fn test_toml_round_trip() {
    let config = PipelineConfig {
        dont_fit: true,
        noise_threshold: Some(42.0),
        channel_subset: vec![1, 4],
        scan_direction: Some(ScanDirection::Inward),
        verify_center: Some(CenterCheck {
            x: 200.0,
            y: 190.5,
            max_pixel_error: 3.0,
        }),
        ..PipelineConfig::default()
    };
    let text = config.to_toml_string().unwrap();
    let back = PipelineConfig::from_toml_str(&text).unwrap();
    assert_eq!(back, config);
}

#[test]
fn test_partial_toml_fills_defaults() {
    let config = PipelineConfig::from_toml_str("finesse = 12.0\nring_plane = 2\n").unwrap();
    assert_eq!(config.finesse, 12.0);
    assert_eq!(config.ring_plane, 2);
    assert_eq!(config.interference_order, 791);
}

#[test]
fn test_legacy_ratio_key_is_accepted() {
    let config = PipelineConfig::from_toml_str("continuum_to_FSR_ratio = 0.25\n").unwrap();
    assert_eq!(config.continuum_to_fsr_ratio, 0.25);
}

#[test]
fn test_algorithm_table_in_toml() {
    let text = r#"
[algorithms]
barycenter = "GaussianFit"

[algorithms.overscan.Trim]
top = 1
bottom = 2
left = 3
right = 4
"#;
    let config = PipelineConfig::from_toml_str(text).unwrap();
    assert_eq!(config.algorithms.barycenter, BarycenterAlgorithm::GaussianFit);
    assert_eq!(
        config.algorithms.overscan,
        Overscan::Trim {
            top: 1,
            bottom: 2,
            left: 3,
            right: 4
        }
    );
}

#[test]
fn test_malformed_toml_is_invalid_config() {
    let err = PipelineConfig::from_toml_str("finesse = \"high\"").unwrap_err();
    assert!(matches!(err, FabryError::InvalidConfig(_)));
}

#[test]
fn test_config_serializes_to_json() {
    let json = serde_json::to_value(PipelineConfig::default()).unwrap();
    assert_eq!(json["interference_order"], 791);
    assert_eq!(json["algorithms"]["barycenter"], "PeakSegment");
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn rejected(config: PipelineConfig) -> bool {
    matches!(config.validate(), Err(FabryError::InvalidConfig(_)))
}

#[test]
fn test_validation_rejects_bad_values() {
    let base = PipelineConfig::default();
    assert!(rejected(PipelineConfig { finesse: 0.0, ..base.clone() }));
    assert!(rejected(PipelineConfig { free_spectral_range: f64::NAN, ..base.clone() }));
    assert!(rejected(PipelineConfig { interference_order: 0, ..base.clone() }));
    assert!(rejected(PipelineConfig { continuum_to_fsr_ratio: 1.5, ..base.clone() }));
    assert!(rejected(PipelineConfig { ring_minimal_percentile: Some(100), ..base.clone() }));
    assert!(rejected(PipelineConfig { noise_threshold: Some(f64::INFINITY), ..base.clone() }));
    assert!(rejected(PipelineConfig { fsr_border_thickness: Some(-1.0), ..base.clone() }));
    assert!(rejected(PipelineConfig { max_fit_iterations: 0, ..base.clone() }));
    assert!(rejected(PipelineConfig {
        verify_center: Some(CenterCheck {
            x: 0.0,
            y: 0.0,
            max_pixel_error: -1.0,
        }),
        ..base
    }));
}

#[test]
fn test_invalid_toml_values_fail_to_load() {
    let err = PipelineConfig::from_toml_str("continuum_to_fsr_ratio = 0.0").unwrap_err();
    assert!(matches!(err, FabryError::InvalidConfig(_)));
}

// ---------------------------------------------------------------------------
// Stage labels
// ---------------------------------------------------------------------------

#[test]
fn test_stage_slugs_and_labels() {
    assert_eq!(PipelineStage::AiryFit.slug(), "airy");
    assert_eq!(PipelineStage::OrderMap.slug(), "order");
    assert_eq!(format!("{}", PipelineStage::Unwrap), "Unwrapping phase");
    assert_eq!(format!("{}", PipelineStage::Calibration), "Calibrating wavelength");
}
