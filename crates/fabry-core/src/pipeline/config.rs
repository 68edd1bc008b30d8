use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationInputs;
use crate::consts::{
    DEFAULT_CONTINUUM_TO_FSR_RATIO, DEFAULT_MAX_FIT_ITERATIONS, DEFAULT_MIN_RINGS,
    DEFAULT_NOISE_MASK_RADIUS, DEFAULT_RING_MINIMAL_PERCENTILE,
};
use crate::error::{FabryError, Result};
use crate::fsr::ScanDirection;
use crate::registry::AlgorithmSelection;
use crate::rings::RingCenter;

/// Expected ring center and the largest tolerated distance from it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CenterCheck {
    /// Expected column.
    pub x: f64,
    /// Expected row.
    pub y: f64,
    pub max_pixel_error: f64,
}

impl CenterCheck {
    pub fn expected(&self) -> RingCenter {
        RingCenter::new(self.x, self.y)
    }
}

/// One flat record holding every pipeline option. Wavelengths in angstroms.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub calibration_wavelength: f64,
    pub scanning_wavelength: f64,
    pub interference_reference_wavelength: f64,
    /// Interference order at `interference_reference_wavelength`.
    pub interference_order: u32,
    pub free_spectral_range: f64,
    /// Initial finesse for the Airy fit.
    pub finesse: f64,
    /// Detector pixel size in microns; turns the fitted `b` into a focal length.
    pub pixel_size: f64,
    #[serde(alias = "continuum_to_FSR_ratio")]
    pub continuum_to_fsr_ratio: f64,
    pub noise_mask_radius: usize,
    /// Summed-signal threshold; derived from the data when absent.
    pub noise_threshold: Option<f64>,
    pub min_rings: usize,
    pub ring_minimal_percentile: Option<u8>,
    /// Plane examined by the ring finder.
    pub ring_plane: usize,
    /// Planes replaced by the fitted Airy model in the substituted cube.
    pub channel_subset: Vec<usize>,
    /// Skip the Airy and parabolic fits.
    pub dont_fit: bool,
    /// Stop after unwrapping.
    pub unwrapped_only: bool,
    pub verify_center: Option<CenterCheck>,
    /// Explicit half-thickness of the order-map border band, in pixels.
    pub fsr_border_thickness: Option<f64>,
    /// Scan direction used when no Airy fit provides one.
    pub scan_direction: Option<ScanDirection>,
    pub max_fit_iterations: usize,
    pub algorithms: AlgorithmSelection,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            calibration_wavelength: 6598.953125,
            scanning_wavelength: 6616.89,
            interference_reference_wavelength: 6562.7797852,
            interference_order: 791,
            free_spectral_range: 8.36522123894,
            finesse: 15.0,
            pixel_size: 9.0,
            continuum_to_fsr_ratio: DEFAULT_CONTINUUM_TO_FSR_RATIO,
            noise_mask_radius: DEFAULT_NOISE_MASK_RADIUS,
            noise_threshold: None,
            min_rings: DEFAULT_MIN_RINGS,
            ring_minimal_percentile: None,
            ring_plane: 0,
            channel_subset: Vec::new(),
            dont_fit: false,
            unwrapped_only: false,
            verify_center: None,
            fsr_border_thickness: None,
            scan_direction: None,
            max_fit_iterations: DEFAULT_MAX_FIT_ITERATIONS,
            algorithms: AlgorithmSelection::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| FabryError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| FabryError::InvalidConfig(e.to_string()))
    }

    pub fn ring_percentile(&self) -> u8 {
        self.ring_minimal_percentile
            .unwrap_or(DEFAULT_RING_MINIMAL_PERCENTILE)
    }

    /// Reject values no stage can work with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(FabryError::InvalidConfig(msg));

        let positive = [
            ("calibration_wavelength", self.calibration_wavelength),
            ("scanning_wavelength", self.scanning_wavelength),
            ("interference_reference_wavelength", self.interference_reference_wavelength),
            ("free_spectral_range", self.free_spectral_range),
            ("finesse", self.finesse),
            ("pixel_size", self.pixel_size),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return invalid(format!("{name} must be positive, got {value}"));
            }
        }
        if self.interference_order == 0 {
            return invalid("interference_order must be at least 1".into());
        }
        if !(self.continuum_to_fsr_ratio > 0.0 && self.continuum_to_fsr_ratio <= 1.0) {
            return invalid(format!(
                "continuum_to_fsr_ratio must lie in (0, 1], got {}",
                self.continuum_to_fsr_ratio
            ));
        }
        if let Some(p) = self.ring_minimal_percentile.filter(|&p| p > 99) {
            return invalid(format!("ring_minimal_percentile must lie in 0..=99, got {p}"));
        }
        if let Some(t) = self.noise_threshold.filter(|t| !t.is_finite()) {
            return invalid(format!("noise_threshold must be finite, got {t}"));
        }
        if let Some(t) = self.fsr_border_thickness.filter(|&t| !(t.is_finite() && t > 0.0)) {
            return invalid(format!("fsr_border_thickness must be positive, got {t}"));
        }
        if let Some(check) = &self.verify_center {
            if !(check.max_pixel_error.is_finite() && check.max_pixel_error >= 0.0) {
                return invalid(format!(
                    "verify_center tolerance must be non-negative, got {}",
                    check.max_pixel_error
                ));
            }
        }
        if self.max_fit_iterations == 0 {
            return invalid("max_fit_iterations must be at least 1".into());
        }
        Ok(())
    }

    /// Calibration constants for a cube of `planes` channels centred on `center`.
    pub fn calibration_inputs(&self, planes: usize, center: RingCenter) -> CalibrationInputs {
        CalibrationInputs {
            calibration_wavelength: self.calibration_wavelength,
            free_spectral_range: self.free_spectral_range,
            interference_order: self.interference_order,
            interference_reference_wavelength: self.interference_reference_wavelength,
            scanning_wavelength: self.scanning_wavelength,
            planes,
            center,
        }
    }

    /// Interference order at the calibration wavelength.
    pub fn calibration_order(&self) -> u32 {
        let order = self.interference_order as f64 * self.interference_reference_wavelength
            / self.calibration_wavelength;
        order.round().max(1.0) as u32
    }
}
