//! Wavelength calibration: anchor the unwrapped map on the calibration line.

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::cube::PlaneMap;
use crate::error::{FabryError, Result};
use crate::rings::RingCenter;

/// Instrument constants, all wavelengths in angstroms.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationInputs {
    pub calibration_wavelength: f64,
    pub free_spectral_range: f64,
    /// Interference order at `interference_reference_wavelength`.
    pub interference_order: u32,
    pub interference_reference_wavelength: f64,
    pub scanning_wavelength: f64,
    /// Number of channels (the phase period).
    pub planes: usize,
    pub center: RingCenter,
}

impl CalibrationInputs {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("calibration_wavelength", self.calibration_wavelength),
            ("free_spectral_range", self.free_spectral_range),
            ("interference_reference_wavelength", self.interference_reference_wavelength),
            ("scanning_wavelength", self.scanning_wavelength),
        ];
        if let Some((name, value)) = positive.iter().find(|(_, v)| !(v.is_finite() && *v > 0.0)) {
            return Err(FabryError::InvalidConfig(format!("{name} must be positive, got {value}")));
        }
        if self.interference_order == 0 {
            return Err(FabryError::InvalidConfig("interference_order must be at least 1".into()));
        }
        if self.planes == 0 {
            return Err(FabryError::InvalidConfig("calibration needs at least one channel".into()));
        }
        Ok(())
    }

    /// Order of `wavelength` given the reference order.
    pub fn order_at(&self, wavelength: f64) -> i64 {
        (self.interference_order as f64 * self.interference_reference_wavelength / wavelength).round() as i64
    }
}

/// How the calibrated map relates to the unwrapped one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibrationMode {
    /// Shifted by the calibration offset and re-anchored at the ring center.
    Anchored,
    /// Copied unchanged (center outside the image or no usable pixels).
    PassThrough,
}

/// The affine transform applied by [`calibrate_wavelength`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub mode: CalibrationMode,
    pub order_cal: i64,
    pub order_scan: i64,
    /// Channel offset subtracted from the unwrapped map.
    pub decalage: f64,
    /// Whole periods added to bring the center into `[0, P]`.
    pub wrap_shift: f64,
    /// Calibrated value at the ring center.
    pub center_value: Option<f64>,
}

impl CalibrationReport {
    pub fn pass_through() -> Self {
        Self {
            mode: CalibrationMode::PassThrough,
            order_cal: 0,
            order_scan: 0,
            decalage: 0.0,
            wrap_shift: 0.0,
            center_value: None,
        }
    }

    /// Total offset: `calibrated = unwrapped + offset`.
    pub fn offset(&self) -> f64 {
        match self.mode {
            CalibrationMode::Anchored => self.wrap_shift - self.decalage,
            CalibrationMode::PassThrough => 0.0,
        }
    }

    /// Recover the unwrapped map from a calibrated one.
    pub fn invert(&self, calibrated: &PlaneMap) -> PlaneMap {
        let offset = self.offset();
        PlaneMap::new(calibrated.array().mapv(|v| v - offset))
    }
}

/// Calibrate `unwrapped` into channel units anchored on the calibration line.
///
/// A ring center outside the image leaves the map unchanged.
pub fn calibrate_wavelength(unwrapped: &PlaneMap, inputs: &CalibrationInputs) -> Result<(PlaneMap, CalibrationReport)> {
    inputs.validate()?;
    let (h, w) = unwrapped.dim();
    let Some((cy, cx)) = inputs.center.pixel(h, w) else {
        error!(center = %inputs.center, rows = h, cols = w, "Ring center lies outside the image; calibration skipped");
        return Ok((unwrapped.clone(), CalibrationReport::pass_through()));
    };

    let period = inputs.planes as f64;
    let order_cal = inputs.order_at(inputs.calibration_wavelength);
    let order_scan = inputs.order_at(inputs.scanning_wavelength);
    let shifted_line = inputs.calibration_wavelength * order_cal as f64 / order_scan as f64;
    let decalage = period * (0.5 - (inputs.scanning_wavelength - shifted_line) / inputs.free_spectral_range);

    let value = unwrapped.get(cy, cx) - decalage;
    let wrap_shift = if !value.is_finite() {
        0.0
    } else if value < 0.0 {
        (-value / period).ceil() * period
    } else if value > period {
        -(value / period).floor() * period
    } else {
        0.0
    };

    let report = CalibrationReport {
        mode: CalibrationMode::Anchored,
        order_cal,
        order_scan,
        decalage,
        wrap_shift,
        center_value: value.is_finite().then_some(value + wrap_shift),
    };
    let offset = report.offset();
    let calibrated = PlaneMap::new(unwrapped.array().mapv(|v| v + offset));

    info!(
        order_cal,
        order_scan,
        decalage,
        wrap_shift,
        center_value = ?report.center_value,
        "Wavelength calibration applied"
    );
    Ok((calibrated, report))
}
