//! Continuum estimation (median of the faintest channels) and its removal.
//!
//! Over one free spectral range a spectrum is a flat continuum plus a single
//! narrow emission peak, so the faintest channels sample the continuum.

use ndarray::{Array3, Axis, Zip};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cube::{Cube, PlaneMap};
use crate::error::{FabryError, Result};
use crate::pixels::map_pixels;
use crate::stats::median_mut;

/// Implementations available for the continuum slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContinuumDetector {
    /// Median of the lowest `ceil(ratio * P)` channels.
    #[default]
    LowestChannelsMedian,
}

impl ContinuumDetector {
    pub fn name(&self) -> &'static str {
        match self {
            Self::LowestChannelsMedian => "lowest-median",
        }
    }
}

/// Number of channels used for a cube with `planes` planes.
pub fn continuum_channel_count(planes: usize, ratio: f64) -> usize {
    ((ratio * planes as f64).ceil() as usize).clamp(1, planes.max(1))
}

/// Continuum plane: per pixel, the median of its `ceil(ratio * P)` faintest channels.
pub fn continuum_map(cube: &Cube, detector: ContinuumDetector, ratio: f64) -> Result<PlaneMap> {
    if !(ratio > 0.0 && ratio <= 1.0) {
        return Err(FabryError::InvalidConfig(format!(
            "continuum_to_fsr_ratio must lie in (0, 1], got {ratio}"
        )));
    }
    let (p, h, w) = cube.shape();
    let count = continuum_channel_count(p, ratio);
    let data = cube.array();

    let map = match detector {
        ContinuumDetector::LowestChannelsMedian => map_pixels(h, w, |row, col| {
            let mut spectrum: Vec<f64> = (0..p).map(|pl| data[[pl, row, col]] as f64).collect();
            spectrum.sort_unstable_by(|a, b| a.total_cmp(b));
            median_mut(&mut spectrum[..count]).unwrap_or(0.0)
        }),
    };

    info!(channels = count, planes = p, "Continuum map computed");
    Ok(PlaneMap::new(map))
}

/// Per-plane `|cube - continuum|`.
pub fn discontinuum(cube: &Cube, continuum: &PlaneMap) -> Result<Cube> {
    let (p, h, w) = cube.shape();
    if continuum.dim() != (h, w) {
        return Err(FabryError::DimensionMismatch {
            expected: (h, w),
            found: continuum.dim(),
        });
    }
    let cont = continuum.array();
    let mut out = Array3::<f32>::zeros((p, h, w));
    for (mut dst, src) in out.axis_iter_mut(Axis(0)).zip(cube.array().axis_iter(Axis(0))) {
        Zip::from(&mut dst)
            .and(&src)
            .and(&cont)
            .par_for_each(|d, &s, &c| *d = (s as f64 - c).abs() as f32);
    }
    Cube::new(out)
}
