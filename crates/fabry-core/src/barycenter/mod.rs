//! Wrapped phase map: the fractional channel of each pixel's emission peak.

mod gaussian;
mod segment;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cube::{Cube, PlaneMap};
use crate::pixels::map_pixels;

pub use gaussian::gaussian_fit_barycenter;
pub use segment::peak_segment_barycenter;

/// Implementations available for the barycenter slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarycenterAlgorithm {
    /// Half-height segment extended to the shoulders.
    #[default]
    PeakSegment,
    /// Window of +/- 4 FWHH around a fitted 1-D Gaussian.
    GaussianFit,
}

impl BarycenterAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PeakSegment => "peak-segment",
            Self::GaussianFit => "gaussian-fit",
        }
    }

    pub fn barycenter(&self, spectrum: &[f64]) -> f64 {
        match self {
            Self::PeakSegment => peak_segment_barycenter(spectrum),
            Self::GaussianFit => gaussian_fit_barycenter(spectrum),
        }
    }
}

/// Barycenter of every pixel of a continuum-subtracted cube. Values lie in `[0, P)`.
pub fn wrapped_phase_map(discontinuum: &Cube, algorithm: BarycenterAlgorithm) -> PlaneMap {
    let (p, h, w) = discontinuum.shape();
    let data = discontinuum.array();
    let map = map_pixels(h, w, |row, col| {
        let spectrum: Vec<f64> = (0..p).map(|pl| data[[pl, row, col]] as f64).collect();
        algorithm.barycenter(&spectrum)
    });
    info!(algorithm = algorithm.name(), planes = p, "Wrapped phase map computed");
    PlaneMap::new(map)
}
