use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cube::{Cube, NoiseMask, PlaneMap};
use crate::error::{FabryError, Result};
use crate::stats::smallest_nonnull_percentile;

/// Implementations available for the noise slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoiseDetector {
    /// Threshold the plane-summed image, then grow a disk around each hit.
    #[default]
    SummedThreshold,
}

impl NoiseDetector {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SummedThreshold => "summed-threshold",
        }
    }
}

/// Flag unreliable pixels.
///
/// A pixel is noise when its summed spectrum is at or below `threshold`
/// (default: the smallest strictly positive integer percentile of the summed
/// image) or when its wrapped phase is not finite. A disk of `radius` pixels
/// is painted around every hit; disks are clipped at the image edge.
pub fn noise_mask(
    cube: &Cube,
    wrapped: &PlaneMap,
    detector: NoiseDetector,
    threshold: Option<f64>,
    radius: usize,
) -> Result<NoiseMask> {
    let (h, w) = cube.plane_dim();
    if wrapped.dim() != (h, w) {
        return Err(FabryError::DimensionMismatch {
            expected: (h, w),
            found: wrapped.dim(),
        });
    }

    let mask = match detector {
        NoiseDetector::SummedThreshold => {
            let summed = cube.summed();
            let tau = threshold.unwrap_or_else(|| smallest_nonnull_percentile(summed.iter().copied()));
            let phase = wrapped.array();
            let seeds: Vec<(usize, usize)> = summed
                .indexed_iter()
                .filter(|&((row, col), &s)| !s.is_finite() || s <= tau || !phase[[row, col]].is_finite())
                .map(|(idx, _)| idx)
                .collect();
            info!(threshold = tau, seeds = seeds.len(), radius, "Noise pixels detected");
            paint_disks(h, w, &seeds, radius)
        }
    };

    Ok(NoiseMask::new(mask))
}

/// OR a filled disk of `radius` around every seed into an `(h, w)` mask.
pub fn paint_disks(h: usize, w: usize, seeds: &[(usize, usize)], radius: usize) -> Array2<u8> {
    let mut mask = Array2::<u8>::zeros((h, w));
    let r = radius as isize;
    let r2 = r * r;
    for &(row, col) in seeds {
        for dy in -r..=r {
            let y = row as isize + dy;
            if y < 0 || y >= h as isize {
                continue;
            }
            for dx in -r..=r {
                let x = col as isize + dx;
                if x < 0 || x >= w as isize || dy * dy + dx * dx > r2 {
                    continue;
                }
                mask[[y as usize, x as usize]] = 1;
            }
        }
    }
    mask
}
