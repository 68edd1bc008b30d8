use ndarray::ArrayView2;
use tracing::info;

use crate::cube::{NoiseMask, PlaneMap};
use crate::error::{FabryError, Result};
use crate::pixels::{distance, map_pixels};
use crate::rings::RingGeometry;

/// Map every border pixel to the radius of its nearest ring; 0 elsewhere.
///
/// Border candidates are ring-mask pixels, noise pixels, and pixels where the
/// wrapped phase jumps by more than half a period to a 4-neighbor.
pub fn border_distance_map(
    wrapped: &PlaneMap,
    rings: &RingGeometry,
    noise: &NoiseMask,
    period: f64,
) -> Result<PlaneMap> {
    let (h, w) = wrapped.dim();
    if noise.dim() != (h, w) {
        return Err(FabryError::DimensionMismatch {
            expected: (h, w),
            found: noise.dim(),
        });
    }
    if let Some(mask) = rings.masks.iter().find(|m| m.dim() != (h, w)) {
        return Err(FabryError::DimensionMismatch {
            expected: (h, w),
            found: mask.dim(),
        });
    }

    let phase = wrapped.array();
    let center = rings.center;
    let map = map_pixels(h, w, |row, col| {
        let candidate = noise.is_noise(row, col)
            || rings.masks.iter().any(|m| m.get(row, col) != 0)
            || wraps(&phase, row, col, period);
        if !candidate {
            return 0.0;
        }
        let d = distance(row, col, center.y, center.x);
        nearest_radius(&rings.radii, d).unwrap_or(0.0)
    });

    let borders = map.iter().filter(|&&v| v > 0.0).count();
    info!(border_pixels = borders, rings = rings.radii.len(), "Border distance map computed");
    Ok(PlaneMap::new(map))
}

/// The ring radius closest to `d`.
pub fn nearest_radius(radii: &[f64], d: f64) -> Option<f64> {
    radii
        .iter()
        .copied()
        .min_by(|a, b| (a - d).abs().total_cmp(&(b - d).abs()))
}

/// Phase jumps by more than half a period to a 4-neighbor.
fn wraps(phase: &ArrayView2<'_, f64>, row: usize, col: usize, period: f64) -> bool {
    let (h, w) = phase.dim();
    let v = phase[[row, col]];
    if !v.is_finite() {
        return false;
    }
    let half = period / 2.0;
    let jump = |y: usize, x: usize| {
        let n = phase[[y, x]];
        n.is_finite() && (v - n).abs() > half
    };
    (row > 0 && jump(row - 1, col))
        || (row + 1 < h && jump(row + 1, col))
        || (col > 0 && jump(row, col - 1))
        || (col + 1 < w && jump(row, col + 1))
}
