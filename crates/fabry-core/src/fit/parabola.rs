//! Center-anchored paraboloid fit of the unwrapped phase.

use nalgebra::{Matrix5, Vector5};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cube::{NoiseMask, PlaneMap};
use crate::pixels::map_pixels;
use crate::rings::RingCenter;

/// `z = a + b (x - cx) + c (y - cy) + d (x - cx)^2 + e (y - cy)^2`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParabolaCoefficients {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
}

impl ParabolaCoefficients {
    pub fn evaluate(&self, dx: f64, dy: f64) -> f64 {
        self.a + self.b * dx + self.c * dy + self.d * dx * dx + self.e * dy * dy
    }

    /// `d / e`; close to 1 for circular rings.
    pub fn ratio(&self) -> f64 {
        self.d / self.e
    }
}

#[derive(Clone, Debug)]
pub struct ParabolicFit {
    pub coefficients: ParabolaCoefficients,
    pub center: RingCenter,
    pub surface: PlaneMap,
    /// Pixels used by the fit.
    pub samples: usize,
    pub rms: f64,
}

fn basis(dx: f64, dy: f64) -> Vector5<f64> {
    Vector5::new(1.0, dx, dy, dx * dx, dy * dy)
}

/// Least-squares paraboloid over the finite, noise-free pixels of `unwrapped`.
///
/// Returns `None` when fewer than five pixels remain or the system is singular.
pub fn fit_paraboloid(unwrapped: &PlaneMap, noise: &NoiseMask, center: RingCenter) -> Option<ParabolicFit> {
    let (h, w) = unwrapped.dim();
    if noise.dim() != (h, w) {
        warn!("Noise mask shape differs from the unwrapped map; skipping parabolic fit");
        return None;
    }

    // Coordinates are scaled to O(1) so the normal matrix stays well conditioned.
    let scale = h.max(w).max(1) as f64;
    let data = unwrapped.array();
    let mut ata = Matrix5::<f64>::zeros();
    let mut atz = Vector5::<f64>::zeros();
    let mut samples = 0usize;
    for ((row, col), &z) in data.indexed_iter() {
        if !z.is_finite() || noise.is_noise(row, col) {
            continue;
        }
        let v = basis((col as f64 - center.x) / scale, (row as f64 - center.y) / scale);
        ata += v * v.transpose();
        atz += v * z;
        samples += 1;
    }
    if samples < 5 {
        warn!(samples, "Too few valid pixels for a parabolic fit");
        return None;
    }

    let solution = ata
        .cholesky()
        .map(|c| c.solve(&atz))
        .or_else(|| ata.lu().solve(&atz))?;
    let coefficients = ParabolaCoefficients {
        a: solution[0],
        b: solution[1] / scale,
        c: solution[2] / scale,
        d: solution[3] / (scale * scale),
        e: solution[4] / (scale * scale),
    };

    let surface = map_pixels(h, w, |row, col| {
        coefficients.evaluate(col as f64 - center.x, row as f64 - center.y)
    });
    let sse: f64 = data
        .indexed_iter()
        .filter(|&((row, col), z)| z.is_finite() && !noise.is_noise(row, col))
        .map(|((row, col), &z)| (z - surface[[row, col]]).powi(2))
        .sum();
    let rms = (sse / samples as f64).sqrt();

    info!(
        d = coefficients.d,
        e = coefficients.e,
        ratio = coefficients.ratio(),
        rms,
        samples,
        "Parabolic fit complete"
    );
    Some(ParabolicFit {
        coefficients,
        center,
        surface: PlaneMap::new(surface),
        samples,
        rms,
    })
}
