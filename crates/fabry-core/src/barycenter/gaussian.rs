use std::sync::Arc;

use tiny_solver::factors::na;

use crate::consts::{FWHH_PER_SIGMA, GAUSSIAN_WINDOW_FWHH};
use crate::fit::solver::{solve_bounded, Bounds, ResidualModel};

use super::segment::{center_on_peak, peak_segment_barycenter, segment_barycenter, unroll};

/// Iteration cap for the per-pixel Gaussian; spectra are short.
const GAUSSIAN_MAX_ITERATIONS: usize = 100;

/// `amplitude * exp(-(x - mean)^2 / (2 sigma^2)) + offset` over channel indices.
struct Gaussian1d {
    values: Vec<f64>,
}

impl ResidualModel for Gaussian1d {
    fn num_params(&self) -> usize {
        4
    }

    fn num_residuals(&self) -> usize {
        self.values.len()
    }

    fn residuals<T: na::RealField>(&self, p: &[T]) -> Vec<T> {
        let half: T = na::convert(-0.5);
        self.values
            .iter()
            .enumerate()
            .map(|(i, &y)| {
                let z = (na::convert::<f64, T>(i as f64) - p[1].clone()) / p[2].clone();
                p[0].clone() * (half.clone() * z.clone() * z).exp() + p[3].clone()
                    - na::convert::<f64, T>(y)
            })
            .collect()
    }
}

/// Barycenter over a window of +/- 4 FWHH around a fitted Gaussian.
///
/// Falls back to the peak-segment method when the fit does not converge.
pub fn gaussian_fit_barycenter(spectrum: &[f64]) -> f64 {
    let p = spectrum.len();
    if p < 4 {
        return peak_segment_barycenter(spectrum);
    }
    let centered = center_on_peak(spectrum);
    let values = &centered.values;
    let center = p / 2;
    let peak = values[center];
    let floor = values.iter().copied().fold(f64::INFINITY, f64::min);
    if peak <= 0.0 || peak <= floor {
        return peak_segment_barycenter(spectrum);
    }

    let above_half = values.iter().filter(|&&v| v - floor >= (peak - floor) / 2.0).count();
    let sigma0 = (above_half as f64 / FWHH_PER_SIGMA).max(0.5);

    let amplitude = peak - floor;
    let model = Arc::new(Gaussian1d {
        values: values.clone(),
    });
    let mut bounds = Bounds::unbounded(4);
    bounds.set(1, 0.0, (p - 1) as f64);
    bounds.set(2, 0.1, p as f64);
    let fit = solve_bounded(
        model,
        &[amplitude, center as f64, sigma0, floor],
        &[amplitude, 1.0, sigma0, amplitude],
        &bounds,
        GAUSSIAN_MAX_ITERATIONS,
    );
    let Some(fit) = fit else {
        return peak_segment_barycenter(spectrum);
    };

    let mean = fit.params[1];
    let fwhh = FWHH_PER_SIGMA * fit.params[2].abs();
    let lo = (mean - GAUSSIAN_WINDOW_FWHH * fwhh).floor().max(0.0) as usize;
    let hi = ((mean + GAUSSIAN_WINDOW_FWHH * fwhh).ceil() as usize).min(p - 1);
    if lo > hi {
        return peak_segment_barycenter(spectrum);
    }
    match segment_barycenter(values, lo, hi) {
        Some(position) => unroll(position, centered.roll, p),
        None => 0.0,
    }
}
