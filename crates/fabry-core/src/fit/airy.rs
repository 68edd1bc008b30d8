//! Per-plane Airy transmission fit (étalon gap, finesse, b-ratio, center).
//!
//! Plane 0 is fitted with every parameter free inside a box around the
//! ring-derived seed. The shared geometry `(b, cx, cy, F)` is then locked and
//! each other plane only fits its gap, continuum and intensity. Every plane
//! starts with a coarse scan of the gap (continuum and intensity solved in
//! closed form at each trial) so the polishing step begins in the right
//! fringe of the periodic cost.

use std::f64::consts::PI;
use std::sync::Arc;

use ndarray::{Array2, Array3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tiny_solver::factors::na;
use tracing::{debug, info, warn};

use crate::consts::{
    AIRY_B_RELATIVE_BOUND, AIRY_CENTER_BOUND_PX, AIRY_FINESSE_RELATIVE_BOUND,
    AIRY_GAP_STEP_WINDOW, AIRY_INTENSITY_PERCENTILE, AIRY_SCAN_SAMPLES_PER_FRINGE,
    ANGSTROM_TO_MICRON, EPSILON,
};
use crate::cube::Cube;
use crate::error::{FabryError, Result};
use crate::fit::solver::{solve_bounded, Bounds, ResidualModel};
use crate::fsr::ScanDirection;
use crate::hash::{ContentHash, ContentHasher};
use crate::pixels::map_pixels;
use crate::rings::RingGeometry;
use crate::stats::{percentile, smallest_nonnull_percentile};

/// Residual count above which planes are subsampled on a regular grid.
const MAX_FIT_SAMPLES: usize = 65_536;

/// Upper bound on trial gaps in one scan.
const MAX_SCAN_TRIALS: usize = 20_000;

const B: usize = 0;
const CX: usize = 1;
const CY: usize = 2;
const CONTINUUM: usize = 3;
const FINESSE: usize = 4;
const GAP: usize = 5;
const INTENSITY: usize = 6;
const N_PARAMS: usize = 7;

/// Implementations available for the Airy fit slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AiryFitAlgorithm {
    /// Plane 0, plane 1 for the direction, middle plane, then the rest in order.
    #[default]
    SequentialPlanes,
}

impl AiryFitAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SequentialPlanes => "sequential-planes",
        }
    }
}

/// Airy model parameters for one plane.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AiryParams {
    /// Pixel size over focal length.
    pub b: f64,
    /// Ring center column.
    pub cx: f64,
    /// Ring center row.
    pub cy: f64,
    pub continuum: f64,
    pub finesse: f64,
    /// Étalon gap in microns.
    pub gap: f64,
    /// Peak intensity above the continuum.
    pub intensity: f64,
}

impl AiryParams {
    /// `4F^2 / pi^2`.
    pub fn coefficient(&self) -> f64 {
        coefficient(self.finesse)
    }

    /// Model intensity at distance `d` pixels from the center.
    pub fn value_at(&self, d: f64, wavelength_um: f64) -> f64 {
        airy_shape(self.b, self.finesse, self.gap, d, wavelength_um)
            .mul_add(self.intensity, self.continuum)
    }

    /// Render the model over an `(h, w)` plane.
    pub fn render(&self, h: usize, w: usize, wavelength_um: f64) -> Array2<f64> {
        map_pixels(h, w, |row, col| {
            let d = ((row as f64 - self.cy).powi(2) + (col as f64 - self.cx).powi(2)).sqrt();
            self.value_at(d, wavelength_um)
        })
    }

    fn to_vec(self) -> Vec<f64> {
        let mut p = vec![0.0; N_PARAMS];
        p[B] = self.b;
        p[CX] = self.cx;
        p[CY] = self.cy;
        p[CONTINUUM] = self.continuum;
        p[FINESSE] = self.finesse;
        p[GAP] = self.gap;
        p[INTENSITY] = self.intensity;
        p
    }

    fn from_slice(p: &[f64]) -> Self {
        Self {
            b: p[B],
            cx: p[CX],
            cy: p[CY],
            continuum: p[CONTINUUM],
            finesse: p[FINESSE],
            gap: p[GAP],
            intensity: p[INTENSITY],
        }
    }

    fn is_finite(&self) -> bool {
        self.to_vec().iter().all(|v| v.is_finite())
    }
}

fn coefficient(finesse: f64) -> f64 {
    4.0 * finesse * finesse / (PI * PI)
}

/// Normalised transmission `1 / (1 + K sin^2(phi / 2))`.
#[inline]
fn airy_shape(b: f64, finesse: f64, gap: f64, d: f64, wavelength_um: f64) -> f64 {
    let phi = 4.0 * PI * gap / (wavelength_um * (1.0 + b * b * d * d).sqrt());
    let s = (phi / 2.0).sin();
    1.0 / (1.0 + coefficient(finesse) * s * s)
}

/// Instrument constants and limits for the Airy fit.
#[derive(Clone, Debug, PartialEq)]
pub struct AirySettings {
    /// Calibration wavelength in microns.
    pub wavelength_um: f64,
    /// Interference order at the calibration wavelength.
    pub order: u32,
    /// Initial finesse.
    pub finesse: f64,
    pub max_iterations: usize,
}

impl AirySettings {
    pub fn new(calibration_wavelength_angstrom: f64, order: u32, finesse: f64) -> Self {
        Self {
            wavelength_um: calibration_wavelength_angstrom * ANGSTROM_TO_MICRON,
            order,
            finesse,
            max_iterations: crate::consts::DEFAULT_MAX_FIT_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Gap period of the transmission (one free spectral range).
    fn gap_period(&self) -> f64 {
        self.wavelength_um / 2.0
    }
}

/// Fitted parameters for every plane.
#[derive(Clone, Debug)]
pub struct AiryFitResult {
    pub per_plane: Vec<AiryParams>,
    /// `false` where the plane kept its predecessor's parameters.
    pub converged: Vec<bool>,
    /// Gap increment per channel, `(e_mid - e_0) / mid`.
    pub channel_gap: f64,
    pub wavelength_um: f64,
    hash: ContentHash,
}

impl AiryFitResult {
    fn new(per_plane: Vec<AiryParams>, converged: Vec<bool>, channel_gap: f64, wavelength_um: f64) -> Self {
        let mut hasher = ContentHasher::new();
        hasher.tag("airy").usize(per_plane.len()).f64(channel_gap).f64(wavelength_um);
        for p in &per_plane {
            for v in p.to_vec() {
                hasher.f64(v);
            }
        }
        for &c in &converged {
            hasher.bool(c);
        }
        Self {
            per_plane,
            converged,
            channel_gap,
            wavelength_um,
            hash: hasher.finish(),
        }
    }

    pub fn hash(&self) -> ContentHash {
        self.hash
    }

    /// Parameters of plane 0, which carry the shared geometry.
    pub fn reference(&self) -> &AiryParams {
        &self.per_plane[0]
    }

    /// Camera focal length implied by the fitted pixel/focal ratio `b`, in the
    /// unit of `pixel_size`.
    pub fn focal_length(&self, pixel_size: f64) -> Option<f64> {
        let b = self.reference().b;
        (b > 0.0 && pixel_size > 0.0).then(|| pixel_size / b)
    }

    pub fn gaps(&self) -> Vec<f64> {
        self.per_plane.iter().map(|p| p.gap).collect()
    }

    /// Scan direction implied by the sign of the channel gap.
    pub fn direction(&self) -> Option<ScanDirection> {
        if self.channel_gap > 0.0 {
            Some(ScanDirection::Outward)
        } else if self.channel_gap < 0.0 {
            Some(ScanDirection::Inward)
        } else {
            None
        }
    }

    /// Gaps never move against the scan direction.
    pub fn is_monotone(&self) -> bool {
        let gaps = self.gaps();
        match self.direction() {
            Some(ScanDirection::Outward) => gaps.windows(2).all(|w| w[1] >= w[0]),
            Some(ScanDirection::Inward) => gaps.windows(2).all(|w| w[1] <= w[0]),
            None => gaps.windows(2).all(|w| w[1] == w[0]),
        }
    }

    /// Render plane `plane`'s model over an `(h, w)` image.
    pub fn render_plane(&self, plane: usize, h: usize, w: usize) -> Option<Array2<f64>> {
        self.per_plane
            .get(plane)
            .map(|p| p.render(h, w, self.wavelength_um))
    }

    /// Copy of `cube` whose planes in `channels` hold the fitted model instead of data.
    pub fn substitute(&self, cube: &Cube, channels: &[usize]) -> Result<Cube> {
        let (p, h, w) = cube.shape();
        if p != self.per_plane.len() {
            return Err(FabryError::InvalidCube {
                reason: format!(
                    "cube has {p} planes but the Airy fit covers {}",
                    self.per_plane.len()
                ),
            });
        }
        if let Some(&bad) = channels.iter().find(|&&c| c >= p) {
            return Err(FabryError::InvalidConfig(format!(
                "channel_subset entry {bad} is out of range for {p} planes"
            )));
        }
        let mut data: Array3<f32> = cube.array().to_owned();
        for &channel in channels {
            let model = self.per_plane[channel].render(h, w, self.wavelength_um);
            data.index_axis_mut(ndarray::Axis(0), channel)
                .assign(&model.mapv(|v| v as f32));
        }
        let mut substituted = Cube::new(data)?;
        if let Some(source) = cube.source() {
            substituted = substituted.with_source(source);
        }
        Ok(substituted)
    }
}

/// Regularly subsampled plane values with their pixel coordinates.
struct PlaneSamples {
    rows: Vec<f64>,
    cols: Vec<f64>,
    values: Vec<f64>,
    wavelength_um: f64,
}

impl PlaneSamples {
    /// Finite values of `plane` at pixels inside `signal`.
    fn from_cube(cube: &Cube, plane: usize, signal: &Array2<bool>, wavelength_um: f64) -> Self {
        let (h, w) = cube.plane_dim();
        let stride = ((h * w) as f64 / MAX_FIT_SAMPLES as f64).sqrt().ceil().max(1.0) as usize;
        let view = cube.plane(plane);
        let mut rows = Vec::new();
        let mut cols = Vec::new();
        let mut values = Vec::new();
        for row in (0..h).step_by(stride) {
            for col in (0..w).step_by(stride) {
                let v = view[[row, col]];
                if v.is_finite() && signal[[row, col]] {
                    rows.push(row as f64);
                    cols.push(col as f64);
                    values.push(v as f64);
                }
            }
        }
        Self {
            rows,
            cols,
            values,
            wavelength_um,
        }
    }

    fn shape_at(&self, p: &[f64], i: usize) -> f64 {
        let d = ((self.rows[i] - p[CY]).powi(2) + (self.cols[i] - p[CX]).powi(2)).sqrt();
        airy_shape(p[B], p[FINESSE], p[GAP], d, self.wavelength_um)
    }

    /// Best continuum and intensity for fixed shape parameters, with the cost.
    fn solve_linear(&self, p: &[f64]) -> Option<(f64, f64, f64)> {
        let n = self.values.len() as f64;
        let (mut sa, mut saa, mut sy, mut say, mut syy) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for (i, &y) in self.values.iter().enumerate() {
            let a = self.shape_at(p, i);
            sa += a;
            saa += a * a;
            sy += y;
            say += a * y;
            syy += y * y;
        }
        let det = n * saa - sa * sa;
        if det.abs() < EPSILON * n * saa.max(1.0) {
            return None;
        }
        let intensity = (n * say - sa * sy) / det;
        let continuum = (sy - intensity * sa) / n;
        let cost = syy - 2.0 * continuum * sy - 2.0 * intensity * say
            + continuum * continuum * n
            + 2.0 * continuum * intensity * sa
            + intensity * intensity * saa;
        Some((continuum, intensity, cost.max(0.0)))
    }
}

impl ResidualModel for PlaneSamples {
    fn num_params(&self) -> usize {
        N_PARAMS
    }

    fn num_residuals(&self) -> usize {
        self.values.len()
    }

    fn residuals<T: na::RealField>(&self, p: &[T]) -> Vec<T> {
        let one: T = na::convert(1.0);
        let phase_per_gap: T = na::convert(2.0 * PI / self.wavelength_um);
        let k = na::convert::<f64, T>(4.0 / (PI * PI)) * p[FINESSE].clone() * p[FINESSE].clone();
        let b2 = p[B].clone() * p[B].clone();
        (0..self.values.len())
            .map(|i| {
                let dy = na::convert::<f64, T>(self.rows[i]) - p[CY].clone();
                let dx = na::convert::<f64, T>(self.cols[i]) - p[CX].clone();
                let d2 = dy.clone() * dy + dx.clone() * dx;
                // Half the round-trip phase 4 pi e / (lambda sqrt(1 + b^2 d^2)).
                let half_phi = phase_per_gap.clone() * p[GAP].clone() / (one.clone() + b2.clone() * d2).sqrt();
                let s = half_phi.sin();
                p[CONTINUUM].clone() + p[INTENSITY].clone() / (one.clone() + k.clone() * s.clone() * s)
                    - na::convert::<f64, T>(self.values[i])
            })
            .collect()
    }
}

/// Typical step of every parameter, handed to the solver for conditioning.
fn param_scales(start: &AiryParams, settings: &AirySettings) -> Vec<f64> {
    let level = start.intensity.abs().max(1.0) * 1e-2;
    let mut scale = vec![1.0; N_PARAMS];
    scale[B] = start.b.abs().max(EPSILON) * 1e-2;
    scale[CX] = 1.0;
    scale[CY] = 1.0;
    scale[CONTINUUM] = level;
    scale[FINESSE] = 0.1;
    scale[GAP] = settings.gap_period() / start.finesse.max(1.0);
    scale[INTENSITY] = level;
    scale
}

/// Ring-derived starting point for plane 0.
pub fn seed_params(cube: &Cube, rings: &RingGeometry, settings: &AirySettings) -> Result<AiryParams> {
    if rings.radii.len() < 2 {
        return Err(FabryError::Fit(format!(
            "the Airy seed needs two rings, found {}",
            rings.radii.len()
        )));
    }
    let (r0, r1) = (rings.radii[0], rings.radii[1]);
    let n = settings.order as f64;
    let lambda = settings.wavelength_um;

    let denominator = (n - 1.0).powi(2) * r1 * r1 - n * n * r0 * r0;
    let b_squared = (2.0 * n - 1.0) / denominator;
    if !(b_squared.is_finite() && b_squared > 0.0) {
        return Err(FabryError::Fit(format!(
            "rings at {r0:.2} and {r1:.2} px give no valid b-ratio for order {n}"
        )));
    }
    let b = b_squared.sqrt();
    let gap = lambda * n * (1.0 + b_squared * r0 * r0).sqrt() / 2.0;

    let signal = cube.signal_mask();
    let values: Vec<f64> = cube
        .plane(0)
        .iter()
        .zip(signal.iter())
        .filter(|&(v, &s)| s && v.is_finite())
        .map(|(&v, _)| v as f64)
        .collect();
    let low = smallest_nonnull_percentile(values.iter().copied());
    let high = percentile(values, AIRY_INTENSITY_PERCENTILE).unwrap_or(low);
    let k = coefficient(settings.finesse);
    let intensity = (high - low) * (1.0 + k) / k;
    let continuum = low - intensity / (1.0 + k);

    Ok(AiryParams {
        b,
        cx: rings.center.x,
        cy: rings.center.y,
        continuum,
        finesse: settings.finesse,
        gap,
        intensity,
    })
}

/// Coarse gap scan over `[lo, hi]`; returns the best gap with its linear terms.
fn scan_gap(samples: &PlaneSamples, start: &AiryParams, lo: f64, hi: f64, settings: &AirySettings) -> AiryParams {
    let fringe = settings.gap_period() / start.finesse.max(1.0);
    let step = fringe / AIRY_SCAN_SAMPLES_PER_FRINGE;
    let trials = (((hi - lo) / step).ceil() as usize + 1).clamp(2, MAX_SCAN_TRIALS);
    let base = start.to_vec();

    let best = (0..trials)
        .into_par_iter()
        .filter_map(|t| {
            let mut p = base.clone();
            p[GAP] = lo + (hi - lo) * t as f64 / (trials - 1) as f64;
            let (continuum, intensity, cost) = samples.solve_linear(&p)?;
            (intensity > 0.0 && cost.is_finite()).then_some((cost, t, continuum, intensity, p[GAP]))
        })
        .reduce_with(|a, b| if b.0 < a.0 || (b.0 == a.0 && b.1 < a.1) { b } else { a });

    match best {
        Some((_, _, continuum, intensity, gap)) => AiryParams {
            continuum,
            intensity,
            gap,
            ..*start
        },
        None => *start,
    }
}

/// Scan then polish one plane. Returns `None` when the fit does not converge.
fn fit_plane(
    samples: Arc<PlaneSamples>,
    start: &AiryParams,
    bounds: &Bounds,
    settings: &AirySettings,
) -> Option<AiryParams> {
    let scanned = scan_gap(&samples, start, bounds.lower[GAP], bounds.upper[GAP], settings);
    let scale = param_scales(&scanned, settings);
    let outcome = solve_bounded(samples, &scanned.to_vec(), &scale, bounds, settings.max_iterations)?;
    let fitted = AiryParams::from_slice(&outcome.params);
    debug!(
        gap = fitted.gap,
        continuum = fitted.continuum,
        intensity = fitted.intensity,
        cost = outcome.cost,
        "Airy plane fit"
    );
    (fitted.is_finite() && fitted.intensity > 0.0).then_some(fitted)
}

/// Bounds with the shared geometry of `reference` held fixed and the gap in `[lo, hi]`.
fn locked_bounds(reference: &AiryParams, lo: f64, hi: f64) -> Bounds {
    let mut bounds = Bounds::unbounded(N_PARAMS);
    bounds.fix(B, reference.b);
    bounds.fix(CX, reference.cx);
    bounds.fix(CY, reference.cy);
    bounds.fix(FINESSE, reference.finesse);
    bounds.set(GAP, lo, hi);
    bounds
}

/// Fit every plane of `cube` with the Airy model.
///
/// Fails only when plane 0 cannot be fitted; later planes that fail keep the
/// parameters of the plane before them.
pub fn fit_airy(
    cube: &Cube,
    rings: &RingGeometry,
    algorithm: AiryFitAlgorithm,
    settings: &AirySettings,
) -> Result<AiryFitResult> {
    match algorithm {
        AiryFitAlgorithm::SequentialPlanes => sequential_planes(cube, rings, settings),
    }
}

fn sequential_planes(cube: &Cube, rings: &RingGeometry, settings: &AirySettings) -> Result<AiryFitResult> {
    let planes = cube.planes();
    let lambda = settings.wavelength_um;
    let quarter = lambda / 4.0;
    let seed = seed_params(cube, rings, settings)?;
    debug!(b = seed.b, gap = seed.gap, center_x = seed.cx, center_y = seed.cy, "Airy seed");

    // Plane 0: everything free inside a box around the seed.
    let signal = cube.signal_mask();
    let samples = PlaneSamples::from_cube(cube, 0, &signal, lambda);
    if samples.values.is_empty() {
        return Err(FabryError::Fit("plane 0 has no finite pixels with signal".into()));
    }
    let mut bounds = Bounds::unbounded(N_PARAMS);
    bounds.set(B, seed.b * (1.0 - AIRY_B_RELATIVE_BOUND), seed.b * (1.0 + AIRY_B_RELATIVE_BOUND));
    bounds.set(CX, seed.cx - AIRY_CENTER_BOUND_PX, seed.cx + AIRY_CENTER_BOUND_PX);
    bounds.set(CY, seed.cy - AIRY_CENTER_BOUND_PX, seed.cy + AIRY_CENTER_BOUND_PX);
    bounds.set(
        FINESSE,
        seed.finesse * (1.0 - AIRY_FINESSE_RELATIVE_BOUND),
        seed.finesse * (1.0 + AIRY_FINESSE_RELATIVE_BOUND),
    );
    bounds.set(GAP, seed.gap - quarter, seed.gap + quarter);
    let first = fit_plane(Arc::new(samples), &seed, &bounds, settings)
        .ok_or_else(|| FabryError::Fit("plane 0 did not converge".into()))?;

    let mut per_plane = vec![first; planes];
    let mut converged = vec![true; planes];
    if planes == 1 {
        return Ok(AiryFitResult::new(per_plane, converged, 0.0, lambda));
    }

    let window = |center: f64| locked_bounds(&first, center - quarter, center + quarter);
    let fit_at = |plane: usize, start: &AiryParams, bounds: &Bounds| {
        fit_plane(
            Arc::new(PlaneSamples::from_cube(cube, plane, &signal, lambda)),
            start,
            bounds,
            settings,
        )
    };

    // Plane 1 gives the direction, then the middle plane is fitted around the propagated gap.
    let mid = planes / 2;
    let predicted = if mid > 1 {
        match fit_at(1, &first, &window(first.gap)) {
            Some(next) => first.gap + mid as f64 * (next.gap - first.gap),
            None => first.gap,
        }
    } else {
        first.gap
    };
    let middle_start = AiryParams { gap: predicted, ..first };
    let middle = match fit_at(mid, &middle_start, &window(predicted)) {
        Some(p) => p,
        None => {
            warn!(plane = mid, "Middle plane did not converge; keeping plane 0 parameters");
            converged[mid] = false;
            first
        }
    };
    per_plane[mid] = middle;
    let channel_gap = (middle.gap - first.gap) / mid as f64;

    // Remaining planes in order, each inside a monotone window.
    let reach = AIRY_GAP_STEP_WINDOW * channel_gap.abs();
    for plane in (1..planes).filter(|&k| k != mid) {
        let previous = per_plane[plane - 1];
        let (mut lo, mut hi) = if channel_gap >= 0.0 {
            (previous.gap, previous.gap + reach)
        } else {
            (previous.gap - reach, previous.gap)
        };
        if plane < mid {
            if channel_gap >= 0.0 {
                hi = hi.min(middle.gap).max(lo);
            } else {
                lo = lo.max(middle.gap).min(hi);
            }
        }
        let start = AiryParams {
            gap: (previous.gap + channel_gap).clamp(lo, hi),
            ..previous
        };
        match fit_at(plane, &start, &locked_bounds(&first, lo, hi)) {
            Some(p) => per_plane[plane] = p,
            None => {
                warn!(plane, "Airy fit did not converge; keeping previous plane parameters");
                per_plane[plane] = previous;
                converged[plane] = false;
            }
        }
    }

    let result = AiryFitResult::new(per_plane, converged, channel_gap, lambda);
    info!(
        planes,
        b = first.b,
        finesse = first.finesse,
        center_x = first.cx,
        center_y = first.cy,
        gap0 = first.gap,
        channel_gap,
        "Airy fit complete"
    );
    Ok(result)
}
