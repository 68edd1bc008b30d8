//! Synthetic interferogram cubes rendered from a known Airy model.

use std::ops::Range;

use ndarray::{s, Array3, Axis};

use crate::consts::ANGSTROM_TO_MICRON;
use crate::cube::Cube;
use crate::error::{FabryError, Result};
use crate::fit::AiryParams;

/// Default calibration wavelength (Å).
pub const DEFAULT_SYNTH_WAVELENGTH: f64 = 6598.953125;

/// Integer part of the default central order.
const DEFAULT_ORDER: f64 = 786.0;

/// Fractional part of the central order; puts ring 0 a quarter order out.
const DEFAULT_ORDER_FRACTION: f64 = 0.25;

/// Radius of ring 0 in plane 0 as a fraction of the smaller image side.
const DEFAULT_FIRST_RING_FRACTION: f64 = 0.14;

/// Builder for a `(planes, rows, cols)` cube whose plane `k` is the Airy
/// pattern at gap `gap + k * channel_gap`.
#[derive(Clone, Debug)]
pub struct AiryCubeBuilder {
    rows: usize,
    cols: usize,
    planes: usize,
    wavelength_um: f64,
    base: AiryParams,
    channel_gap: f64,
    blanks: Vec<(Range<usize>, Range<usize>)>,
}

impl AiryCubeBuilder {
    /// Centered rings, finesse 15, scan covering exactly one free spectral range.
    pub fn new(rows: usize, cols: usize, planes: usize) -> Self {
        let wavelength_um = DEFAULT_SYNTH_WAVELENGTH * ANGSTROM_TO_MICRON;
        let m0 = DEFAULT_ORDER + DEFAULT_ORDER_FRACTION;
        let first_ring = DEFAULT_FIRST_RING_FRACTION * rows.min(cols).max(1) as f64;
        let b = ((m0 / DEFAULT_ORDER).powi(2) - 1.0).sqrt() / first_ring;
        Self {
            rows,
            cols,
            planes,
            wavelength_um,
            base: AiryParams {
                b,
                cx: (cols as f64 - 1.0) / 2.0,
                cy: (rows as f64 - 1.0) / 2.0,
                continuum: 10.0,
                finesse: 15.0,
                gap: m0 * wavelength_um / 2.0,
                intensity: 1000.0,
            },
            channel_gap: wavelength_um / 2.0 / planes.max(1) as f64,
            blanks: Vec::new(),
        }
    }

    pub fn wavelength_angstrom(mut self, wavelength: f64) -> Self {
        let m0 = 2.0 * self.base.gap / self.wavelength_um;
        let ratio = self.channel_gap / self.wavelength_um;
        self.wavelength_um = wavelength * ANGSTROM_TO_MICRON;
        self.base.gap = m0 * self.wavelength_um / 2.0;
        self.channel_gap = ratio * self.wavelength_um;
        self
    }

    pub fn center(mut self, x: f64, y: f64) -> Self {
        self.base.cx = x;
        self.base.cy = y;
        self
    }

    pub fn b_ratio(mut self, b: f64) -> Self {
        self.base.b = b;
        self
    }

    pub fn finesse(mut self, finesse: f64) -> Self {
        self.base.finesse = finesse;
        self
    }

    pub fn continuum(mut self, continuum: f64) -> Self {
        self.base.continuum = continuum;
        self
    }

    pub fn intensity(mut self, intensity: f64) -> Self {
        self.base.intensity = intensity;
        self
    }

    /// Gap of plane 0 in microns.
    pub fn gap(mut self, gap: f64) -> Self {
        self.base.gap = gap;
        self
    }

    /// Gap as a central order, `2 e / lambda`.
    pub fn central_order(self, order: f64) -> Self {
        let gap = order * self.wavelength_um / 2.0;
        self.gap(gap)
    }

    /// Gap increment per plane in microns; negative for an inward scan.
    pub fn channel_gap(mut self, channel_gap: f64) -> Self {
        self.channel_gap = channel_gap;
        self
    }

    /// Zero every plane inside the rectangle.
    pub fn blank(mut self, rows: Range<usize>, cols: Range<usize>) -> Self {
        self.blanks.push((rows, cols));
        self
    }

    pub fn wavelength_um(&self) -> f64 {
        self.wavelength_um
    }

    pub fn params_for_plane(&self, plane: usize) -> AiryParams {
        AiryParams {
            gap: self.base.gap + plane as f64 * self.channel_gap,
            ..self.base
        }
    }

    /// `2 e / lambda` at the ring axis for `plane`.
    pub fn central_order_of(&self, plane: usize) -> f64 {
        2.0 * self.params_for_plane(plane).gap / self.wavelength_um
    }

    /// Radii of the bright rings of `plane` inside the image half-diagonal.
    pub fn ring_radii(&self, plane: usize) -> Vec<f64> {
        let m0 = self.central_order_of(plane);
        let b = self.base.b;
        let limit = ((self.rows.pow(2) + self.cols.pow(2)) as f64).sqrt() / 2.0;
        let first = if m0.fract() == 0.0 { m0 } else { m0.floor() };
        (0..)
            .map(|k| first - k as f64)
            .take_while(|&m| m > 0.0)
            .map(|m| ((m0 / m).powi(2) - 1.0).max(0.0).sqrt() / b)
            .take_while(|&d| d < limit)
            .collect()
    }

    pub fn build(&self) -> Result<Cube> {
        if self.rows == 0 || self.cols == 0 || self.planes == 0 {
            return Err(FabryError::InvalidCube {
                reason: format!(
                    "synthetic cube needs non-empty axes, got {}x{}x{}",
                    self.planes, self.rows, self.cols
                ),
            });
        }
        let mut data = Array3::<f32>::zeros((self.planes, self.rows, self.cols));
        for (plane, mut view) in data.axis_iter_mut(Axis(0)).enumerate() {
            let model = self
                .params_for_plane(plane)
                .render(self.rows, self.cols, self.wavelength_um);
            view.assign(&model.mapv(|v| v as f32));
        }
        for (rows, cols) in &self.blanks {
            let rows = rows.start.min(self.rows)..rows.end.min(self.rows);
            let cols = cols.start.min(self.cols)..cols.end.min(self.cols);
            data.slice_mut(s![.., rows, cols]).fill(0.0);
        }
        Ok(Cube::new(data)?
            .with_metadata("generator", "airy-synth")
            .with_metadata("planes", self.planes.to_string()))
    }
}
