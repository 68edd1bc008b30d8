use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::consts::{
    FSR_BORDER_MAX_SPACING_FRACTION, FSR_BORDER_SPACING_FRACTION, FSR_MIN_BORDER_THICKNESS,
    RING_DEDUP_RELATIVE,
};
use crate::cube::{OrderMap, PlaneMap};
use crate::error::{FabryError, Result};
use crate::pixels::{distance, map_pixels};
use crate::rings::RingCenter;

/// Implementations available for the FSR mapper slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FsrMapper {
    /// Ring intervals, with the wrapped phase deciding inside each border band.
    #[default]
    NearestBorder,
}

impl FsrMapper {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NearestBorder => "nearest-border",
        }
    }
}

/// Direction in which rings move as the étalon gap is scanned.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanDirection {
    /// Gap increases; orders grow away from the axis.
    #[default]
    Outward,
    /// Gap decreases; orders shrink away from the axis.
    Inward,
}

impl std::fmt::Display for ScanDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Outward => write!(f, "outward"),
            Self::Inward => write!(f, "inward"),
        }
    }
}

/// Parameters of the order map.
#[derive(Clone, Debug)]
pub struct OrderMapSettings {
    pub mapper: FsrMapper,
    pub direction: ScanDirection,
    /// Half-thickness of the border band; derived from the ring spacing when absent.
    pub border_thickness: Option<f64>,
    /// Phase period (number of planes).
    pub period: f64,
}

/// Sorted radii with neighbors closer than 10% merged into the smaller one.
pub fn dedup_radii(radii: impl IntoIterator<Item = f64>) -> Vec<f64> {
    let mut sorted: Vec<f64> = radii.into_iter().filter(|r| r.is_finite() && *r > 0.0).collect();
    sorted.sort_unstable_by(|a, b| a.total_cmp(b));
    let mut unique: Vec<f64> = Vec::with_capacity(sorted.len());
    for r in sorted {
        match unique.last() {
            Some(&last) if r <= last * (1.0 + RING_DEDUP_RELATIVE) => {}
            _ => unique.push(r),
        }
    }
    unique
}

/// Default band half-thickness: `max(10, 25% of the smallest spacing)`, kept
/// below 45% of the smallest spacing (the innermost radius counts as one).
pub fn border_thickness(radii: &[f64]) -> f64 {
    let Some(&first) = radii.first() else {
        return FSR_MIN_BORDER_THICKNESS;
    };
    let inter = radii
        .windows(2)
        .map(|w| w[1] - w[0])
        .fold(f64::INFINITY, f64::min);
    let nominal = if inter.is_finite() {
        FSR_MIN_BORDER_THICKNESS.max(FSR_BORDER_SPACING_FRACTION * inter)
    } else {
        FSR_MIN_BORDER_THICKNESS
    };
    nominal.min(FSR_BORDER_MAX_SPACING_FRACTION * inter.min(first))
}

/// Integer interference order per pixel, counted from the ring axis.
///
/// `radii` complements the radii recovered from the non-zero values of `border`.
/// Without any ring the map is all zeros.
pub fn order_map(
    wrapped: &PlaneMap,
    border: &PlaneMap,
    center: RingCenter,
    radii: &[f64],
    settings: &OrderMapSettings,
) -> Result<OrderMap> {
    let (h, w) = wrapped.dim();
    if border.dim() != (h, w) {
        return Err(FabryError::DimensionMismatch {
            expected: (h, w),
            found: border.dim(),
        });
    }

    let rings = dedup_radii(
        border
            .array()
            .iter()
            .copied()
            .chain(radii.iter().copied()),
    );
    if rings.is_empty() {
        warn!("No ring radii available; order map is all zeros");
        return Ok(OrderMap::new(ndarray::Array2::zeros((h, w))));
    }

    let thickness = settings.border_thickness.unwrap_or_else(|| border_thickness(&rings));
    let total = rings.len() as u32;
    let half = settings.period / 2.0;
    let phase = wrapped.array();

    let map = match settings.mapper {
        FsrMapper::NearestBorder => map_pixels(h, w, |row, col| {
            let d = distance(row, col, center.y, center.x);
            let v = phase[[row, col]];
            let v = if v.is_finite() { v } else { 0.0 };

            let (nearest, gap) = rings
                .iter()
                .enumerate()
                .map(|(j, r)| (j, (d - r).abs()))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .unwrap_or((0, f64::INFINITY));

            // Rings crossed between the axis and this pixel.
            let crossed = if gap <= thickness {
                let outer_side = match settings.direction {
                    ScanDirection::Outward => v <= half,
                    ScanDirection::Inward => v > half,
                };
                nearest as u32 + u32::from(outer_side)
            } else {
                rings.iter().take_while(|&&r| r <= d).count() as u32
            };
            match settings.direction {
                ScanDirection::Outward => crossed,
                ScanDirection::Inward => total - crossed,
            }
        }),
    };

    let order = OrderMap::new(map);
    info!(
        rings = rings.len(),
        thickness,
        direction = %settings.direction,
        max_order = order.max_order(),
        "Order map computed"
    );
    Ok(order)
}
