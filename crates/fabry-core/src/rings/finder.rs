use std::collections::{HashMap, HashSet};

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::consts::{
    RING_ARC_MAX_SPREAD, RING_ARC_SPREAD_OF_SPACING, RING_MERGE_FRACTION_OF_SPACING, RING_MERGE_RELATIVE,
    RING_MIN_REGION_FRACTION, RING_MIN_SPAN_FRACTION,
};
use crate::cube::{Cube, Map2};
use crate::error::{FabryError, Result};
use crate::hash::{ContentHash, ContentHasher};
use crate::pixels::{distance, map_pixels};
use crate::rings::regions::{label_regions, Connectivity, Labeling, Region};
use crate::stats::percentile;

/// Pixels judged to lie on one ring.
pub type RingMask = Map2<u8>;

/// Implementations available for the ring center finder slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RingCenterFinder {
    /// Gradient edges, inter-ring regions, then ring components.
    #[default]
    EdgeRegions,
}

impl RingCenterFinder {
    pub fn name(&self) -> &'static str {
        match self {
            Self::EdgeRegions => "edge-regions",
        }
    }
}

/// Fractional pixel position of the optical axis.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RingCenter {
    /// Column.
    pub x: f64,
    /// Row.
    pub y: f64,
}

impl RingCenter {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Nearest pixel as `(row, col)` when the center lies inside an `(h, w)` image.
    pub fn pixel(&self, h: usize, w: usize) -> Option<(usize, usize)> {
        let row = self.y.round();
        let col = self.x.round();
        if !row.is_finite() || !col.is_finite() || row < 0.0 || col < 0.0 {
            return None;
        }
        let (row, col) = (row as usize, col as usize);
        (row < h && col < w).then_some((row, col))
    }

    pub fn distance_to(&self, other: &RingCenter) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

impl std::fmt::Display for RingCenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(x={:.2}, y={:.2})", self.x, self.y)
    }
}

/// Center, strictly increasing radii and the matching ring masks (ring 0 innermost).
#[derive(Clone, Debug)]
pub struct RingGeometry {
    pub center: RingCenter,
    pub radii: Vec<f64>,
    pub masks: Vec<RingMask>,
    /// Mean plane value over all ring pixels.
    pub mean_intensity: f64,
    /// No interior ring was found and the image center stands in.
    pub center_fallback: bool,
    hash: ContentHash,
}

impl RingGeometry {
    pub fn new(
        center: RingCenter,
        radii: Vec<f64>,
        masks: Vec<RingMask>,
        mean_intensity: f64,
        center_fallback: bool,
    ) -> Self {
        let mut hasher = ContentHasher::new();
        hasher
            .tag("rings")
            .f64(center.x)
            .f64(center.y)
            .usize(radii.len());
        for r in &radii {
            hasher.f64(*r);
        }
        for m in &masks {
            hasher.hash(&m.hash());
        }
        hasher.f64(mean_intensity).bool(center_fallback);
        Self {
            center,
            radii,
            masks,
            mean_intensity,
            center_fallback,
            hash: hasher.finish(),
        }
    }

    pub fn ring_count(&self) -> usize {
        self.radii.len()
    }

    pub fn hash(&self) -> ContentHash {
        self.hash
    }
}

/// Locate the concentric rings of one cube plane.
///
/// Pixels without signal (summed spectrum zero or non-finite) and non-finite
/// plane values take no part in the edge map or in region growing.
pub fn find_rings(
    cube: &Cube,
    finder: RingCenterFinder,
    plane: usize,
    percentile_threshold: u8,
) -> Result<RingGeometry> {
    if plane >= cube.planes() {
        return Err(FabryError::InvalidConfig(format!(
            "ring plane {plane} is out of range for a cube with {} planes",
            cube.planes()
        )));
    }
    if percentile_threshold > 99 {
        return Err(FabryError::InvalidConfig(format!(
            "ring_minimal_percentile must lie in 0..=99, got {percentile_threshold}"
        )));
    }

    let view = cube.plane(plane);
    let mut valid = cube.signal_mask();
    valid.zip_mut_with(&view, |ok, v| *ok &= v.is_finite());
    let image = view.mapv(|v| if v.is_finite() { v as f64 } else { 0.0 });
    match finder {
        RingCenterFinder::EdgeRegions => Ok(edge_regions(&image, &valid, percentile_threshold)),
    }
}

/// A ring piece: one connected component and its distance statistics.
struct Piece {
    label: u32,
    mean: f64,
    spread: f64,
    area: usize,
    interior: bool,
}

fn edge_regions(image: &Array2<f64>, valid: &Array2<bool>, percentile_threshold: u8) -> RingGeometry {
    let (h, w) = image.dim();
    let total = h * w;
    let min_area = ((total as f64) * RING_MIN_REGION_FRACTION).ceil() as usize;
    let image_center = RingCenter::new((w as f64 - 1.0) / 2.0, (h as f64 - 1.0) / 2.0);

    // 1. Edge map from the 8-neighbor gradient over valid pixels.
    let gradient = neighbor_gradient(image, valid);
    let Some(threshold) = percentile(
        gradient
            .iter()
            .zip(valid.iter())
            .filter(|(_, ok)| **ok)
            .map(|(&g, _)| g),
        percentile_threshold as f64,
    ) else {
        warn!("Ring plane has no pixels with signal");
        return RingGeometry::new(image_center, Vec::new(), Vec::new(), 0.0, true);
    };
    let edges = gradient.mapv(|g| g > threshold);

    // 2. Inter-ring regions: large 4-connected components of the valid non-edge pixels.
    let mut calm = valid.clone();
    calm.zip_mut_with(&edges, |c, &e| *c &= !e);
    let gaps = label_regions(&calm, Connectivity::Four);
    let kept: HashSet<u32> = gaps
        .regions
        .iter()
        .filter(|r| r.area >= min_area)
        .map(|r| r.label)
        .collect();
    let mut ring_pixels = gaps.labels.mapv(|l| l == 0 || !kept.contains(&l));
    ring_pixels.zip_mut_with(valid, |r, &ok| *r &= ok);

    // 3. Ring candidates: 8-connected components of everything else. A component
    // cut by the image border or by pixels without signal is clipped.
    let components = label_regions(&ring_pixels, Connectivity::Eight);
    let clipped = clipped_labels(&components, valid);
    let interior: Vec<&Region> = components
        .regions
        .iter()
        .filter(|r| !clipped.contains(&r.label))
        .filter(|r| r.spans(h, w, RING_MIN_SPAN_FRACTION))
        .filter(|r| surrounds_centroid(&components, r))
        .collect();
    debug!(
        threshold,
        gap_regions = kept.len(),
        components = components.regions.len(),
        clipped = clipped.len(),
        interior = interior.len(),
        "Ring candidates"
    );

    let center_fallback = interior.is_empty();
    let center = if center_fallback {
        warn!("No interior ring found; using the image center");
        image_center
    } else {
        let n = interior.len() as f64;
        let (sy, sx) = interior.iter().fold((0.0, 0.0), |(sy, sx), r| {
            let (cy, cx) = r.centroid();
            (sy + cy, sx + cx)
        });
        RingCenter::new(sx / n, sy / n)
    };

    // 4. Distance statistics of interior rings and of large clipped arcs.
    let interior_labels: HashSet<u32> = interior.iter().map(|r| r.label).collect();
    let wanted: HashSet<u32> = components
        .regions
        .iter()
        .filter(|r| interior_labels.contains(&r.label) || (clipped.contains(&r.label) && r.area >= min_area))
        .map(|r| r.label)
        .collect();
    let mut distances: HashMap<u32, Vec<f64>> = HashMap::new();
    for ((row, col), &label) in components.labels.indexed_iter() {
        if wanted.contains(&label) {
            distances
                .entry(label)
                .or_default()
                .push(distance(row, col, center.y, center.x));
        }
    }
    let mut pieces: Vec<Piece> = distances
        .into_iter()
        .map(|(label, ds)| {
            let n = ds.len() as f64;
            let mean = ds.iter().sum::<f64>() / n;
            let spread = (ds.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n).sqrt();
            Piece {
                label,
                mean,
                spread,
                area: ds.len(),
                interior: interior_labels.contains(&label),
            }
        })
        .collect();
    pieces.sort_unstable_by(|a, b| a.mean.total_cmp(&b.mean).then(a.label.cmp(&b.label)));

    // Consecutive radii follow r_{k+1}^2 - r_k^2 ~ constant, so the spacing
    // near radius r is about delta / 2r.
    let interior_radii: Vec<f64> = pieces.iter().filter(|p| p.interior).map(|p| p.mean).collect();
    let delta = match interior_radii.as_slice() {
        [r0, r1, ..] => Some(r1 * r1 - r0 * r0).filter(|d| *d > 0.0),
        _ => None,
    };
    let max_interior_spread = pieces
        .iter()
        .filter(|p| p.interior)
        .map(|p| p.spread)
        .fold(0.0_f64, f64::max);
    let spacing = |r: f64| delta.map(|d| d / (2.0 * r));

    // 5. Keep arcs concentric with the interior rings, then merge pieces of one ring.
    let mut rings: Vec<(f64, usize, Vec<u32>)> = Vec::new();
    for piece in pieces {
        if !piece.interior {
            let limit = match spacing(piece.mean) {
                Some(s) => RING_ARC_SPREAD_OF_SPACING * s,
                None => (RING_ARC_MAX_SPREAD * piece.mean).min(max_interior_spread),
            };
            if piece.spread > limit {
                continue;
            }
        }
        let tolerance = spacing(piece.mean)
            .map(|s| RING_MERGE_FRACTION_OF_SPACING * s)
            .unwrap_or(RING_MERGE_RELATIVE * piece.mean);
        let same_ring = rings.last().is_some_and(|(mean, _, _)| piece.mean - mean < tolerance);
        match rings.last_mut() {
            Some((mean, area, labels)) if same_ring => {
                let total = (*area + piece.area) as f64;
                *mean = (*mean * *area as f64 + piece.mean * piece.area as f64) / total;
                *area += piece.area;
                labels.push(piece.label);
            }
            _ => rings.push((piece.mean, piece.area, vec![piece.label])),
        }
    }

    // 6. Strictly increasing radii inside the half-diagonal.
    let half_diagonal = ((h * h + w * w) as f64).sqrt() / 2.0;
    let mut radii: Vec<f64> = Vec::new();
    let mut ring_labels: Vec<Vec<u32>> = Vec::new();
    for (radius, _, labels) in rings {
        if !(radius > 0.0 && radius < half_diagonal) {
            continue;
        }
        if radii.last().is_some_and(|&last| radius <= last) {
            continue;
        }
        radii.push(radius);
        ring_labels.push(labels);
    }

    let masks: Vec<RingMask> = ring_labels
        .iter()
        .map(|labels| Map2::new(components.labels.mapv(|l| u8::from(labels.contains(&l)))))
        .collect();

    let on_ring: HashSet<u32> = ring_labels.iter().flatten().copied().collect();
    let (sum, count) = components
        .labels
        .indexed_iter()
        .filter(|(_, l)| on_ring.contains(*l))
        .fold((0.0, 0usize), |(s, n), (idx, _)| (s + image[idx], n + 1));
    let mean_intensity = if count > 0 { sum / count as f64 } else { 0.0 };

    info!(
        center = %center,
        rings = radii.len(),
        radii = ?radii,
        "Ring geometry found"
    );
    RingGeometry::new(center, radii, masks, mean_intensity, center_fallback)
}

/// Largest absolute difference to any valid 8-neighbor; zero for invalid pixels.
fn neighbor_gradient(image: &Array2<f64>, valid: &Array2<bool>) -> Array2<f64> {
    let (h, w) = image.dim();
    map_pixels(h, w, |row, col| {
        if !valid[[row, col]] {
            return 0.0;
        }
        let v = image[[row, col]];
        let mut best = 0.0_f64;
        for dy in -1isize..=1 {
            for dx in -1isize..=1 {
                if dy == 0 && dx == 0 {
                    continue;
                }
                let y = row as isize + dy;
                let x = col as isize + dx;
                if y < 0 || x < 0 || y >= h as isize || x >= w as isize {
                    continue;
                }
                let (y, x) = (y as usize, x as usize);
                if valid[[y, x]] {
                    best = best.max((v - image[[y, x]]).abs());
                }
            }
        }
        best
    })
}

/// Labels of components touching the image border or a pixel without signal.
fn clipped_labels(labeling: &Labeling, valid: &Array2<bool>) -> HashSet<u32> {
    let (h, w) = valid.dim();
    let mut clipped = HashSet::new();
    for ((row, col), &label) in labeling.labels.indexed_iter() {
        if label == 0 || clipped.contains(&label) {
            continue;
        }
        let on_border = row == 0 || col == 0 || row + 1 == h || col + 1 == w;
        let near_invalid = !on_border
            && (row - 1..=row + 1).any(|y| (col - 1..=col + 1).any(|x| !valid[[y, x]]));
        if on_border || near_invalid {
            clipped.insert(label);
        }
    }
    clipped
}

/// An annulus leaves its own center of mass empty and is met by all four
/// axis-aligned rays leaving it. Filled blobs and corner arcs are not.
fn surrounds_centroid(labeling: &Labeling, region: &Region) -> bool {
    let labels = &labeling.labels;
    let (h, w) = labels.dim();
    let (cy, cx) = region.centroid();
    let row = (cy.round().max(0.0) as usize).min(h.saturating_sub(1));
    let col = (cx.round().max(0.0) as usize).min(w.saturating_sub(1));
    let l = region.label;
    if labels[[row, col]] == l {
        return false;
    }
    let up = (0..row).any(|y| labels[[y, col]] == l);
    let down = (row + 1..h).any(|y| labels[[y, col]] == l);
    let left = (0..col).any(|x| labels[[row, x]] == l);
    let right = (col + 1..w).any(|x| labels[[row, x]] == l);
    up && down && left && right
}
