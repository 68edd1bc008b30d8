use std::collections::HashMap;

use ndarray::Array2;

/// Pixel adjacency used when growing regions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Connectivity {
    Four,
    Eight,
}

/// Statistics for a single connected region.
#[derive(Clone, Debug)]
pub struct Region {
    /// Label carried by the region's pixels in [`Labeling::labels`].
    pub label: u32,
    /// Number of pixels in the region.
    pub area: usize,
    /// Bounding box: (min_row, max_row, min_col, max_col).
    pub bbox: (usize, usize, usize, usize),
    row_sum: f64,
    col_sum: f64,
}

impl Region {
    /// Unweighted center of mass as (row, col).
    pub fn centroid(&self) -> (f64, f64) {
        let n = self.area.max(1) as f64;
        (self.row_sum / n, self.col_sum / n)
    }

    pub fn touches_border(&self, height: usize, width: usize) -> bool {
        let (min_row, max_row, min_col, max_col) = self.bbox;
        min_row == 0 || max_row + 1 >= height || min_col == 0 || max_col + 1 >= width
    }

    /// True when the bounding box covers at least `fraction` of both image axes.
    pub fn spans(&self, height: usize, width: usize, fraction: f64) -> bool {
        let (min_row, max_row, min_col, max_col) = self.bbox;
        let rows = (max_row - min_row + 1) as f64;
        let cols = (max_col - min_col + 1) as f64;
        rows >= fraction * height as f64 && cols >= fraction * width as f64
    }
}

/// Region labels plus per-region statistics, largest region first.
#[derive(Clone, Debug)]
pub struct Labeling {
    /// 0 for background, otherwise the region label.
    pub labels: Array2<u32>,
    pub regions: Vec<Region>,
}

/// Two-pass connected-component labeling with union-find.
pub fn label_regions(mask: &Array2<bool>, connectivity: Connectivity) -> Labeling {
    let (h, w) = mask.dim();
    let mut labels = Array2::<u32>::zeros((h, w));
    if h == 0 || w == 0 {
        return Labeling {
            labels,
            regions: Vec::new(),
        };
    }

    // Index 0 unused; labels start at 1.
    let mut parent: Vec<u32> = vec![0];

    // Pass 1: provisional labels from already-visited neighbors.
    for row in 0..h {
        for col in 0..w {
            if !mask[[row, col]] {
                continue;
            }

            let mut neighbors = [0u32; 4];
            if row > 0 {
                neighbors[0] = labels[[row - 1, col]];
                if connectivity == Connectivity::Eight {
                    if col > 0 {
                        neighbors[1] = labels[[row - 1, col - 1]];
                    }
                    if col + 1 < w {
                        neighbors[2] = labels[[row - 1, col + 1]];
                    }
                }
            }
            if col > 0 {
                neighbors[3] = labels[[row, col - 1]];
            }

            let smallest = neighbors.iter().copied().filter(|&l| l > 0).min();
            match smallest {
                None => {
                    let next = parent.len() as u32;
                    parent.push(next);
                    labels[[row, col]] = next;
                }
                Some(smallest) => {
                    labels[[row, col]] = smallest;
                    for &other in neighbors.iter().filter(|&&l| l > 0 && l != smallest) {
                        union(&mut parent, smallest, other);
                    }
                }
            }
        }
    }

    for i in 1..parent.len() {
        parent[i] = find(&parent, i as u32);
    }

    // Pass 2: resolve labels and collect stats.
    let mut stats = HashMap::<u32, Region>::new();
    for row in 0..h {
        for col in 0..w {
            let lbl = labels[[row, col]];
            if lbl == 0 {
                continue;
            }
            let root = parent[lbl as usize];
            labels[[row, col]] = root;

            let entry = stats.entry(root).or_insert(Region {
                label: root,
                area: 0,
                bbox: (row, row, col, col),
                row_sum: 0.0,
                col_sum: 0.0,
            });
            entry.area += 1;
            entry.bbox.0 = entry.bbox.0.min(row);
            entry.bbox.1 = entry.bbox.1.max(row);
            entry.bbox.2 = entry.bbox.2.min(col);
            entry.bbox.3 = entry.bbox.3.max(col);
            entry.row_sum += row as f64;
            entry.col_sum += col as f64;
        }
    }

    let mut regions: Vec<Region> = stats.into_values().collect();
    regions.sort_unstable_by(|a, b| b.area.cmp(&a.area).then(a.label.cmp(&b.label)));
    Labeling { labels, regions }
}

fn find(parent: &[u32], mut x: u32) -> u32 {
    while parent[x as usize] != x {
        x = parent[x as usize];
    }
    x
}

fn union(parent: &mut [u32], a: u32, b: u32) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra != rb {
        // Merge the larger root into the smaller one so labels stay ordered.
        let (small, big) = if ra < rb { (ra, rb) } else { (rb, ra) };
        parent[big as usize] = small;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagonal_pixels_join_only_with_eight_connectivity() {
        let mut mask = Array2::from_elem((4, 4), false);
        mask[[0, 0]] = true;
        mask[[1, 1]] = true;
        mask[[2, 2]] = true;

        assert_eq!(label_regions(&mask, Connectivity::Four).regions.len(), 3);
        let eight = label_regions(&mask, Connectivity::Eight);
        assert_eq!(eight.regions.len(), 1);
        assert_eq!(eight.regions[0].area, 3);
        assert_eq!(eight.regions[0].bbox, (0, 2, 0, 2));
    }

    #[test]
    fn test_u_shape_merges_into_one_region() {
        // Two arms that only meet on the bottom row.
        let mut mask = Array2::from_elem((5, 5), false);
        for row in 0..5 {
            mask[[row, 0]] = true;
            mask[[row, 4]] = true;
        }
        for col in 0..5 {
            mask[[4, col]] = true;
        }
        let labeling = label_regions(&mask, Connectivity::Four);
        assert_eq!(labeling.regions.len(), 1);
        let label = labeling.regions[0].label;
        assert!(labeling.labels[[0, 0]] == label && labeling.labels[[0, 4]] == label);
    }

    #[test]
    fn test_centroid_and_border() {
        let mut mask = Array2::from_elem((6, 6), false);
        for row in 2..4 {
            for col in 1..5 {
                mask[[row, col]] = true;
            }
        }
        let labeling = label_regions(&mask, Connectivity::Four);
        let region = &labeling.regions[0];
        assert_eq!(region.centroid(), (2.5, 2.5));
        assert!(!region.touches_border(6, 6));
        assert!(region.spans(6, 6, 0.25));
    }
}
