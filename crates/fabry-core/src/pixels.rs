use ndarray::Array2;
use rayon::prelude::*;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;

/// Build an `(h, w)` map by evaluating `f(row, col)` at every pixel.
///
/// Rows are spread over the Rayon pool for images >= 256x256.
pub fn map_pixels<T, F>(h: usize, w: usize, f: F) -> Array2<T>
where
    T: Copy + Default + Send,
    F: Fn(usize, usize) -> T + Sync,
{
    if h * w >= PARALLEL_PIXEL_THRESHOLD {
        let rows: Vec<Vec<T>> = (0..h)
            .into_par_iter()
            .map(|row| (0..w).map(|col| f(row, col)).collect())
            .collect();
        let flat: Vec<T> = rows.into_iter().flatten().collect();
        Array2::from_shape_vec((h, w), flat).unwrap_or_else(|_| Array2::default((h, w)))
    } else {
        Array2::from_shape_fn((h, w), |(row, col)| f(row, col))
    }
}

/// Euclidean distance from `(row, col)` to a fractional center `(cy, cx)`.
#[inline]
pub fn distance(row: usize, col: usize, cy: f64, cx: f64) -> f64 {
    let dy = row as f64 - cy;
    let dx = col as f64 - cx;
    (dy * dy + dx * dx).sqrt()
}
