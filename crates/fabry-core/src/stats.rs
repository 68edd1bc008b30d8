//! Order statistics shared by the stages.

/// Linear-interpolated percentile (`p` in 0..=100) of `values`, sorting in place.
///
/// Matches the usual "linear" definition: position `p/100 * (n-1)` in the
/// sorted data, interpolated between its neighbours. Non-finite values sort
/// last. Returns `None` for an empty slice.
pub fn percentile_mut(values: &mut [f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable_by(|a, b| a.total_cmp(b));
    Some(percentile_sorted(values, p))
}

/// Percentile of already-sorted data.
pub fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let pos = (p.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(n - 1);
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Percentile of any iterator, copying into a scratch buffer.
pub fn percentile<I>(values: I, p: f64) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    let mut buf: Vec<f64> = values.into_iter().collect();
    percentile_mut(&mut buf, p)
}

/// The value of the first integer percentile in 1..=99 that is strictly positive.
///
/// Returns `0.0` when every percentile is zero or negative.
pub fn smallest_nonnull_percentile<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let mut sorted: Vec<f64> = values.into_iter().collect();
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.sort_unstable_by(|a, b| a.total_cmp(b));
    (1..=99)
        .map(|p| percentile_sorted(&sorted, p as f64))
        .find(|&v| v > 0.0)
        .unwrap_or(0.0)
}

/// Median of `values`, mean of the two central values for an even count.
pub fn median_mut(values: &mut [f64]) -> Option<f64> {
    let n = values.len();
    if n == 0 {
        return None;
    }
    values.sort_unstable_by(|a, b| a.total_cmp(b));
    if n % 2 == 1 {
        Some(values[n / 2])
    } else {
        Some((values[n / 2 - 1] + values[n / 2]) / 2.0)
    }
}
