//! Peak-segment barycenter.
//!
//! The spectrum is rotated so its maximum sits at the middle channel, the
//! half-height region is grown out to the surrounding shoulders, and the
//! photon-weighted centroid of that segment is mapped back to the original
//! channel axis.

/// Spectrum rotated so that its first maximum lands on channel `P / 2`.
pub(crate) struct Centered {
    pub values: Vec<f64>,
    /// `values[i] == spectrum[(i - roll) mod P]`.
    pub roll: usize,
}

pub(crate) fn center_on_peak(spectrum: &[f64]) -> Centered {
    let p = spectrum.len();
    let peak = spectrum
        .iter()
        .enumerate()
        .fold((0usize, f64::NEG_INFINITY), |best, (i, &v)| {
            let v = if v.is_finite() { v } else { 0.0 };
            if v > best.1 {
                (i, v)
            } else {
                best
            }
        })
        .0;
    let roll = (p / 2 + p - peak) % p;
    let values = (0..p)
        .map(|i| {
            let v = spectrum[(i + p - roll) % p];
            if v.is_finite() {
                v
            } else {
                0.0
            }
        })
        .collect();
    Centered { values, roll }
}

/// Map a rotated-frame channel position back into `[0, P)`.
pub(crate) fn unroll(position: f64, roll: usize, planes: usize) -> f64 {
    let period = planes as f64;
    let wrapped = (position - roll as f64).rem_euclid(period);
    if wrapped.is_finite() && wrapped < period {
        wrapped
    } else {
        0.0
    }
}

/// Integer-weighted barycenter of `values[lo..=hi]`, as a rotated-frame channel.
///
/// Returns `None` when the segment carries no signal.
pub(crate) fn segment_barycenter(values: &[f64], lo: usize, hi: usize) -> Option<f64> {
    let (mut num, mut den) = (0.0, 0.0);
    for (k, &w) in values[lo..=hi].iter().enumerate() {
        num += (k + 1) as f64 * w;
        den += w;
    }
    if den > 0.0 {
        Some(lo as f64 - 1.0 + num / den)
    } else {
        None
    }
}

/// Half-height bounds around the middle channel, extended to the shoulders.
pub(crate) fn shoulder_bounds(values: &[f64]) -> (usize, usize) {
    let p = values.len();
    let center = p / 2;
    let half = values[center] / 2.0;

    let mut left = center;
    while left > 0 && values[left - 1] >= half {
        left -= 1;
    }
    let mut right = center;
    while right + 1 < p && values[right + 1] >= half {
        right += 1;
    }

    while left > 0 && values[left - 1] <= values[left] {
        left -= 1;
    }
    while right + 1 < p && values[right + 1] <= values[right] {
        right += 1;
    }
    (left, right)
}

/// Barycenter of the dominant peak of `spectrum`, in `[0, P)`.
pub fn peak_segment_barycenter(spectrum: &[f64]) -> f64 {
    let p = spectrum.len();
    if p == 0 {
        return 0.0;
    }
    let centered = center_on_peak(spectrum);
    if centered.values[p / 2] <= 0.0 {
        return 0.0;
    }
    let (lo, hi) = shoulder_bounds(&centered.values);
    match segment_barycenter(&centered.values, lo, hi) {
        Some(position) => unroll(position, centered.roll, p),
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symmetric_peak_lands_on_its_channel() {
        let s = [0.0, 1.0, 4.0, 1.0, 0.0, 0.0, 0.0, 0.0];
        let b = peak_segment_barycenter(&s);
        assert!((b - 2.0).abs() < 1e-12, "got {b}");
    }

    #[test]
    fn test_peak_wrapping_around_the_scan() {
        // Peak straddles channel 0 / channel 7 equally.
        let s = [4.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 4.0];
        let b = peak_segment_barycenter(&s);
        assert!((b - 7.5).abs() < 1e-12, "got {b}");
    }

    #[test]
    fn test_zero_spectrum_gives_zero() {
        assert_eq!(peak_segment_barycenter(&[0.0; 5]), 0.0);
    }
}
