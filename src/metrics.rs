//! Common statistics helpers shared by the scorers.

/// Converts a count to f64 for ratio calculations.
///
/// Counts of calls, runs and shifts stay far below 2^52, so the
/// conversion is exact in practice.
#[inline]
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub(crate) fn count_as_f64(count: usize) -> f64 {
    count as f64
}

/// Returns `numerator / denominator`, or 0.0 for an empty denominator.
#[inline]
#[must_use]
pub fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        count_as_f64(numerator) / count_as_f64(denominator)
    }
}

/// Computes mean of values.
#[must_use]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / count_as_f64(values.len())
}

/// Computes the median, averaging the two middle values for even lengths.
///
/// # Examples
///
/// ```
/// use agent_metrics::median;
///
/// assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
/// assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
/// assert_eq!(median(&[]), None);
/// ```
#[must_use]
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Computes the `q`-th percentile (0-100) with linear interpolation
/// between closest ranks.
#[must_use]
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let rank = (q.clamp(0.0, 100.0) / 100.0) * count_as_f64(sorted.len() - 1);
    let lower = rank.floor();
    let upper = rank.ceil();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let (lo, hi) = (lower as usize, upper as usize);
    let weight = rank - lower;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * weight)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_handles_empty_denominator() {
        assert!((ratio(3, 0) - 0.0).abs() < f64::EPSILON);
        assert!((ratio(1, 4) - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn mean_of_values() {
        assert!((mean(&[2.0, 4.0, 6.0]) - 4.0).abs() < f64::EPSILON);
        assert!((mean(&[]) - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn median_odd_and_even() {
        assert_eq!(median(&[5.0]), Some(5.0));
        assert_eq!(median(&[1.0, 9.0, 3.0]), Some(3.0));
        assert_eq!(median(&[1.0, 2.0, 3.0, 10.0]), Some(2.5));
    }

    #[test]
    fn percentile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert!((percentile(&values, 50.0).unwrap() - 3.0).abs() < f64::EPSILON);
        // rank = 0.95 * 4 = 3.8 -> 4 + 0.8 * 1
        assert!((percentile(&values, 95.0).unwrap() - 4.8).abs() < 1e-12);
        assert!((percentile(&values, 100.0).unwrap() - 5.0).abs() < f64::EPSILON);
        assert_eq!(percentile(&[], 95.0), None);
    }

    #[test]
    fn percentile_single_value() {
        assert!((percentile(&[0.2], 95.0).unwrap() - 0.2).abs() < f64::EPSILON);
    }
}
