//! Statistical reductions over raw measurement samples.
//!
//! Every function here is pure: the same input slice always yields the
//! same value, and the input is never mutated.

/// Arithmetic mean of the samples, or `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Median of the samples, or `None` for an empty slice.
///
/// An even sample count averages the two middle values.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mid = sorted.len() / 2;

    if sorted.len() % 2 == 0 {
        mean(&sorted[mid - 1..=mid])
    } else {
        Some(sorted[mid])
    }
}

/// Weighted mean where sample `i` (1-indexed arrival order) has weight `i`,
/// so later samples count more heavily. `None` for an empty slice.
pub fn weighted_mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let weighted_sum: f64 = values
        .iter()
        .enumerate()
        .map(|(index, value)| value * (index + 1) as f64)
        .sum();
    let weight_sum: f64 = (1..=values.len()).sum::<usize>() as f64;

    Some(weighted_sum / weight_sum)
}
