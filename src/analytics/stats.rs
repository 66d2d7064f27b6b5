//! Descriptive statistics with zero-instead-of-NaN semantics

/// `numerator / denominator`, or 0 when the denominator is zero or the
/// quotient is not finite
pub fn safe_div(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        return 0.0;
    }
    let q = numerator / denominator;
    if q.is_finite() {
        q
    } else {
        0.0
    }
}

/// Arithmetic mean, 0 for no values.
///
/// Non-finite inputs propagate so callers can reject the data instead of
/// publishing a silent zero.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Median of the values; mean of the two middle values for even counts
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Sample standard deviation, 0 for fewer than two values
pub fn sample_stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let avg = mean(values);
    let sum_sq: f64 = values.iter().map(|v| (v - avg).powi(2)).sum();
    safe_div(sum_sq, (values.len() - 1) as f64).sqrt()
}

pub fn min(values: &[f64]) -> f64 {
    values.iter().copied().reduce(f64::min).unwrap_or(0.0)
}

pub fn max(values: &[f64]) -> f64 {
    values.iter().copied().reduce(f64::max).unwrap_or(0.0)
}

/// Relative change from `previous` to `current`, 0 when `previous` is not positive
pub fn relative_change(current: f64, previous: f64) -> f64 {
    if previous > 0.0 {
        safe_div(current - previous, previous)
    } else {
        0.0
    }
}
