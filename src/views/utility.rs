/// Computes the arithmetic mean of a slice of values. Returns `None` for empty input.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Rounds to `decimals` places, ties to even.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round_ties_even() / factor
}

/// `value` as a percentage of `capacity`, rounded to two decimals.
/// Stations without docks report 0.
pub fn pct_of_capacity(value: f64, capacity: u32) -> f64 {
    if capacity == 0 {
        return 0.0;
    }
    round_to(value / f64::from(capacity) * 100.0, 2)
}

/// Absolute differences between consecutive readings. A pair with a missing
/// reading on either side has no delta.
pub fn abs_deltas(readings: &[Option<i64>]) -> Vec<f64> {
    readings
        .windows(2)
        .filter_map(|pair| match (pair[0], pair[1]) {
            (Some(prev), Some(next)) => Some((next - prev).abs() as f64),
            _ => None,
        })
        .collect()
}
