//! Small descriptive statistics helpers for chain summaries.

/// Linear-interpolated quantile of an ascending slice (`q` in `[0, 1]`).
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let q = q.clamp(0.0, 1.0);
    let n = sorted.len() as f64;
    let pos = q * (n - 1.0);
    let i0 = pos.floor() as usize;
    let i1 = pos.ceil() as usize;
    if i0 == i1 {
        return sorted[i0];
    }
    let f = pos - i0 as f64;
    sorted[i0] * (1.0 - f) + sorted[i1] * f
}

/// Percentiles (`0..=100`) of unsorted values.
pub fn percentiles(values: &[f64], percents: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    percents.iter().map(|p| quantile_sorted(&sorted, p / 100.0)).collect()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantiles_interpolate_linearly() {
        let v = [4.0, 1.0, 3.0, 2.0, 5.0];
        let p = percentiles(&v, &[0.0, 25.0, 50.0, 90.0, 100.0]);
        assert_eq!(p[0], 1.0);
        assert_eq!(p[1], 2.0);
        assert_eq!(p[2], 3.0);
        assert!((p[3] - 4.6).abs() < 1e-12);
        assert_eq!(p[4], 5.0);
    }

    #[test]
    fn empty_input_gives_nan() {
        assert!(quantile_sorted(&[], 0.5).is_nan());
        assert!(mean(&[]).is_nan());
    }
}
