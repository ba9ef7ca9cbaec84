//! Shared statistics helpers for the resampling tests and aggregation.

use statrs::distribution::{ContinuousCDF, Normal};

/// Denominator guard for zero-variance series.
pub const EPS: f64 = 1e-10;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n-1 denominator).
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>()
        / (values.len() as f64 - 1.0);
    var.sqrt()
}

/// Mean over the finite entries only; NaN if none are finite.
pub fn mean_finite(values: &[f64]) -> f64 {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    mean(&finite)
}

/// Sample std over the finite entries only; NaN if fewer than 2 are finite.
pub fn std_dev_finite(values: &[f64]) -> f64 {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    std_dev(&finite)
}

/// Percentile of a pre-sorted slice (nearest-rank on `len - 1`).
pub fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let idx = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

pub fn sort_unstable_by_value(values: &mut [f64]) {
    values.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
}

pub fn normal_cdf(x: f64) -> f64 {
    let normal = Normal::new(0.0, 1.0).unwrap();
    normal.cdf(x)
}

pub fn inverse_normal_cdf(p: f64) -> f64 {
    let normal = Normal::new(0.0, 1.0).unwrap();
    normal.inverse_cdf(p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_std() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert!((mean(&v) - 2.5).abs() < 1e-12);
        // Sample variance of 1..4 is 5/3
        assert!((std_dev(&v) - (5.0_f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_finite_filters_skip_nan() {
        let v = [1.0, f64::NAN, 3.0];
        assert!((mean_finite(&v) - 2.0).abs() < 1e-12);
        assert!(mean(&v).is_nan());
    }

    #[test]
    fn test_percentile_bounds() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile_sorted(&sorted, 0.0), 1.0);
        assert_eq!(percentile_sorted(&sorted, 50.0), 3.0);
        assert_eq!(percentile_sorted(&sorted, 100.0), 5.0);
    }
}
