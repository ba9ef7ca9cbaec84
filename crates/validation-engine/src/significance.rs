//! Parametric and resampling significance tests, plus multiple-comparison
//! corrections for simultaneously tested strategies.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::models::{
    BootstrapCiResult, HypothesisOutcome, MultipleTestOutcome, SharpeTestResult,
    StrategyTestRecord,
};
use crate::overfitting::OverfittingDetector;
use crate::stats;

/// Sharpe-ratio t-test with a Jobson-Korkie style standard error.
///
/// `returns` are per-period (not annualized); `risk_free_rate` is annual and
/// de-annualized by `periods_per_year`. Fewer than 3 observations yield NaN
/// statistics and an insignificant verdict.
pub fn sharpe_ratio_test(
    returns: &[f64],
    risk_free_rate: f64,
    periods_per_year: f64,
) -> SharpeTestResult {
    let n = returns.len();
    if n < 3 {
        return SharpeTestResult {
            sharpe: f64::NAN,
            annualized_sharpe: f64::NAN,
            t_statistic: f64::NAN,
            p_value: f64::NAN,
            confidence_interval: (f64::NAN, f64::NAN),
            is_significant: false,
        };
    }

    let per_period_rf = risk_free_rate / periods_per_year;
    let excess: Vec<f64> = returns.iter().map(|r| r - per_period_rf).collect();
    let sharpe = stats::mean(&excess) / (stats::std_dev(&excess) + stats::EPS);
    let annualized_sharpe = sharpe * periods_per_year.sqrt();

    // SE(SR) = sqrt((1 + SR^2/2) / n)
    let se = ((1.0 + 0.5 * sharpe * sharpe) / n as f64).sqrt();
    let t_statistic = sharpe / se;

    let t_dist = StudentsT::new(0.0, 1.0, (n - 1) as f64)
        .expect("degrees of freedom >= 2");
    let p_value = 2.0 * (1.0 - t_dist.cdf(t_statistic.abs()));
    let t_crit = t_dist.inverse_cdf(0.975);
    let scale = periods_per_year.sqrt();
    let confidence_interval = (
        (sharpe - t_crit * se) * scale,
        (sharpe + t_crit * se) * scale,
    );

    SharpeTestResult {
        sharpe,
        annualized_sharpe,
        t_statistic,
        p_value,
        confidence_interval,
        is_significant: p_value < 0.05,
    }
}

/// Percentile bootstrap CI for an arbitrary metric, with bias correction.
///
/// Each resample seeds its own RNG from `seed + resample_index`.
pub fn bootstrap_metric_ci<F>(
    values: &[f64],
    metric: F,
    n_bootstrap: usize,
    alpha: f64,
    seed: u64,
) -> BootstrapCiResult
where
    F: Fn(&[f64]) -> f64 + Sync,
{
    let original = metric(values);
    let n = values.len();

    let dist: Vec<f64> = if n == 0 {
        Vec::new()
    } else {
        (0..n_bootstrap)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
                let resample: Vec<f64> = (0..n).map(|_| values[rng.gen_range(0..n)]).collect();
                metric(&resample)
            })
            .collect()
    };

    let bootstrap_mean = stats::mean(&dist);
    let bias = bootstrap_mean - original;

    let mut sorted = dist;
    stats::sort_unstable_by_value(&mut sorted);
    let confidence_interval = (
        stats::percentile_sorted(&sorted, alpha / 2.0 * 100.0),
        stats::percentile_sorted(&sorted, (1.0 - alpha / 2.0) * 100.0),
    );

    BootstrapCiResult {
        original,
        bootstrap_mean,
        bias,
        bias_corrected: original - bias,
        confidence_interval,
        n_bootstrap,
    }
}

/// Bonferroni correction: each hypothesis is tested at `alpha / n_tests`;
/// adjusted p-values are `min(p * n_tests, 1)`.
pub fn bonferroni(p_values: &[f64], alpha: f64) -> MultipleTestOutcome {
    let n = p_values.len().max(1) as f64;
    let corrected_alpha = alpha / n;

    let outcomes = p_values
        .iter()
        .enumerate()
        .map(|(index, &p)| HypothesisOutcome {
            index,
            p_value: p,
            adjusted_p_value: (p * n).min(1.0),
            is_significant: p < corrected_alpha,
        })
        .collect();

    MultipleTestOutcome {
        outcomes,
        threshold: corrected_alpha,
    }
}

/// Benjamini-Hochberg false-discovery-rate procedure.
///
/// Sorts p-values ascending, finds the largest rank `k` with
/// `p[k] <= (k/n) * q`, and rejects every hypothesis at rank <= k. Adjusted
/// p-values are step-up q-values, monotone by construction. Outcomes are
/// returned in the caller's original order.
pub fn benjamini_hochberg(p_values: &[f64], q: f64) -> MultipleTestOutcome {
    let n = p_values.len();
    if n == 0 {
        return MultipleTestOutcome {
            outcomes: Vec::new(),
            threshold: q,
        };
    }

    let mut ranked: Vec<(usize, f64)> = p_values.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    // Scan from rank 1, recording the last rank satisfying the inequality.
    let mut last_significant_rank = 0usize;
    for (rank0, &(_, p)) in ranked.iter().enumerate() {
        let rank = rank0 + 1;
        if p <= (rank as f64 / n as f64) * q {
            last_significant_rank = rank;
        }
    }

    // q-value at rank k = min over ranks >= k of p * n / rank.
    let mut q_values = vec![0.0f64; n];
    let mut running_min = f64::INFINITY;
    for rank0 in (0..n).rev() {
        let rank = rank0 + 1;
        let candidate = (ranked[rank0].1 * n as f64 / rank as f64).min(1.0);
        running_min = running_min.min(candidate);
        q_values[rank0] = running_min;
    }

    let mut outcomes = vec![
        HypothesisOutcome {
            index: 0,
            p_value: 0.0,
            adjusted_p_value: 0.0,
            is_significant: false,
        };
        n
    ];
    for (rank0, &(original_index, p)) in ranked.iter().enumerate() {
        outcomes[original_index] = HypothesisOutcome {
            index: original_index,
            p_value: p,
            adjusted_p_value: q_values[rank0],
            is_significant: rank0 + 1 <= last_significant_rank,
        };
    }

    MultipleTestOutcome {
        outcomes,
        threshold: q,
    }
}

/// Permutation-test each strategy against one shared benchmark, then correct
/// the whole batch of p-values with both Bonferroni and Benjamini-Hochberg.
pub fn multi_strategy_test(
    strategies: &[(String, Vec<f64>)],
    benchmark_returns: &[f64],
    detector: &OverfittingDetector,
    alpha: f64,
    q: f64,
) -> Vec<StrategyTestRecord> {
    let per_strategy: Vec<(f64, f64)> = strategies
        .iter()
        .map(|(_, returns)| {
            let result = detector.permutation_test(returns, benchmark_returns);
            (result.test_statistic, result.p_value)
        })
        .collect();

    let p_values: Vec<f64> = per_strategy.iter().map(|&(_, p)| p).collect();
    let bonferroni_batch = bonferroni(&p_values, alpha);
    let fdr_batch = benjamini_hochberg(&p_values, q);

    strategies
        .iter()
        .zip(per_strategy)
        .enumerate()
        .map(|(i, ((name, _), (statistic, p_value)))| StrategyTestRecord {
            name: name.clone(),
            statistic,
            p_value,
            bonferroni: bonferroni_batch.outcomes[i].clone(),
            fdr: fdr_batch.outcomes[i].clone(),
        })
        .collect()
}

// --- Selection-bias diagnostics ---

/// Deflated Sharpe ratio: the observed Sharpe expressed as a z-score against
/// the expected maximum Sharpe of `num_trials` skill-free strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeflatedSharpeResult {
    pub deflated_sharpe: f64,
    pub observed_sharpe: f64,
    pub expected_max_sharpe_null: f64,
    pub std_max_sharpe_null: f64,
    pub num_trials: usize,
    pub num_observations: usize,
    pub p_value: f64,
}

/// Deflate an observed Sharpe for multiple-testing selection bias.
///
/// When the best of `num_trials` parameter combinations is reported, its
/// Sharpe is inflated; under the null, E[max SR] ~ sqrt(2 ln N) with variance
/// 1 / (2 ln N). Skewness and excess kurtosis adjust the standard error of
/// the observed Sharpe (pass 0.0 for both if unknown).
pub fn deflated_sharpe_ratio(
    observed_sharpe: f64,
    num_trials: usize,
    num_observations: usize,
    skewness: f64,
    kurtosis: f64,
) -> DeflatedSharpeResult {
    let n = num_trials as f64;
    let t = num_observations as f64;

    if num_trials < 2 || num_observations < 3 {
        return DeflatedSharpeResult {
            deflated_sharpe: observed_sharpe,
            observed_sharpe,
            expected_max_sharpe_null: 0.0,
            std_max_sharpe_null: 1.0,
            num_trials,
            num_observations,
            p_value: 1.0,
        };
    }

    let expected_max = (2.0 * n.ln()).sqrt();
    let std_max = (1.0 / (2.0 * n.ln())).sqrt();

    let sr2 = observed_sharpe.powi(2);
    let se_adjustment =
        (1.0 + sr2 / 2.0 - skewness * observed_sharpe + kurtosis * sr2 / 4.0) / t;
    let se = se_adjustment.max(1.0 / t).sqrt();

    let deflated = (observed_sharpe - expected_max) / (std_max + se);
    let p_value = 2.0 * (1.0 - stats::normal_cdf(deflated.abs()));

    DeflatedSharpeResult {
        deflated_sharpe: deflated,
        observed_sharpe,
        expected_max_sharpe_null: expected_max,
        std_max_sharpe_null: std_max,
        num_trials,
        num_observations,
        p_value,
    }
}

/// Minimum backtest length: T_min ~ [(Z_alpha + Z_beta) / SR*]^2 observations
/// to detect `expected_sharpe` at the given confidence and power.
pub fn minimum_backtest_length(
    expected_sharpe: f64,
    confidence_level: f64,
    power: f64,
) -> usize {
    if expected_sharpe.abs() < 0.01 {
        return 10_000;
    }

    let z_alpha = stats::inverse_normal_cdf(1.0 - (1.0 - confidence_level) / 2.0);
    let z_beta = stats::inverse_normal_cdf(power);
    let t_min = ((z_alpha + z_beta) / expected_sharpe).powi(2);
    t_min.ceil() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sharpe_test_detects_consistent_edge() {
        // Alternating 2% / -1% daily returns: clearly positive mean.
        let returns: Vec<f64> = (0..252)
            .map(|i| if i % 2 == 0 { 0.02 } else { -0.01 })
            .collect();
        let result = sharpe_ratio_test(&returns, 0.0, 252.0);

        assert!(result.sharpe > 0.0);
        assert!(result.t_statistic > 2.0);
        assert!(result.p_value < 0.05);
        assert!(result.is_significant);
        assert!(result.confidence_interval.0 < result.annualized_sharpe);
        assert!(result.confidence_interval.1 > result.annualized_sharpe);
    }

    #[test]
    fn test_sharpe_test_noise_is_not_significant() {
        // Mean-zero series.
        let returns: Vec<f64> = (0..100)
            .map(|i| if i % 2 == 0 { 0.01 } else { -0.01 })
            .collect();
        let result = sharpe_ratio_test(&returns, 0.0, 252.0);
        assert!(!result.is_significant);
        assert!(result.p_value > 0.5);
    }

    #[test]
    fn test_sharpe_test_degenerate_input() {
        let result = sharpe_ratio_test(&[0.01, 0.02], 0.0, 252.0);
        assert!(result.p_value.is_nan());
        assert!(!result.is_significant);
    }

    #[test]
    fn test_bootstrap_ci_brackets_the_mean() {
        let values: Vec<f64> = (0..200).map(|i| ((i % 10) as f64) / 100.0).collect();
        let result = bootstrap_metric_ci(&values, stats::mean, 2000, 0.05, 17);

        assert!(result.confidence_interval.0 <= result.original);
        assert!(result.confidence_interval.1 >= result.original);
        assert!(result.bias.abs() < 0.01);
        assert_eq!(result.n_bootstrap, 2000);

        // Same seed, same interval.
        let again = bootstrap_metric_ci(&values, stats::mean, 2000, 0.05, 17);
        assert_eq!(result.confidence_interval, again.confidence_interval);
    }

    #[test]
    fn test_bonferroni_arithmetic() {
        let p_values = [0.001, 0.01, 0.03, 0.2];
        let result = bonferroni(&p_values, 0.05);

        assert!((result.threshold - 0.0125).abs() < 1e-12);
        let significant: Vec<f64> = result
            .outcomes
            .iter()
            .filter(|o| o.is_significant)
            .map(|o| o.p_value)
            .collect();
        assert_eq!(significant, vec![0.001, 0.01]);
        assert!((result.outcomes[0].adjusted_p_value - 0.004).abs() < 1e-12);
        assert!((result.outcomes[3].adjusted_p_value - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_benjamini_hochberg_textbook_vector() {
        // Benjamini & Hochberg (1995), table of 15 p-values, q = 0.05:
        // exactly the 4 smallest are rejected.
        let p_values = [
            0.0001, 0.0004, 0.0019, 0.0095, 0.0201, 0.0278, 0.0298, 0.0344, 0.0459, 0.3240,
            0.4262, 0.5719, 0.6528, 0.7590, 1.0,
        ];
        let result = benjamini_hochberg(&p_values, 0.05);
        let n_significant = result.outcomes.iter().filter(|o| o.is_significant).count();
        assert_eq!(n_significant, 4);
        // Everything at a rank below the boundary is rejected too.
        for o in &result.outcomes {
            assert_eq!(o.is_significant, o.p_value <= 0.0095);
        }
    }

    #[test]
    fn test_benjamini_hochberg_scan_keeps_all_ranks_below_boundary() {
        let p_values = [0.001, 0.008, 0.039, 0.041, 0.042, 0.06, 0.074, 0.205, 0.212, 0.216];
        let result = benjamini_hochberg(&p_values, 0.05);

        // Thresholds k/10 * 0.05: only ranks 1 and 2 satisfy the inequality.
        assert!(result.outcomes[0].is_significant);
        assert!(result.outcomes[1].is_significant);
        assert_eq!(result.outcomes.iter().filter(|o| o.is_significant).count(), 2);
    }

    #[test]
    fn test_benjamini_hochberg_q_values_are_monotone_in_rank() {
        let p_values = [0.04, 0.001, 0.03, 0.002, 0.2];
        let result = benjamini_hochberg(&p_values, 0.1);

        let mut by_p: Vec<&HypothesisOutcome> = result.outcomes.iter().collect();
        by_p.sort_by(|a, b| a.p_value.partial_cmp(&b.p_value).unwrap());
        for w in by_p.windows(2) {
            assert!(w[0].adjusted_p_value <= w[1].adjusted_p_value);
        }
        // Original order is preserved.
        for (i, o) in result.outcomes.iter().enumerate() {
            assert_eq!(o.index, i);
            assert_eq!(o.p_value, p_values[i]);
        }
    }

    #[test]
    fn test_multi_strategy_joint_test() {
        let detector = OverfittingDetector::new(500, 5);
        let benchmark: Vec<f64> = (0..100).map(|i| ((i % 7) as f64 - 3.0) / 1000.0).collect();
        let strong: Vec<f64> = benchmark.iter().map(|r| r + 0.05).collect();
        let flat = benchmark.clone();

        let strategies = vec![
            ("strong".to_string(), strong),
            ("flat".to_string(), flat),
        ];
        let records = multi_strategy_test(&strategies, &benchmark, &detector, 0.05, 0.05);

        assert_eq!(records.len(), 2);
        assert!(records[0].bonferroni.is_significant);
        assert!(records[0].fdr.is_significant);
        assert!(!records[1].bonferroni.is_significant);
        assert!(!records[1].fdr.is_significant);
        assert!(records[0].statistic > records[1].statistic);
    }

    #[test]
    fn test_deflated_sharpe_penalizes_many_trials() {
        // Best of 100 trials with Sharpe 2.0 over 252 returns: below the
        // null expectation sqrt(2 ln 100) ~ 3.03, so the deflated value is
        // negative.
        let result = deflated_sharpe_ratio(2.0, 100, 252, 0.0, 0.0);
        let expected_max = (2.0 * 100.0_f64.ln()).sqrt();
        assert!((result.expected_max_sharpe_null - expected_max).abs() < 1e-9);
        assert!(result.deflated_sharpe < 0.0);
        assert!(result.p_value < 0.05);
    }

    #[test]
    fn test_minimum_backtest_length_scales_inversely_with_sharpe() {
        let at_one = minimum_backtest_length(1.0, 0.95, 0.80);
        assert!(at_one >= 7 && at_one <= 10);

        let at_half = minimum_backtest_length(0.5, 0.95, 0.80);
        assert!(at_half > at_one * 3);

        assert_eq!(minimum_backtest_length(0.0, 0.95, 0.80), 10_000);
    }
}
