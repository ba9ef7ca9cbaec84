//! Resampling-based overfitting diagnostics.
//!
//! All tests return a well-formed [`OverfittingResult`]; callers branch on
//! `is_overfitted`, not on errors. Degenerate inputs (fewer than 2
//! observations, zero variance) produce NaN statistics rather than panics.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::models::{OverfittingResult, SensitivityResult, TrainTestGap};
use crate::stats;

/// Alternative hypothesis for the reality-check p-value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alternative {
    TwoSided,
    Greater,
    Less,
}

/// Metric computed on each bootstrap resample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapMetric {
    Mean,
    Sharpe,
    Sortino,
}

impl BootstrapMetric {
    fn compute(&self, returns: &[f64]) -> f64 {
        match self {
            BootstrapMetric::Mean => stats::mean(returns),
            BootstrapMetric::Sharpe => {
                stats::mean(returns) / (stats::std_dev(returns) + stats::EPS)
            }
            BootstrapMetric::Sortino => {
                let downside: Vec<f64> =
                    returns.iter().copied().filter(|&r| r < 0.0).collect();
                let downside_std = if downside.len() < 2 {
                    0.0
                } else {
                    stats::std_dev(&downside)
                };
                stats::mean(returns) / (downside_std + stats::EPS)
            }
        }
    }
}

/// Resampling test battery over one or two return series.
///
/// Each simulation seeds its own `StdRng` from `seed + simulation_index`, so
/// parallel tasks never share RNG state and reruns reproduce exactly.
#[derive(Debug, Clone)]
pub struct OverfittingDetector {
    pub n_simulations: usize,
    pub seed: u64,
}

impl Default for OverfittingDetector {
    fn default() -> Self {
        Self {
            n_simulations: 1000,
            seed: 0,
        }
    }
}

impl OverfittingDetector {
    pub fn new(n_simulations: usize, seed: u64) -> Self {
        Self { n_simulations, seed }
    }

    /// White's reality check: compares `mean / (std + eps)` of the observed
    /// return series against a null distribution built from random
    /// permutations of the series.
    pub fn reality_check(&self, returns: &[f64], alternative: Alternative) -> OverfittingResult {
        let original = stats::mean(returns) / (stats::std_dev(returns) + stats::EPS);

        let null: Vec<f64> = (0..self.n_simulations)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(i as u64));
                let mut shuffled = returns.to_vec();
                shuffled.shuffle(&mut rng);
                stats::mean(&shuffled) / (stats::std_dev(&shuffled) + stats::EPS)
            })
            .collect();

        let exceed = match alternative {
            Alternative::TwoSided => null.iter().filter(|v| v.abs() >= original.abs()).count(),
            Alternative::Greater => null.iter().filter(|&&v| v >= original).count(),
            Alternative::Less => null.iter().filter(|&&v| v <= original).count(),
        };
        let p_value = if null.is_empty() {
            f64::NAN
        } else {
            exceed as f64 / null.len() as f64
        };

        let ci = percentile_interval(null, 2.5, 97.5);

        OverfittingResult {
            method: "reality_check".to_string(),
            test_statistic: original,
            p_value,
            confidence_interval: ci,
            is_overfitted: p_value < 0.05,
        }
    }

    /// Bootstrap sampling distribution of `metric`; the verdict is whether
    /// the observed statistic falls outside the percentile CI.
    pub fn bootstrap_test(
        &self,
        returns: &[f64],
        metric: BootstrapMetric,
        alpha: f64,
    ) -> OverfittingResult {
        let original = metric.compute(returns);
        let n = returns.len();

        let dist: Vec<f64> = (0..self.n_simulations)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(i as u64));
                let resample: Vec<f64> =
                    (0..n).map(|_| returns[rng.gen_range(0..n)]).collect();
                metric.compute(&resample)
            })
            .collect();

        // One-sided tail on the side contradicting the sign of the original.
        let p_value = if dist.is_empty() || !original.is_finite() {
            f64::NAN
        } else if original >= 0.0 {
            dist.iter().filter(|&&v| v <= 0.0).count() as f64 / dist.len() as f64
        } else {
            dist.iter().filter(|&&v| v >= 0.0).count() as f64 / dist.len() as f64
        };

        let (lo, hi) = percentile_interval(dist, alpha / 2.0 * 100.0, (1.0 - alpha / 2.0) * 100.0);

        OverfittingResult {
            method: "bootstrap".to_string(),
            test_statistic: original,
            p_value,
            confidence_interval: (lo, hi),
            is_overfitted: original < lo || original > hi,
        }
    }

    /// Two-sample permutation test of `mean(strategy) - mean(benchmark)`.
    /// Pools both series, reshuffles, and splits back into the original group
    /// sizes to build the null.
    pub fn permutation_test(
        &self,
        strategy_returns: &[f64],
        benchmark_returns: &[f64],
    ) -> OverfittingResult {
        let original = stats::mean(strategy_returns) - stats::mean(benchmark_returns);
        let n_strategy = strategy_returns.len();

        let mut pooled = Vec::with_capacity(n_strategy + benchmark_returns.len());
        pooled.extend_from_slice(strategy_returns);
        pooled.extend_from_slice(benchmark_returns);

        let null: Vec<f64> = (0..self.n_simulations)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(i as u64));
                let mut shuffled = pooled.clone();
                shuffled.shuffle(&mut rng);
                stats::mean(&shuffled[..n_strategy]) - stats::mean(&shuffled[n_strategy..])
            })
            .collect();

        let p_value = if null.is_empty() || !original.is_finite() {
            f64::NAN
        } else {
            null.iter().filter(|v| v.abs() >= original.abs()).count() as f64 / null.len() as f64
        };

        let ci = percentile_interval(null, 2.5, 97.5);

        OverfittingResult {
            method: "permutation".to_string(),
            test_statistic: original,
            p_value,
            confidence_interval: ci,
            is_overfitted: p_value < 0.05,
        }
    }

    /// Dispersion of `metric` across a parameter sweep. High coefficients of
    /// variation mean the edge depends on one lucky parameter corner.
    ///
    /// Returns `None` with fewer than 2 usable values.
    pub fn parameter_sensitivity(
        &self,
        sweep_results: &HashMap<String, HashMap<String, f64>>,
        metric: &str,
    ) -> Option<SensitivityResult> {
        let values: Vec<f64> = sweep_results
            .values()
            .filter_map(|metrics| metrics.get(metric).copied())
            .filter(|v| v.is_finite())
            .collect();
        if values.len() < 2 {
            return None;
        }

        let mean = stats::mean(&values);
        let std = stats::std_dev(&values);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);

        Some(SensitivityResult {
            coefficient_of_variation: std / (mean.abs() + stats::EPS),
            range: max - min,
            max,
            min,
            mean,
        })
    }

    /// Train-vs-test gap per metric present in both maps. Flag thresholds:
    /// sharpe gap > 0.5, total_return gap > 0.1, max_drawdown gap < -0.05.
    pub fn train_test_gap(
        &self,
        train_metrics: &HashMap<String, f64>,
        test_metrics: &HashMap<String, f64>,
    ) -> TrainTestGap {
        let mut gaps = HashMap::new();
        for (name, train_value) in train_metrics {
            if let Some(test_value) = test_metrics.get(name) {
                gaps.insert(name.clone(), train_value - test_value);
            }
        }

        let mut flags = Vec::new();
        if let Some(&gap) = gaps.get("sharpe") {
            if gap > 0.5 {
                flags.push(format!(
                    "sharpe: train significantly better than test (gap {:.3})",
                    gap
                ));
            }
        }
        if let Some(&gap) = gaps.get("total_return") {
            if gap > 0.1 {
                flags.push(format!(
                    "total_return: train significantly better than test (gap {:.3})",
                    gap
                ));
            }
        }
        if let Some(&gap) = gaps.get("max_drawdown") {
            if gap < -0.05 {
                flags.push(format!("max_drawdown: test drawdown worse (gap {:.3})", gap));
            }
        }

        let is_overfitted = !flags.is_empty();
        TrainTestGap {
            gaps,
            flags,
            is_overfitted,
        }
    }
}

/// Sort a distribution and take a two-sided percentile interval.
fn percentile_interval(mut dist: Vec<f64>, lo_pct: f64, hi_pct: f64) -> (f64, f64) {
    stats::sort_unstable_by_value(&mut dist);
    (
        stats::percentile_sorted(&dist, lo_pct),
        stats::percentile_sorted(&dist, hi_pct),
    )
}
