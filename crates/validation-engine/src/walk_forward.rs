//! Walk-forward optimization: per-window grid search on the train slice,
//! out-of-sample evaluation of the winner on the test slice.

use std::collections::{HashMap, HashSet};

use dashmap::DashMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ValidationError;
use crate::models::{
    canonical_param_label, AggregateMetrics, ParamGrid, ParamSet, PerformanceConsistency, Sample,
    SamplePoint, WalkForwardSummary, WindowResult,
};
use crate::stats;

/// The external backtest collaborator. Implementations receive a slice of the
/// original sample plus one parameter combination and return named metrics,
/// including at least `sharpe`, `max_drawdown`, `total_return` and
/// `annual_return`.
///
/// Failures during train-slice optimization are tolerated (the combination
/// scores `-inf`); a failure on the test slice aborts the run. The runner may
/// block; hosts that need cancellation should wrap their implementation in a
/// timeout and return an error when it fires.
pub trait BacktestRunner: Sync {
    fn run(
        &self,
        slice: &[SamplePoint],
        params: &ParamSet,
    ) -> anyhow::Result<HashMap<String, f64>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardConfig {
    pub train_size: usize,
    pub test_size: usize,
    pub step_size: usize,
    /// Metric key maximized during the per-window grid search.
    pub optimization_metric: String,
}

pub struct WalkForwardEngine;

impl WalkForwardEngine {
    /// Slide fixed-size train/test windows over the sample, optimize on each
    /// train slice, validate out-of-sample, and aggregate.
    ///
    /// The final partial window is discarded, not truncated.
    pub fn run<R: BacktestRunner>(
        sample: &Sample,
        runner: &R,
        grid: &ParamGrid,
        config: &WalkForwardConfig,
    ) -> Result<WalkForwardSummary, ValidationError> {
        if grid.is_empty() {
            return Err(ValidationError::Configuration(
                "parameter grid is empty".to_string(),
            ));
        }
        if config.train_size == 0 || config.test_size == 0 || config.step_size == 0 {
            return Err(ValidationError::Configuration(
                "train_size, test_size and step_size must all be positive".to_string(),
            ));
        }
        let n = sample.len();
        if config.train_size + config.test_size > n {
            return Err(ValidationError::Configuration(format!(
                "train ({}) + test ({}) exceeds sample length {}",
                config.train_size, config.test_size, n
            )));
        }

        let combos = grid.combinations();
        let mut windows: Vec<WindowResult> = Vec::new();
        let mut start = 0usize;

        while start + config.train_size + config.test_size <= n {
            let train_range = start..start + config.train_size;
            let test_range = train_range.end..train_range.end + config.test_size;
            let window_index = windows.len();
            debug!(
                window_index,
                train_start = train_range.start,
                test_end = test_range.end,
                "walk-forward window"
            );

            // Explicit memo for this optimization call, keyed by the
            // canonical sorted param label. None = the runner failed.
            let memo: DashMap<String, Option<HashMap<String, f64>>> = DashMap::new();
            let train_slice = sample.slice(train_range.clone());

            let scored: Vec<f64> = combos
                .par_iter()
                .map(|params| {
                    let key = canonical_param_label(params);
                    let metrics = memo
                        .entry(key)
                        .or_insert_with(|| runner.run(train_slice, params).ok())
                        .clone();
                    metrics
                        .and_then(|m| m.get(&config.optimization_metric).copied())
                        .filter(|v| v.is_finite())
                        .unwrap_or(f64::NEG_INFINITY)
                })
                .collect();

            // Strict `>` with first-seen order: ties resolve to the earliest
            // combination in the declared enumeration order.
            let mut best_idx = 0usize;
            let mut best_score = f64::NEG_INFINITY;
            for (i, &score) in scored.iter().enumerate() {
                if score > best_score {
                    best_idx = i;
                    best_score = score;
                }
            }

            if !best_score.is_finite() {
                // Every combination failed or produced no usable metric.
                // Recorded, not raised, so callers can see optimizer failure.
                warn!(window_index, "no parameter combination produced a finite score");
                windows.push(WindowResult {
                    window_index,
                    train_range,
                    test_range,
                    best_params: ParamSet::new(),
                    train_metrics: HashMap::new(),
                    test_metrics: HashMap::new(),
                });
                start += config.step_size;
                continue;
            }

            let best_params = combos[best_idx].clone();
            let train_metrics = memo
                .get(&canonical_param_label(&best_params))
                .and_then(|m| m.clone())
                .unwrap_or_default();

            // A failure here invalidates the window's result and must be
            // visible to the caller.
            let test_slice = sample.slice(test_range.clone());
            let test_metrics = runner
                .run(test_slice, &best_params)
                .map_err(|e| ValidationError::Evaluation(format!("window {}: {}", window_index, e)))?;

            debug!(window_index, best_score, params = %canonical_param_label(&best_params), "window winner");
            windows.push(WindowResult {
                window_index,
                train_range,
                test_range,
                best_params,
                train_metrics,
                test_metrics,
            });
            start += config.step_size;
        }

        let aggregate = aggregate_windows(&windows);
        let param_stability = param_stability(&windows);
        let consistency = PerformanceConsistency {
            return_cv: coefficient_of_variation(&metric_values(&windows, "total_return")),
            sharpe_cv: coefficient_of_variation(&metric_values(&windows, "sharpe")),
        };

        Ok(WalkForwardSummary {
            windows,
            aggregate,
            param_stability,
            consistency,
        })
    }
}

fn metric_values(windows: &[WindowResult], key: &str) -> Vec<f64> {
    windows
        .iter()
        .filter_map(|w| w.test_metrics.get(key).copied())
        .filter(|v| v.is_finite())
        .collect()
}

fn aggregate_windows(windows: &[WindowResult]) -> AggregateMetrics {
    let returns = metric_values(windows, "total_return");
    let sharpes = metric_values(windows, "sharpe");
    let drawdowns = metric_values(windows, "max_drawdown");

    let positive = returns.iter().filter(|&&r| r > 0.0).count();
    let window_win_rate = if windows.is_empty() {
        0.0
    } else {
        positive as f64 / windows.len() as f64
    };

    AggregateMetrics {
        mean_test_return: stats::mean_finite(&returns),
        std_test_return: stats::std_dev_finite(&returns),
        mean_test_sharpe: stats::mean_finite(&sharpes),
        std_test_sharpe: stats::std_dev_finite(&sharpes),
        mean_max_drawdown: stats::mean_finite(&drawdowns),
        window_win_rate,
    }
}

/// Distinct chosen values per parameter, normalized by the window count.
/// Only parameters chosen in at least one window are scored.
fn param_stability(windows: &[WindowResult]) -> HashMap<String, f64> {
    let mut seen: HashMap<String, HashSet<String>> = HashMap::new();
    for w in windows {
        for (name, value) in &w.best_params {
            seen.entry(name.clone()).or_default().insert(value.to_string());
        }
    }

    let n_windows = windows.len().max(1) as f64;
    seen.into_iter()
        .map(|(name, values)| {
            // 1 distinct value over all windows = perfectly stable = 0.
            let score = (values.len() as f64 - 1.0).max(0.0) / n_windows;
            (name, score)
        })
        .collect()
}

fn coefficient_of_variation(values: &[f64]) -> f64 {
    let mean = stats::mean_finite(values);
    let std = stats::std_dev_finite(values);
    std / (mean.abs() + stats::EPS)
}
