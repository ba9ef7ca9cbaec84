use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Range;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A single observation in a time-indexed series.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SamplePoint {
    pub timestamp: DateTime<Utc>,
    /// Price or return; each consumer's contract states which it expects.
    pub value: f64,
}

/// An ordered sample with strictly increasing timestamps.
///
/// Gaps between timestamps are tolerated; duplicates and out-of-order points
/// are rejected at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    points: Vec<SamplePoint>,
}

impl Sample {
    pub fn new(points: Vec<SamplePoint>) -> Result<Self, ValidationError> {
        for w in points.windows(2) {
            if w[1].timestamp <= w[0].timestamp {
                return Err(ValidationError::InvalidSample(format!(
                    "timestamps must be strictly increasing (got {} after {})",
                    w[1].timestamp, w[0].timestamp
                )));
            }
        }
        Ok(Self { points })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[SamplePoint] {
        &self.points
    }

    /// Re-slice the sample by a half-open index range.
    pub fn slice(&self, range: Range<usize>) -> &[SamplePoint] {
        &self.points[range]
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }
}

/// One train/test pair of half-open index ranges into the original sample.
///
/// Invariant: `train_range.end + gap <= test_range.start` and
/// `test_range.end <= n_samples`. Only index ranges are retained; consumers
/// re-slice the original sample themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeriesSplit {
    pub index: usize,
    pub train_range: Range<usize>,
    pub test_range: Range<usize>,
}

impl TimeSeriesSplit {
    pub fn train_start(&self) -> usize {
        self.train_range.start
    }

    pub fn train_end(&self) -> usize {
        self.train_range.end
    }

    pub fn test_start(&self) -> usize {
        self.test_range.start
    }

    pub fn test_end(&self) -> usize {
        self.test_range.end
    }
}

/// A single candidate parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Flag(bool),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Flag(v) => write!(f, "{}", v),
            ParamValue::Text(v) => write!(f, "{}", v),
        }
    }
}

/// A chosen parameter combination, keyed by parameter name.
pub type ParamSet = BTreeMap<String, ParamValue>;

/// A parameter search grid.
///
/// Declaration order is preserved and drives the Cartesian enumeration order,
/// which in turn fixes the optimizer's tie break, so grids enumerate
/// identically across reruns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamGrid {
    entries: Vec<(String, Vec<ParamValue>)>,
}

impl ParamGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, name: impl Into<String>, candidates: Vec<ParamValue>) -> Self {
        self.entries.push((name.into(), candidates));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() || self.entries.iter().all(|(_, c)| c.is_empty())
    }

    /// Cartesian product of all candidate lists, first-declared parameter
    /// varying slowest.
    pub fn combinations(&self) -> Vec<ParamSet> {
        let mut combos: Vec<ParamSet> = vec![ParamSet::new()];
        for (name, candidates) in &self.entries {
            if candidates.is_empty() {
                continue;
            }
            let mut next = Vec::with_capacity(combos.len() * candidates.len());
            for combo in &combos {
                for candidate in candidates {
                    let mut c = combo.clone();
                    c.insert(name.clone(), candidate.clone());
                    next.push(c);
                }
            }
            combos = next;
        }
        combos
    }
}

/// Canonical label for a parameter combination: sorted `name=value` pairs.
///
/// Used as the memo key during grid search so equivalent combinations hit the
/// same cache entry regardless of declaration order.
pub fn canonical_param_label(params: &ParamSet) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(";")
}

// --- Walk-Forward ---

/// Result of a single walk-forward window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowResult {
    pub window_index: usize,
    pub train_range: Range<usize>,
    pub test_range: Range<usize>,
    /// Empty when every combination in the grid failed on the train slice.
    pub best_params: ParamSet,
    pub train_metrics: HashMap<String, f64>,
    pub test_metrics: HashMap<String, f64>,
}

/// Mean/std aggregates over the per-window test metrics. NaN window metrics
/// are skipped, not propagated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub mean_test_return: f64,
    pub std_test_return: f64,
    pub mean_test_sharpe: f64,
    pub std_test_sharpe: f64,
    pub mean_max_drawdown: f64,
    /// Fraction of windows with a positive test-set total return.
    pub window_win_rate: f64,
}

/// Coefficient-of-variation style stability scores, `std / (|mean| + eps)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConsistency {
    pub return_cv: f64,
    pub sharpe_cv: f64,
}

/// Walk-forward run over all windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardSummary {
    pub windows: Vec<WindowResult>,
    pub aggregate: AggregateMetrics,
    /// Per parameter: distinct chosen values / number of windows.
    /// 0 means the same value won every window.
    pub param_stability: HashMap<String, f64>,
    pub consistency: PerformanceConsistency,
}

// --- Overfitting ---

/// Verdict of a single resampling-based overfitting test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverfittingResult {
    pub method: String,
    pub test_statistic: f64,
    pub p_value: f64,
    pub confidence_interval: (f64, f64),
    pub is_overfitted: bool,
}

/// Dispersion of a metric across parameter combinations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensitivityResult {
    pub coefficient_of_variation: f64,
    pub range: f64,
    pub max: f64,
    pub min: f64,
    pub mean: f64,
}

/// Train-vs-test gap per shared metric, with threshold flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainTestGap {
    /// `train_value - test_value` for every metric present in both maps.
    pub gaps: HashMap<String, f64>,
    pub flags: Vec<String>,
    pub is_overfitted: bool,
}

// --- Significance ---

/// Sharpe-ratio t-test (Jobson-Korkie style standard error).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharpeTestResult {
    pub sharpe: f64,
    pub annualized_sharpe: f64,
    pub t_statistic: f64,
    pub p_value: f64,
    /// Annualized 95% confidence interval.
    pub confidence_interval: (f64, f64),
    pub is_significant: bool,
}

/// Percentile bootstrap CI for an arbitrary metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapCiResult {
    pub original: f64,
    pub bootstrap_mean: f64,
    /// `bootstrap_mean - original`.
    pub bias: f64,
    /// `original - bias`.
    pub bias_corrected: f64,
    pub confidence_interval: (f64, f64),
    pub n_bootstrap: usize,
}

/// Per-hypothesis outcome of a multiple-comparison correction, in the
/// caller's original order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypothesisOutcome {
    pub index: usize,
    pub p_value: f64,
    pub adjusted_p_value: f64,
    pub is_significant: bool,
}

/// A batch correction over simultaneously tested hypotheses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultipleTestOutcome {
    pub outcomes: Vec<HypothesisOutcome>,
    /// Bonferroni: `alpha / n_tests`. Benjamini-Hochberg: the target FDR `q`.
    pub threshold: f64,
}

/// One strategy's record in the multi-strategy joint test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyTestRecord {
    pub name: String,
    /// `mean(strategy) - mean(benchmark)`.
    pub statistic: f64,
    /// Raw two-sided permutation p-value against the shared benchmark.
    pub p_value: f64,
    pub bonferroni: HypothesisOutcome,
    pub fdr: HypothesisOutcome,
}

/// Render any result object as a generic key-value document for a reporting
/// collaborator.
pub fn to_document<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}
