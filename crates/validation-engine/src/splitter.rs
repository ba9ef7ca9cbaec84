//! Time-aware train/test splitting.
//!
//! All methods respect temporal ordering: every train range precedes its test
//! range, optionally separated by a `gap` of skipped samples to prevent
//! leakage from overlapping observations.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::models::TimeSeriesSplit;

/// Splitting method. Unknown names are rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitMethod {
    /// Fixed-size train window sliding forward.
    Rolling,
    /// Train window anchored at 0, absorbing each previous test range.
    Expanding,
    /// Anchored folds of equal size, train = everything before the fold.
    KFold,
}

impl FromStr for SplitMethod {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rolling" => Ok(SplitMethod::Rolling),
            "expanding" => Ok(SplitMethod::Expanding),
            "kfold" => Ok(SplitMethod::KFold),
            other => Err(ValidationError::Configuration(format!(
                "unknown split method '{}' (expected rolling, expanding or kfold)",
                other
            ))),
        }
    }
}

/// Split sizing. `train_size`/`test_size` values greater than 1 are absolute
/// sample counts; values in (0, 1] are fractions of `n_samples`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    pub n_splits: usize,
    pub train_size: Option<f64>,
    pub test_size: Option<f64>,
    /// Samples skipped between each train end and test start.
    pub gap: usize,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            n_splits: 5,
            train_size: None,
            test_size: None,
            gap: 0,
        }
    }
}

/// Generate train/test splits over `n_samples` ordered observations.
///
/// A shorter-than-requested list is valid output (rolling windows that would
/// run past the sample are dropped, not truncated). Sizes that leave no room
/// for even one window are a configuration error.
pub fn split(
    n_samples: usize,
    method: SplitMethod,
    config: &SplitConfig,
) -> Result<Vec<TimeSeriesSplit>, ValidationError> {
    if config.n_splits == 0 {
        return Err(ValidationError::Configuration(
            "n_splits must be at least 1".to_string(),
        ));
    }

    let splits = match method {
        SplitMethod::Rolling => rolling(n_samples, config)?,
        SplitMethod::Expanding => expanding(n_samples, config)?,
        SplitMethod::KFold => kfold(n_samples, config)?,
    };

    for s in &splits {
        if s.train_range.end + config.gap > s.test_range.start || s.test_range.end > n_samples {
            return Err(ValidationError::Configuration(format!(
                "split {} violates ordering: train {:?}, gap {}, test {:?}, n {}",
                s.index, s.train_range, config.gap, s.test_range, n_samples
            )));
        }
    }

    Ok(splits)
}

fn resolve_size(size: Option<f64>, n_samples: usize) -> Option<usize> {
    size.map(|v| {
        if v > 1.0 {
            v.round() as usize
        } else {
            (v * n_samples as f64).floor() as usize
        }
    })
}

fn rolling(n_samples: usize, config: &SplitConfig) -> Result<Vec<TimeSeriesSplit>, ValidationError> {
    let train_size =
        resolve_size(config.train_size, n_samples).unwrap_or(n_samples / (config.n_splits + 1));
    let test_size = resolve_size(config.test_size, n_samples).unwrap_or(train_size);

    if train_size == 0 || test_size == 0 {
        return Err(ValidationError::Configuration(format!(
            "degenerate rolling window: train_size {}, test_size {} over {} samples",
            train_size, test_size, n_samples
        )));
    }
    if train_size + config.gap + test_size > n_samples {
        return Err(ValidationError::Configuration(format!(
            "train ({}) + gap ({}) + test ({}) exceeds sample length {}",
            train_size, config.gap, test_size, n_samples
        )));
    }

    let step = ((n_samples - train_size - test_size) / config.n_splits).max(1);

    let mut splits = Vec::with_capacity(config.n_splits);
    for i in 0..config.n_splits {
        let train_start = i * step;
        let train_end = train_start + train_size;
        let test_start = train_end + config.gap;
        let test_end = test_start + test_size;
        if test_end > n_samples {
            break;
        }
        splits.push(TimeSeriesSplit {
            index: splits.len(),
            train_range: train_start..train_end,
            test_range: test_start..test_end,
        });
    }
    Ok(splits)
}

fn expanding(
    n_samples: usize,
    config: &SplitConfig,
) -> Result<Vec<TimeSeriesSplit>, ValidationError> {
    let base = n_samples / (config.n_splits + 1);
    if base == 0 {
        return Err(ValidationError::Configuration(format!(
            "{} samples cannot support {} expanding splits",
            n_samples, config.n_splits
        )));
    }
    let test_size = resolve_size(config.test_size, n_samples).unwrap_or(base);
    if test_size == 0 {
        return Err(ValidationError::Configuration(
            "expanding test_size resolves to 0 samples".to_string(),
        ));
    }

    // Gap is applied between every train end and test start, not just the
    // first window.
    let mut splits = Vec::with_capacity(config.n_splits);
    let mut train_end = base;
    for i in 0..config.n_splits {
        let test_start = train_end + config.gap;
        if test_start >= n_samples {
            break;
        }
        let test_end = if i == config.n_splits - 1 {
            n_samples
        } else {
            (test_start + test_size).min(n_samples)
        };
        splits.push(TimeSeriesSplit {
            index: splits.len(),
            train_range: 0..train_end,
            test_range: test_start..test_end,
        });
        // Next train absorbs the previous test range.
        train_end = test_end;
    }
    Ok(splits)
}

fn kfold(n_samples: usize, config: &SplitConfig) -> Result<Vec<TimeSeriesSplit>, ValidationError> {
    let fold_size = n_samples / (config.n_splits + 1);
    if fold_size == 0 {
        return Err(ValidationError::Configuration(format!(
            "{} samples cannot support {} k-fold splits",
            n_samples, config.n_splits
        )));
    }

    let mut splits = Vec::with_capacity(config.n_splits);
    for i in 1..=config.n_splits {
        let train_end = i * fold_size;
        // With gap > 0 the test window shrinks from the left so the fold
        // boundaries stay aligned.
        let test_start = train_end + config.gap;
        let test_end = if i == config.n_splits {
            n_samples
        } else {
            (i + 1) * fold_size
        };
        if test_start >= test_end {
            break;
        }
        splits.push(TimeSeriesSplit {
            index: splits.len(),
            train_range: 0..train_end,
            test_range: test_start..test_end,
        });
    }
    Ok(splits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_default_sizes_are_deterministic() {
        let config = SplitConfig {
            n_splits: 4,
            ..Default::default()
        };
        let splits = split(100, SplitMethod::Rolling, &config).unwrap();

        // train_size = 100/5 = 20, test_size = 20, step = (100-40)/4 = 15
        assert_eq!(splits.len(), 4);
        assert_eq!(splits[0].train_range, 0..20);
        assert_eq!(splits[0].test_range, 20..40);
        assert_eq!(splits[1].train_range, 15..35);
        assert_eq!(splits[1].test_range, 35..55);
        assert_eq!(splits[3].test_range.end, 85);
    }

    #[test]
    fn test_rolling_drops_windows_past_sample_end() {
        let config = SplitConfig {
            n_splits: 10,
            train_size: Some(48.0),
            test_size: Some(48.0),
            gap: 0,
        };
        // step = max(1, 4/10) = 1; only starts 0..=4 fit before index 100.
        let splits = split(100, SplitMethod::Rolling, &config).unwrap();
        assert_eq!(splits.len(), 5);
        assert!(splits.iter().all(|s| s.test_range.end <= 100));
    }

    #[test]
    fn test_rolling_fractional_sizes() {
        let config = SplitConfig {
            n_splits: 3,
            train_size: Some(0.5),
            test_size: Some(0.1),
            gap: 0,
        };
        let splits = split(200, SplitMethod::Rolling, &config).unwrap();
        assert_eq!(splits[0].train_range, 0..100);
        assert_eq!(splits[0].test_range, 100..120);
    }

    #[test]
    fn test_kfold_deterministic_with_clamped_tail() {
        let config = SplitConfig {
            n_splits: 3,
            ..Default::default()
        };
        let splits = split(60, SplitMethod::KFold, &config).unwrap();

        // fold_size = 60/4 = 15
        assert_eq!(splits.len(), 3);
        assert_eq!(splits[0].train_range, 0..15);
        assert_eq!(splits[0].test_range, 15..30);
        assert_eq!(splits[1].train_range, 0..30);
        assert_eq!(splits[1].test_range, 30..45);
        assert_eq!(splits[2].train_range, 0..45);
        assert_eq!(splits[2].test_range, 45..60);
    }

    #[test]
    fn test_expanding_train_absorbs_previous_test() {
        let config = SplitConfig {
            n_splits: 4,
            ..Default::default()
        };
        let splits = split(100, SplitMethod::Expanding, &config).unwrap();

        assert_eq!(splits[0].train_range, 0..20);
        for w in splits.windows(2) {
            assert_eq!(w[1].train_range.end, w[0].test_range.end);
            assert_eq!(w[1].train_range.start, 0);
        }
        // Last test end is clamped to the sample length.
        assert_eq!(splits.last().unwrap().test_range.end, 100);
    }

    #[test]
    fn test_gap_respected_by_every_method() {
        for method in [SplitMethod::Rolling, SplitMethod::Expanding, SplitMethod::KFold] {
            let config = SplitConfig {
                n_splits: 4,
                gap: 3,
                ..Default::default()
            };
            let splits = split(120, method, &config).unwrap();
            assert!(!splits.is_empty());
            for s in &splits {
                assert!(s.train_range.end + 3 <= s.test_range.start);
                assert!(s.test_range.end <= 120);
            }
        }
    }

    #[test]
    fn test_unknown_method_is_rejected() {
        let err = "stratified".parse::<SplitMethod>().unwrap_err();
        assert!(matches!(err, ValidationError::Configuration(_)));
    }

    #[test]
    fn test_oversized_window_is_a_configuration_error() {
        let config = SplitConfig {
            n_splits: 2,
            train_size: Some(80.0),
            test_size: Some(40.0),
            gap: 0,
        };
        let err = split(100, SplitMethod::Rolling, &config).unwrap_err();
        assert!(matches!(err, ValidationError::Configuration(_)));
    }
}
