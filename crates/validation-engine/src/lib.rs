pub mod error;
pub mod models;
pub mod overfitting;
pub mod significance;
pub mod splitter;
pub mod stats;
pub mod walk_forward;

pub use error::ValidationError;
pub use models::*;
pub use overfitting::{Alternative, BootstrapMetric, OverfittingDetector};
pub use significance::{
    benjamini_hochberg, bonferroni, bootstrap_metric_ci, deflated_sharpe_ratio,
    minimum_backtest_length, multi_strategy_test, sharpe_ratio_test,
};
pub use splitter::{split, SplitConfig, SplitMethod};
pub use walk_forward::{BacktestRunner, WalkForwardConfig, WalkForwardEngine};
