use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Test-slice evaluation failed: {0}")]
    Evaluation(String),

    #[error("Invalid sample: {0}")]
    InvalidSample(String),
}
