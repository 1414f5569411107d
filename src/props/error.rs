use thiserror::Error;

/// Validation failures raised by the prop estimators.
///
/// Everything else the estimators run into (empty history, tiny joint
/// samples, a noisy correlation matrix) is recovered locally and never
/// surfaces here.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PropError {
    #[error("unsupported prop: {0}")]
    UnsupportedMetric(String),

    #[error("unsupported operator: {0} (only \"at least\" legs are supported)")]
    UnsupportedOperator(String),

    #[error("threshold must be finite, got {0}")]
    InvalidThreshold(f64),

    #[error("at least one leg is required")]
    NoLegs,

    #[error("joint sample has {columns} columns but {legs} legs were requested")]
    ColumnMismatch { columns: usize, legs: usize },

    #[error("joint sample columns must have equal length (expected {expected}, got {got})")]
    RaggedSample { expected: usize, got: usize },

    #[error("joint sample has no rows")]
    EmptyJointSample,

    #[error("n_samples must be at least 1")]
    NoDraws,
}
