//! Error types for the foldrun-core crate.

use thiserror::Error;

/// Top-level error type for experiment operations.
///
/// `Configuration`, `Partition` and `Dataset` are fatal: they stop an
/// experiment before any training starts. `Training` and `Evaluation` are
/// per-run failures; the orchestrator records them on the failing
/// `RunResult` instead of returning them.
#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Partition error: {0}")]
    Partition(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Config file error: {0}")]
    Config(#[from] Box<figment::Error>),
}

impl ExperimentError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn partition(msg: impl Into<String>) -> Self {
        Self::Partition(msg.into())
    }

    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }

    pub fn evaluation(msg: impl Into<String>) -> Self {
        Self::Evaluation(msg.into())
    }

    pub fn dataset(msg: impl Into<String>) -> Self {
        Self::Dataset(msg.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    /// Whether this error aborts the whole experiment.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Training(_) | Self::Evaluation(_))
    }
}

/// Errors raised by a classifier implementation.
#[derive(Debug, Clone, Error)]
pub enum ClassifierError {
    /// The training data is not usable by this classifier.
    #[error("rejected training data: {0}")]
    RejectedData(String),

    /// The row does not match the schema the model was trained on.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// The model has not seen enough data to predict.
    #[error("untrained model: {0}")]
    Untrained(String),

    #[error("invalid hyperparameter `{name}`: {reason}")]
    InvalidParam { name: String, reason: String },

    #[error("model encoding error: {0}")]
    Encoding(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ExperimentError::configuration("unknown classifier").is_fatal());
        assert!(ExperimentError::partition("too few instances").is_fatal());
        assert!(!ExperimentError::training("bad data").is_fatal());
        assert!(!ExperimentError::evaluation("predict failed").is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = ClassifierError::InvalidParam {
            name: "k".into(),
            reason: "must be >= 1".into(),
        };
        assert_eq!(err.to_string(), "invalid hyperparameter `k`: must be >= 1");
        assert_eq!(
            ExperimentError::partition("k > n").to_string(),
            "Partition error: k > n"
        );
    }
}
