//! Error types for trajectory reweighting.
//!
//! Three variants are part of the run contract and are checked by the
//! orchestrator through [`ReweightError::is_recoverable`]:
//!
//! - [`ReweightError::Consistency`]: trajectories are no longer comparable,
//!   the run must abort.
//! - [`ReweightError::InsufficientData`]: skip reweighting for this epoch and
//!   retry on the next one.
//! - [`ReweightError::NumericalInstability`]: fall back to uniform weights for
//!   this pass.

use thiserror::Error;

/// Result type alias for trajectory reweighting operations.
pub type Result<T> = std::result::Result<T, ReweightError>;

/// Errors that can occur while recording, clustering or reweighting.
#[derive(Debug, Error)]
pub enum ReweightError {
    /// Dataset size or signal shape changed between recording passes.
    #[error("consistency error: {0}")]
    Consistency(String),

    /// Fewer examples than requested clusters.
    #[error("insufficient data: {examples} examples for {clusters} clusters")]
    InsufficientData {
        /// Number of examples available.
        examples: usize,
        /// Number of clusters requested.
        clusters: usize,
    },

    /// Mixture fit collapsed even with covariance regularization.
    #[error("numerical instability: {0}")]
    NumericalInstability(String),

    /// Invalid configuration parameter.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension.
        actual: usize,
    },

    /// Weight vector rejected by the data source.
    #[error("invalid weights: {0}")]
    InvalidWeights(String),

    /// Empty input where non-empty was required.
    #[error("empty input: {0}")]
    EmptyInput(String),

    /// Candle tensor operation error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Filesystem error while reading configs or writing reports.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Config or report (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ReweightError {
    /// Whether the run can continue after this error.
    ///
    /// Recoverable errors only cost the current reclustering pass.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InsufficientData { .. } | Self::NumericalInstability(_)
        )
    }
}

impl From<serde_json::Error> for ReweightError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ReweightError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for ReweightError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(ReweightError::InsufficientData {
            examples: 1,
            clusters: 3
        }
        .is_recoverable());
        assert!(ReweightError::NumericalInstability("nan".into()).is_recoverable());
        assert!(!ReweightError::Consistency("size changed".into()).is_recoverable());
        assert!(!ReweightError::InvalidConfig("scale".into()).is_recoverable());
    }

    #[test]
    fn test_insufficient_data_message() {
        let err = ReweightError::InsufficientData {
            examples: 1,
            clusters: 3,
        };
        assert_eq!(
            err.to_string(),
            "insufficient data: 1 examples for 3 clusters"
        );
    }
}
