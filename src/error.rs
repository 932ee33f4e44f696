//! Error types for the lifecycle stages

use thiserror::Error;

/// Result type alias for lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Main error type for training and scoring.
///
/// Every variant is fatal to the stage that raises it. Unsupported feature
/// importance is not represented here: it is a regular
/// [`ImportanceResult`](crate::automl::ImportanceResult) value.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// A query or a stored object reference could not be resolved
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// The destination table rejected the shape of the written frame
    #[error("Schema mismatch on {table}: {detail}")]
    SchemaMismatch { table: String, detail: String },

    /// The execution context violates one of its invariants
    #[error("Invalid context: {0}")]
    InvalidContext(String),

    /// The model search engine failed to initialise or to search
    #[error("Search engine error: {0}")]
    Engine(String),

    /// An artifact could not be exported or read back
    #[error("Artifact error: {0}")]
    Artifact(String),

    /// Predictions and source rows disagree on row count
    #[error("Row count mismatch: expected {expected} rows, got {actual}")]
    RowCountMismatch { expected: usize, actual: usize },

    #[error("Data error: {0}")]
    Data(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Feature not found: {0}")]
    FeatureNotFound(String),

    #[error("Model not fitted")]
    ModelNotFitted,
}

impl From<polars::error::PolarsError> for LifecycleError {
    fn from(err: polars::error::PolarsError) -> Self {
        LifecycleError::Data(err.to_string())
    }
}

impl From<serde_json::Error> for LifecycleError {
    fn from(err: serde_json::Error) -> Self {
        LifecycleError::Serialization(err.to_string())
    }
}

impl From<ndarray::ShapeError> for LifecycleError {
    fn from(err: ndarray::ShapeError) -> Self {
        LifecycleError::Data(format!("invalid shape: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LifecycleError::Resolution("table model_3 not found".to_string());
        assert_eq!(err.to_string(), "Resolution error: table model_3 not found");

        let err = LifecycleError::RowCountMismatch { expected: 10, actual: 9 };
        assert_eq!(err.to_string(), "Row count mismatch: expected 10 rows, got 9");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: LifecycleError = io_err.into();
        assert!(matches!(err, LifecycleError::Io(_)));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: LifecycleError = json_err.into();
        assert!(matches!(err, LifecycleError::Serialization(_)));
    }
}
