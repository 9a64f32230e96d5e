//! Error types for the reconciliation pipeline
//!
//! Only failures that leave a stage unable to continue live here. Field-level
//! parse problems degrade to "unknown" inside the merger, merge conflicts are
//! settled by policy, and verification issues are annotations on the record.

use thiserror::Error;

/// Result type for reconciliation operations
pub type Result<T> = std::result::Result<T, ReconError>;

#[derive(Error, Debug)]
pub enum ReconError {
    /// Missing or invalid configuration / reference data. Fatal: the run
    /// aborts before the repository is touched.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A source adapter failed as a whole. The run continues without it.
    #[error("Source '{source_id}' failed: {message}")]
    Source { source_id: String, message: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Requested entity not found in the repository
    #[error("Not found: {0}")]
    NotFound(String),
}

impl ReconError {
    /// True for failures that must abort the run
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ReconError::Source { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_failure_is_not_fatal() {
        let err = ReconError::Source {
            source_id: "ratehub".to_string(),
            message: "timed out".to_string(),
        };
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "Source 'ratehub' failed: timed out");
    }

    #[test]
    fn test_configuration_failure_is_fatal() {
        let err = ReconError::Configuration("reference table missing".to_string());
        assert!(err.is_fatal());
        assert!(err.to_string().contains("reference table missing"));
    }
}
