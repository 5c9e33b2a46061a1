//! Result and error types for the core library

use thiserror::Error;

/// Core library error type
#[derive(Error, Debug)]
pub enum Error {
    /// The uploaded text could not be turned into headers and rows
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A workflow action was requested from a stage that does not allow it
    #[error("Cannot {action} while in the {stage} stage")]
    InvalidTransition { stage: String, action: String },

    /// An async result resolved after the session moved on
    #[error("Session changed while the request was in flight (started at version {started}, now {current})")]
    StaleSession { started: u64, current: u64 },

    #[error("Classification assistant error: {0}")]
    Assistant(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an assistant (collaborator) error
    pub fn assistant(msg: impl Into<String>) -> Self {
        Self::Assistant(msg.into())
    }

    /// Create a store (collaborator) error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Whether the error came from an unavailable collaborator.
    ///
    /// These leave the session stage untouched so the caller can retry or skip.
    pub fn is_collaborator_failure(&self) -> bool {
        matches!(self, Self::Assistant(_) | Self::Store(_) | Self::Database(_))
    }
}

impl From<duckdb::Error> for Error {
    fn from(e: duckdb::Error) -> Self {
        Self::Database(e.to_string())
    }
}

/// Core library result type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_message() {
        let err = Error::InvalidTransition {
            stage: "upload".to_string(),
            action: "commit".to_string(),
        };
        assert_eq!(err.to_string(), "Cannot commit while in the upload stage");
    }

    #[test]
    fn test_collaborator_failure_classification() {
        assert!(Error::store("offline").is_collaborator_failure());
        assert!(Error::assistant("timeout").is_collaborator_failure());
        assert!(!Error::parse("no headers").is_collaborator_failure());
        assert!(!Error::validation("bad").is_collaborator_failure());
    }
}
