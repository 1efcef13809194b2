//! Error types for db-converse.
//!
//! The variants mirror the failure classes a conversation turn can hit.
//! Only [`ConverseError::Connection`] is fatal for a session; every other
//! variant is caught at the component boundary and summarized for the user.

use thiserror::Error;

/// Main error type for db-converse operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConverseError {
    /// Schema or database unreachable while setting up a session.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The intent classifier could not produce a valid category.
    #[error("Classification error: {0}")]
    Classification(String),

    /// The model produced SQL that is invalid or unsafe to run.
    #[error("Generation error: {0}")]
    Generation(String),

    /// The database rejected a statement that looked valid.
    #[error("Execution error: {0}")]
    Execution(String),

    /// A data-modification request is missing required fields or a filter.
    #[error("Validation error: {0}")]
    Validation(String),

    /// LLM API errors (rate limits, auth, timeouts, etc.)
    #[error("LLM error: {0}")]
    Llm(String),

    /// Configuration errors (invalid config file, missing required fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal application errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConverseError {
    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a classification error with the given message.
    pub fn classification(msg: impl Into<String>) -> Self {
        Self::Classification(msg.into())
    }

    /// Creates a generation error with the given message.
    pub fn generation(msg: impl Into<String>) -> Self {
        Self::Generation(msg.into())
    }

    /// Creates an execution error with the given message.
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Creates a validation error with the given message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Creates an LLM error with the given message.
    pub fn llm(msg: impl Into<String>) -> Self {
        Self::Llm(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "Connection Error",
            Self::Classification(_) => "Classification Error",
            Self::Generation(_) => "Generation Error",
            Self::Execution(_) => "Execution Error",
            Self::Validation(_) => "Validation Error",
            Self::Llm(_) => "LLM Error",
            Self::Config(_) => "Configuration Error",
            Self::Internal(_) => "Internal Error",
        }
    }

    /// Returns the message without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Connection(m)
            | Self::Classification(m)
            | Self::Generation(m)
            | Self::Execution(m)
            | Self::Validation(m)
            | Self::Llm(m)
            | Self::Config(m)
            | Self::Internal(m) => m,
        }
    }

    /// Returns true if the error ends the session instead of just the turn.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

/// Result type alias using ConverseError.
pub type Result<T> = std::result::Result<T, ConverseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_connection() {
        let err = ConverseError::connection("Cannot connect to localhost:5432");
        assert_eq!(
            err.to_string(),
            "Connection error: Cannot connect to localhost:5432"
        );
        assert_eq!(err.category(), "Connection Error");
    }

    #[test]
    fn test_error_display_generation() {
        let err = ConverseError::generation("statement is not a SELECT");
        assert_eq!(
            err.to_string(),
            "Generation error: statement is not a SELECT"
        );
        assert_eq!(err.category(), "Generation Error");
    }

    #[test]
    fn test_error_display_execution() {
        let err = ConverseError::execution("no such column: emal");
        assert_eq!(err.to_string(), "Execution error: no such column: emal");
        assert_eq!(err.message(), "no such column: emal");
    }

    #[test]
    fn test_only_connection_is_fatal() {
        assert!(ConverseError::connection("down").is_fatal());
        assert!(!ConverseError::classification("bad json").is_fatal());
        assert!(!ConverseError::generation("bad sql").is_fatal());
        assert!(!ConverseError::execution("rejected").is_fatal());
        assert!(!ConverseError::validation("no filter").is_fatal());
        assert!(!ConverseError::llm("rate limited").is_fatal());
        assert!(!ConverseError::internal("oops").is_fatal());
    }

    #[test]
    fn test_error_display_config() {
        let err = ConverseError::config("missing field 'database' in connections.default");
        assert_eq!(
            err.to_string(),
            "Configuration error: missing field 'database' in connections.default"
        );
        assert_eq!(err.category(), "Configuration Error");
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ConverseError>();
    }
}
