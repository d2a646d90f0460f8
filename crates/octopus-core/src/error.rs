//! Error types for Octopus Gateway

/// Result type alias using [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type for Octopus Gateway
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Filter arguments have the wrong shape or type
    #[error("invalid filter parameters")]
    InvalidFilterParameters,

    /// No filter spec registered under this name
    #[error("Unknown filter: {0}")]
    UnknownFilter(String),

    /// Filter construction failed
    #[error("Failed to build filter '{filter}': {message}")]
    FilterBuild {
        /// Filter name
        filter: String,
        /// Error message
        message: String,
    },

    /// Invalid HTTP request
    #[error("Invalid HTTP request: {0}")]
    InvalidRequest(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    HttpError(#[from] http::Error),

    /// Internal error (should not happen in production)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a filter build error
    pub fn filter_build(filter: impl Into<String>, message: impl Into<String>) -> Self {
        Error::FilterBuild {
            filter: filter.into(),
            message: message.into(),
        }
    }

    /// Whether the error rejects a route at build time
    pub fn is_build_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidFilterParameters | Error::UnknownFilter(_) | Error::FilterBuild { .. }
        )
    }
}
