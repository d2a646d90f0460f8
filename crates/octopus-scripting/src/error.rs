//! Script error types

use std::path::PathBuf;

/// Script result type
pub type Result<T> = std::result::Result<T, ScriptError>;

/// Scripting filter error
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    /// Filter arguments have the wrong shape or type
    #[error("invalid filter parameters")]
    InvalidParameters,

    /// Script file could not be opened or read
    #[error("Failed to read script file {}: {source}", path.display())]
    Io {
        /// Script path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Script compilation/parsing error
    #[error("Script compilation error: {message}")]
    Compilation {
        /// Error message
        message: String,
        /// Line number if available
        line: Option<usize>,
        /// Column number if available
        column: Option<usize>,
    },

    /// Neither hook is defined by the script
    #[error("at least one of `request` and `response` function must be present")]
    NoHook,

    /// Interpreter pool has been closed
    #[error("pool closed")]
    PoolClosed,

    /// Script runtime error
    #[error("Script runtime error: {message}")]
    Runtime {
        /// Error message
        message: String,
        /// Script line where error occurred
        line: Option<usize>,
    },

    /// Host code panicked during a hook call
    #[error("Script panic: {0}")]
    Panic(String),

    /// Value cannot be converted between host and script
    #[error("{0}")]
    Type(String),

    /// Invalid scripting configuration
    #[error("Invalid scripting configuration: {0}")]
    Config(String),
}

impl ScriptError {
    /// Create a compilation error
    pub fn compilation<S: Into<String>>(message: S) -> Self {
        Self::Compilation {
            message: message.into(),
            line: None,
            column: None,
        }
    }

    /// Create a runtime error
    pub fn runtime<S: Into<String>>(message: S) -> Self {
        Self::Runtime {
            message: message.into(),
            line: None,
        }
    }

    /// Create a type error
    pub fn type_error<S: Into<String>>(message: S) -> Self {
        Self::Type(message.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }
}

impl From<rhai::ParseError> for ScriptError {
    fn from(err: rhai::ParseError) -> Self {
        let pos = err.position();
        Self::Compilation {
            message: err.to_string(),
            line: pos.line(),
            column: pos.position(),
        }
    }
}

impl From<Box<rhai::EvalAltResult>> for ScriptError {
    fn from(err: Box<rhai::EvalAltResult>) -> Self {
        let line = err.position().line();
        Self::Runtime {
            message: err.to_string(),
            line,
        }
    }
}

impl From<ScriptError> for Box<rhai::EvalAltResult> {
    fn from(err: ScriptError) -> Self {
        match err {
            ScriptError::Runtime { message, .. } => message.into(),
            other => other.to_string().into(),
        }
    }
}

impl From<ScriptError> for octopus_core::Error {
    fn from(err: ScriptError) -> Self {
        match err {
            ScriptError::InvalidParameters => octopus_core::Error::InvalidFilterParameters,
            other => octopus_core::Error::filter_build(crate::FILTER_NAME, other.to_string()),
        }
    }
}
