//! Script source and route parameters

use crate::error::{Result, ScriptError};
use std::fmt;
use std::path::{Path, PathBuf};

/// File suffixes treated as a script path rather than inline source
pub const SCRIPT_SUFFIXES: &[&str] = &[".lua", ".rhai"];

/// Script source (inline or file-based)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    /// Inline script code
    Inline {
        /// Script code
        code: String,
    },
    /// File-based script
    File {
        /// Path to script file
        path: PathBuf,
    },
}

impl ScriptSource {
    /// Create inline script source
    pub fn inline<S: Into<String>>(code: S) -> Self {
        Self::Inline { code: code.into() }
    }

    /// Create file-based script source
    pub fn file<P: Into<PathBuf>>(path: P) -> Self {
        Self::File { path: path.into() }
    }

    /// Classify a filter argument as a path or inline code by its suffix
    pub fn from_arg(arg: &str) -> Self {
        if SCRIPT_SUFFIXES.iter().any(|suffix| arg.ends_with(suffix)) {
            Self::file(arg)
        } else {
            Self::inline(arg)
        }
    }

    /// Get script code, reading the file if needed
    pub fn load(&self) -> Result<String> {
        match self {
            Self::Inline { code } => Ok(code.clone()),
            Self::File { path } => std::fs::read_to_string(path).map_err(|source| ScriptError::Io {
                path: path.clone(),
                source,
            }),
        }
    }

    /// Source identity used in logs and error positions
    pub fn name(&self) -> String {
        match self {
            Self::Inline { .. } => "<script>".to_string(),
            Self::File { path } => path.display().to_string(),
        }
    }

    /// Script path, if file-based
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Inline { .. } => None,
            Self::File { path } => Some(path),
        }
    }
}

impl fmt::Display for ScriptSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// A `key=value` route parameter; bare keys carry an empty value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteParam {
    /// Parameter name
    pub key: String,
    /// Parameter value
    pub value: String,
}

impl RouteParam {
    /// Create a parameter
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Split once on `=`
    pub fn parse(raw: &str) -> Self {
        match raw.split_once('=') {
            Some((key, value)) => Self::new(key, value),
            None => Self::new(raw, ""),
        }
    }
}

/// Split positional filter arguments into the script source and route parameters
///
/// The first argument must be a string; every following argument must be a
/// string too.
pub fn parse_filter_args(args: &[serde_json::Value]) -> Result<(ScriptSource, Vec<RouteParam>)> {
    let (first, rest) = args.split_first().ok_or(ScriptError::InvalidParameters)?;
    let source = first
        .as_str()
        .map(ScriptSource::from_arg)
        .ok_or(ScriptError::InvalidParameters)?;

    let params = rest
        .iter()
        .map(|arg| {
            arg.as_str()
                .map(RouteParam::parse)
                .ok_or(ScriptError::InvalidParameters)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((source, params))
}
