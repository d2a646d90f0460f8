//! Script runtime capability traits
//!
//! The pool, compiler and filter are written against these traits rather
//! than a concrete interpreter. [`crate::RhaiRuntime`] is the shipped
//! implementation.

use crate::context::InvocationContext;
use crate::error::Result;
use crate::source::RouteParam;
use std::fmt;
use std::sync::Arc;

/// Lifecycle hook a script may define
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    /// Runs on the request path
    Request,
    /// Runs on the response path
    Response,
}

impl Hook {
    /// Global function name of the hook
    pub fn name(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Compiles scripts and creates interpreters from compiled programs
pub trait ScriptRuntime: Send + Sync + fmt::Debug + 'static {
    /// Immutable compiled form of a script
    type Program: Send + Sync + fmt::Debug + 'static;

    /// Live execution environment created from a program
    type Instance: Interpreter;

    /// Parse and compile script source; `name` identifies the source in errors
    fn compile(&self, name: &str, source: &str) -> Result<Self::Program>;

    /// Create a ready-to-run interpreter with capabilities and globals installed
    fn instantiate(&self, program: &Arc<Self::Program>) -> Result<Self::Instance>;
}

/// A single interpreter, used by one hook call at a time
pub trait Interpreter: Send + fmt::Debug + 'static {
    /// Whether the program defines a callable global with this name
    fn has_global(&self, name: &str) -> bool;

    /// Call a global function in protected mode with the bound context and
    /// route parameters
    ///
    /// Script failures are returned as errors, never raised as panics.
    fn call(&mut self, name: &str, ctx: InvocationContext, params: &[RouteParam]) -> Result<()>;
}
