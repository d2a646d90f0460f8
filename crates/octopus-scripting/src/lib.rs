//! # Octopus Scripting
//!
//! Script filters for request/response transformation.
//!
//! A route attaches a script by source (inline code or a path ending in
//! `.lua` or `.rhai`) followed by `key=value` route parameters. The script
//! defines a `request` hook, a `response` hook, or both:
//!
//! ```rhai
//! fn request(ctx, params) {
//!     if ctx.request.header["Authorization"] == "" {
//!         ctx.serve(#{ status_code: 401, body: "missing credentials" });
//!         return;
//!     }
//!     ctx.request.header["X-Tenant"] = params.tenant;
//!     ctx.state_bag["tenant"] = params.tenant;
//! }
//! ```
//!
//! ## Features
//!
//! - Compile once per route, interpreters pooled and reused across requests
//! - Lazy, per-call views over the request, response and state bag
//! - Short-circuit responses via `ctx.serve(...)`
//! - Sandboxed interpreters with `base64`, `http`, `url` and `json` modules
//! - Script failures are logged and never fail the request

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod compiler;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod filter;
pub mod marshal;
pub mod pool;
pub mod rhai_engine;
pub mod sandbox;
pub mod serve;
pub mod source;

#[cfg(test)]
mod testing;

/// Registration name of the script filter
pub const FILTER_NAME: &str = "lua";

pub use compiler::ScriptCompiler;
pub use config::{SandboxConfig, ScriptingConfig};
pub use context::InvocationContext;
pub use engine::{Hook, Interpreter, ScriptRuntime};
pub use error::{Result, ScriptError};
pub use filter::{ScriptFilter, ScriptFilterSpec};
pub use pool::{InterpreterPool, PoolStats, PooledInterpreter};
pub use rhai_engine::{RhaiInterpreter, RhaiProgram, RhaiRuntime};
pub use source::{RouteParam, ScriptSource};

/// Prelude with commonly used types
pub mod prelude {
    pub use crate::config::{SandboxConfig, ScriptingConfig};
    pub use crate::engine::Hook;
    pub use crate::error::{Result, ScriptError};
    pub use crate::filter::{ScriptFilter, ScriptFilterSpec};
    pub use crate::source::{RouteParam, ScriptSource};
    pub use crate::FILTER_NAME;
}
