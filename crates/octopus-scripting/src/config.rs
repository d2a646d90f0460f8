//! Scripting filter configuration

use crate::error::{Result, ScriptError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration shared by every filter created from one spec
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptingConfig {
    /// Interpreters created eagerly when a filter is built
    #[serde(default = "default_initial_pool_size")]
    pub initial_pool_size: usize,

    /// Interpreters kept for reuse; more may exist while requests are in flight
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,

    /// Interpreter limits and capability settings
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

fn default_initial_pool_size() -> usize {
    3
}

fn default_max_pool_size() -> usize {
    10
}

impl Default for ScriptingConfig {
    fn default() -> Self {
        Self {
            initial_pool_size: default_initial_pool_size(),
            max_pool_size: default_max_pool_size(),
            sandbox: SandboxConfig::default(),
        }
    }
}

impl ScriptingConfig {
    /// Set pool sizes
    pub fn with_pool_size(mut self, initial: usize, max: usize) -> Self {
        self.initial_pool_size = initial;
        self.max_pool_size = max;
        self
    }

    /// Set sandbox limits
    pub fn with_sandbox(mut self, sandbox: SandboxConfig) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Check consistency of the configuration
    pub fn validate(&self) -> Result<()> {
        if self.initial_pool_size > self.max_pool_size {
            return Err(ScriptError::config(format!(
                "initial_pool_size ({}) exceeds max_pool_size ({})",
                self.initial_pool_size, self.max_pool_size
            )));
        }
        if self.sandbox.max_operations == 0 {
            return Err(ScriptError::config("sandbox.max_operations must be positive"));
        }
        Ok(())
    }
}

/// Interpreter limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Operations a single evaluation may perform
    #[serde(default = "default_max_operations")]
    pub max_operations: u64,

    /// Nested function call depth
    #[serde(default = "default_max_call_levels")]
    pub max_call_levels: usize,

    /// Expression nesting depth at global level
    #[serde(default = "default_max_expr_depth")]
    pub max_expr_depth: usize,

    /// Expression nesting depth inside functions
    #[serde(default = "default_max_function_expr_depth")]
    pub max_function_expr_depth: usize,

    /// Longest string in bytes
    #[serde(default = "default_max_string_size")]
    pub max_string_size: usize,

    /// Largest array
    #[serde(default = "default_max_collection_size")]
    pub max_array_size: usize,

    /// Largest object map
    #[serde(default = "default_max_collection_size")]
    pub max_map_size: usize,

    /// Timeout of outbound requests made through the `http` module
    #[serde(default = "default_http_timeout", with = "humantime_serde")]
    pub http_timeout: Duration,
}

fn default_max_operations() -> u64 {
    100_000
}

fn default_max_call_levels() -> usize {
    32
}

fn default_max_expr_depth() -> usize {
    64
}

fn default_max_function_expr_depth() -> usize {
    32
}

fn default_max_string_size() -> usize {
    1024 * 1024
}

fn default_max_collection_size() -> usize {
    10_000
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_operations: default_max_operations(),
            max_call_levels: default_max_call_levels(),
            max_expr_depth: default_max_expr_depth(),
            max_function_expr_depth: default_max_function_expr_depth(),
            max_string_size: default_max_string_size(),
            max_array_size: default_max_collection_size(),
            max_map_size: default_max_collection_size(),
            http_timeout: default_http_timeout(),
        }
    }
}
