//! Route arguments to ready filters

use crate::config::ScriptingConfig;
use crate::engine::{Hook, Interpreter, ScriptRuntime};
use crate::error::{Result, ScriptError};
use crate::filter::ScriptFilter;
use crate::pool::InterpreterPool;
use crate::rhai_engine::RhaiRuntime;
use crate::source::{parse_filter_args, RouteParam, ScriptSource};
use std::sync::Arc;
use tracing::{debug, info};

/// Builds [`ScriptFilter`]s from route arguments
#[derive(Debug)]
pub struct ScriptCompiler<R: ScriptRuntime = RhaiRuntime> {
    runtime: Arc<R>,
    config: ScriptingConfig,
}

impl ScriptCompiler<RhaiRuntime> {
    /// Create a compiler backed by a Rhai runtime using the configured sandbox
    pub fn new(config: ScriptingConfig) -> Result<Self> {
        config.validate()?;
        let runtime = Arc::new(RhaiRuntime::new(config.sandbox.clone()));
        Ok(Self { runtime, config })
    }
}

impl<R: ScriptRuntime> ScriptCompiler<R> {
    /// Create a compiler over an existing runtime
    pub fn with_runtime(runtime: Arc<R>, config: ScriptingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { runtime, config })
    }

    /// Configuration in effect
    pub fn config(&self) -> &ScriptingConfig {
        &self.config
    }

    /// The runtime compiling scripts
    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    /// Build a filter from positional route arguments
    ///
    /// The first argument is inline source or a script path, the rest are
    /// `key=value` route parameters.
    pub fn build(&self, args: &[serde_json::Value]) -> Result<ScriptFilter<R>> {
        let (source, params) = parse_filter_args(args)?;
        self.build_source(source, params)
    }

    /// Build a filter from an already classified source
    pub fn build_source(&self, source: ScriptSource, params: Vec<RouteParam>) -> Result<ScriptFilter<R>> {
        let name = source.name();
        let code = source.load()?;
        let program = Arc::new(self.runtime.compile(&name, &code)?);

        let (request_hook, response_hook) = {
            let probe = self.runtime.instantiate(&program)?;
            (
                probe.has_global(Hook::Request.name()),
                probe.has_global(Hook::Response.name()),
            )
        };
        if !request_hook && !response_hook {
            return Err(ScriptError::NoHook);
        }

        let pool = InterpreterPool::new(
            Arc::clone(&self.runtime),
            program,
            self.config.max_pool_size,
        );
        pool.seed(self.config.initial_pool_size)?;

        debug!(script = %name, params = params.len(), idle = pool.idle(), "Interpreter pool ready");
        info!(script = %name, request_hook, response_hook, "Script filter built");

        Ok(ScriptFilter::new(source, params, request_hook, response_hook, pool))
    }
}
