//! Route filter running script hooks

use crate::compiler::ScriptCompiler;
use crate::config::ScriptingConfig;
use crate::context::InvocationContext;
use crate::engine::{Hook, Interpreter, ScriptRuntime};
use crate::error::{Result, ScriptError};
use crate::pool::InterpreterPool;
use crate::rhai_engine::RhaiRuntime;
use crate::source::{RouteParam, ScriptSource};
use crate::FILTER_NAME;
use octopus_core::{Filter, FilterContext, FilterSpec};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, trace, warn};

/// A compiled script attached to a route
///
/// Hook calls never propagate script failures to the caller: errors are
/// logged and the request continues with whatever the script already changed.
/// There is no execution timeout here; a hook that never returns blocks its
/// caller, so the serving layer must bound hook calls itself.
pub struct ScriptFilter<R: ScriptRuntime = RhaiRuntime> {
    source: ScriptSource,
    params: Vec<RouteParam>,
    request_hook: bool,
    response_hook: bool,
    pool: InterpreterPool<R>,
}

impl<R: ScriptRuntime> ScriptFilter<R> {
    pub(crate) fn new(
        source: ScriptSource,
        params: Vec<RouteParam>,
        request_hook: bool,
        response_hook: bool,
        pool: InterpreterPool<R>,
    ) -> Self {
        Self {
            source,
            params,
            request_hook,
            response_hook,
            pool,
        }
    }

    /// Where the script came from
    pub fn source(&self) -> &ScriptSource {
        &self.source
    }

    /// Route parameters in configuration order
    pub fn route_params(&self) -> &[RouteParam] {
        &self.params
    }

    /// Whether the script defines `request`
    pub fn has_request_hook(&self) -> bool {
        self.request_hook
    }

    /// Whether the script defines `response`
    pub fn has_response_hook(&self) -> bool {
        self.response_hook
    }

    /// Whether the script defines the given hook
    pub fn has_hook(&self, hook: Hook) -> bool {
        match hook {
            Hook::Request => self.request_hook,
            Hook::Response => self.response_hook,
        }
    }

    /// The interpreter pool
    pub fn pool(&self) -> &InterpreterPool<R> {
        &self.pool
    }

    /// Close the interpreter pool; later hook calls are skipped
    pub fn close(&self) {
        self.pool.close();
    }

    /// Run a hook and report the outcome
    ///
    /// Returns `Ok(false)` when the script does not define the hook. An
    /// interpreter whose hook panicked is dropped instead of being reused.
    pub fn call_hook(&self, hook: Hook, ctx: &Arc<dyn FilterContext>) -> Result<bool> {
        if !self.has_hook(hook) {
            return Ok(false);
        }

        let mut instance = self.pool.acquire()?;
        let invocation = InvocationContext::new(Arc::clone(ctx));

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            instance.call(hook.name(), invocation, &self.params)
        }));

        match outcome {
            Ok(result) => result.map(|()| true),
            Err(payload) => {
                instance.discard();
                Err(ScriptError::Panic(panic_message(payload.as_ref())))
            }
        }
    }

    fn run_hook(&self, hook: Hook, ctx: &Arc<dyn FilterContext>) {
        match self.call_hook(hook, ctx) {
            Ok(true) => trace!(hook = %hook, script = %self.source, "Hook completed"),
            Ok(false) => {}
            Err(ScriptError::PoolClosed) => {
                error!(hook = %hook, script = %self.source, "Interpreter pool closed, skipping hook")
            }
            Err(err @ ScriptError::Panic(_)) => {
                error!(hook = %hook, script = %self.source, error = %err, "Hook panicked, interpreter dropped")
            }
            Err(err) => {
                warn!(hook = %hook, script = %self.source, error = %err, "Error calling hook")
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl<R: ScriptRuntime> Filter for ScriptFilter<R> {
    fn request(&self, ctx: &Arc<dyn FilterContext>) {
        self.run_hook(Hook::Request, ctx);
    }

    fn response(&self, ctx: &Arc<dyn FilterContext>) {
        self.run_hook(Hook::Response, ctx);
    }
}

impl<R: ScriptRuntime> Drop for ScriptFilter<R> {
    fn drop(&mut self) {
        self.pool.close();
    }
}

impl<R: ScriptRuntime> fmt::Debug for ScriptFilter<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptFilter")
            .field("source", &self.source.name())
            .field("params", &self.params)
            .field("request_hook", &self.request_hook)
            .field("response_hook", &self.response_hook)
            .field("pool", &self.pool)
            .finish()
    }
}

/// Filter spec registered under [`FILTER_NAME`]
#[derive(Debug)]
pub struct ScriptFilterSpec<R: ScriptRuntime = RhaiRuntime> {
    compiler: ScriptCompiler<R>,
}

impl ScriptFilterSpec<RhaiRuntime> {
    /// Create a spec whose filters share one configuration
    pub fn new(config: ScriptingConfig) -> Result<Self> {
        Ok(Self {
            compiler: ScriptCompiler::new(config)?,
        })
    }
}

impl<R: ScriptRuntime> ScriptFilterSpec<R> {
    /// Create a spec over an existing compiler
    pub fn with_compiler(compiler: ScriptCompiler<R>) -> Self {
        Self { compiler }
    }

    /// The compiler building filters
    pub fn compiler(&self) -> &ScriptCompiler<R> {
        &self.compiler
    }
}

impl<R: ScriptRuntime> FilterSpec for ScriptFilterSpec<R> {
    fn name(&self) -> &str {
        FILTER_NAME
    }

    fn create_filter(&self, args: &[serde_json::Value]) -> octopus_core::Result<Arc<dyn Filter>> {
        let filter = self.compiler.build(args)?;
        Ok(Arc::new(filter))
    }
}
