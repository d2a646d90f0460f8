//! Sandboxed interpreter environment
//!
//! Scripts get the language core plus four capability modules (`base64`,
//! `http`, `url`, `json`), available both as static namespaces
//! (`json::encode(v)`) and through `import "json" as json;`. No other module
//! can be imported and `eval` is disabled.

mod base64;
mod http;
mod json;
mod url;

use crate::config::SandboxConfig;
use rhai::module_resolvers::StaticModuleResolver;
use rhai::{Engine, EvalAltResult, Module};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub(crate) type FnResult<T> = Result<T, Box<EvalAltResult>>;

/// Capability modules and limits applied to every interpreter
#[derive(Debug, Clone)]
pub struct Sandbox {
    config: SandboxConfig,
    modules: Vec<(&'static str, Arc<Module>)>,
}

impl Sandbox {
    /// Build the capability modules
    pub fn new(config: SandboxConfig) -> Self {
        let modules = vec![
            ("base64", Arc::new(base64::module())),
            ("http", Arc::new(http::module(config.http_timeout))),
            ("url", Arc::new(url::module())),
            ("json", Arc::new(json::module())),
        ];
        Self { config, modules }
    }

    /// Limits in effect
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Names of the capability modules
    pub fn module_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.modules.iter().map(|(name, _)| *name)
    }

    /// Apply limits, logging and capability modules to an engine
    pub fn apply(&self, engine: &mut Engine) {
        let config = &self.config;
        engine.set_max_operations(config.max_operations);
        engine.set_max_call_levels(config.max_call_levels);
        engine.set_max_expr_depths(config.max_expr_depth, config.max_function_expr_depth);
        engine.set_max_string_size(config.max_string_size);
        engine.set_max_array_size(config.max_array_size);
        engine.set_max_map_size(config.max_map_size);

        engine.disable_symbol("eval");

        engine.on_print(|msg| info!(script_log = msg, "print"));
        engine.on_debug(|msg, source, pos| {
            debug!(script_log = msg, source = source.unwrap_or_default(), position = %pos, "debug")
        });

        engine.register_fn("log_debug", |msg: &str| debug!(script_log = msg));
        engine.register_fn("log_info", |msg: &str| info!(script_log = msg));
        engine.register_fn("log_warn", |msg: &str| warn!(script_log = msg));

        let mut resolver = StaticModuleResolver::new();
        for (name, module) in &self.modules {
            engine.register_static_module(*name, Arc::clone(module));
            resolver.insert(*name, Module::clone(module));
        }
        engine.set_module_resolver(resolver);
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

/// Finish a module so it can be shared between engines
fn finish(mut module: Module) -> Module {
    module.build_index();
    module
}
