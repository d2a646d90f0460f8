//! Rhai script runtime
//!
//! A program is a compiled [`AST`] shared by every interpreter of a filter.
//! Each interpreter owns its own sandboxed [`Engine`]. The program's top level
//! runs once per interpreter and becomes a global module of that engine, so
//! hooks see the script's top-level imports and constants (`global::NAME`).
//! Top-level `let` variables stay private to the top level.

use crate::config::SandboxConfig;
use crate::context::{
    Dispatch, HeaderView, InvocationContext, RequestView, ResponseView, StateBagView,
};
use crate::engine::{Interpreter, ScriptRuntime};
use crate::error::{Result, ScriptError};
use crate::marshal;
use crate::sandbox::{FnResult, Sandbox};
use crate::serve::ResponseSynthesizer;
use crate::source::RouteParam;
use rhai::{Dynamic, Engine, FnAccess, ImmutableString, Module, Scope, AST};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Hook arguments, in order; a hook declaring fewer receives a prefix
const HOOK_ARGS: [&str; 2] = ["ctx", "params"];

/// Runtime producing sandboxed Rhai interpreters
#[derive(Debug)]
pub struct RhaiRuntime {
    sandbox: Sandbox,
    compiler: Engine,
}

impl RhaiRuntime {
    /// Create a runtime with the given limits
    pub fn new(config: SandboxConfig) -> Self {
        let sandbox = Sandbox::new(config);
        let compiler = build_engine(&sandbox);
        Self { sandbox, compiler }
    }

    /// Capability modules and limits
    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }
}

impl Default for RhaiRuntime {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

/// Compiled script
#[derive(Debug)]
pub struct RhaiProgram {
    name: String,
    ast: AST,
    /// Call expressions for public functions callable as hooks
    hooks: HashMap<String, AST>,
}

impl RhaiProgram {
    /// Source identity
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a public function with this name takes at most two parameters
    pub fn has_hook(&self, name: &str) -> bool {
        self.hooks.contains_key(name)
    }
}

impl ScriptRuntime for RhaiRuntime {
    type Program = RhaiProgram;
    type Instance = RhaiInterpreter;

    fn compile(&self, name: &str, source: &str) -> Result<Self::Program> {
        let mut ast = self.compiler.compile(source)?;
        ast.set_source(name);

        // largest overload taking at most as many parameters as there are hook arguments
        let mut arities: HashMap<String, usize> = HashMap::new();
        for f in ast.iter_functions() {
            if f.access == FnAccess::Public && f.params.len() <= HOOK_ARGS.len() {
                let arity = arities.entry(f.name.to_string()).or_default();
                *arity = (*arity).max(f.params.len());
            }
        }

        let mut hooks = HashMap::with_capacity(arities.len());
        for (fn_name, arity) in arities {
            let call = format!("{fn_name}({})", HOOK_ARGS[..arity].join(", "));
            let call = self.compiler.compile(&call)?;
            hooks.insert(fn_name, call);
        }

        debug!(script = name, hooks = hooks.len(), "Script compiled");
        Ok(RhaiProgram {
            name: name.to_string(),
            ast,
            hooks,
        })
    }

    fn instantiate(&self, program: &Arc<Self::Program>) -> Result<Self::Instance> {
        let mut engine = build_engine(&self.sandbox);
        let globals: Arc<Module> =
            Module::eval_ast_as_new(Scope::new(), &program.ast, &engine)?.into();
        engine.register_global_module(Arc::clone(&globals));
        trace!(script = %program.name, "Interpreter created");
        Ok(RhaiInterpreter {
            engine,
            globals,
            program: Arc::clone(program),
        })
    }
}

/// One Rhai engine with the program's top level loaded
#[derive(Debug)]
pub struct RhaiInterpreter {
    engine: Engine,
    globals: Arc<Module>,
    program: Arc<RhaiProgram>,
}

impl RhaiInterpreter {
    /// Module built from the program's top level
    pub fn globals(&self) -> &Module {
        &self.globals
    }
}

impl Interpreter for RhaiInterpreter {
    fn has_global(&self, name: &str) -> bool {
        self.program.has_hook(name)
    }

    fn call(&mut self, name: &str, ctx: InvocationContext, params: &[RouteParam]) -> Result<()> {
        let Some(call) = self.program.hooks.get(name) else {
            return Err(ScriptError::runtime(format!(
                "function '{name}' not found or takes more than 2 parameters"
            )));
        };

        let mut scope = Scope::new();
        scope.push(HOOK_ARGS[0], ctx);
        scope.push(HOOK_ARGS[1], marshal::route_params_to_map(params));

        self.engine.run_ast_with_scope(&mut scope, call)?;
        Ok(())
    }
}

/// Sandboxed engine with the context bindings registered
fn build_engine(sandbox: &Sandbox) -> Engine {
    let mut engine = Engine::new();
    sandbox.apply(&mut engine);
    register_bindings(&mut engine);
    engine
}

fn register_dispatch<T: Dispatch>(engine: &mut Engine) {
    engine
        .register_type_with_name::<T>(T::TYPE_NAME)
        .register_indexer_get(|obj: &mut T, key: ImmutableString| -> FnResult<Dynamic> {
            Ok(obj.get_field(&key)?)
        })
        .register_indexer_set(
            |obj: &mut T, key: ImmutableString, value: Dynamic| -> FnResult<()> {
                Ok(obj.set_field(&key, &value)?)
            },
        );
}

fn register_bindings(engine: &mut Engine) {
    register_dispatch::<InvocationContext>(engine);
    register_dispatch::<RequestView>(engine);
    register_dispatch::<ResponseView>(engine);

    engine.register_fn("serve", |ctx: &mut InvocationContext, spec: Dynamic| {
        ctx.serve(&spec)
    });
    engine.register_type_with_name::<ResponseSynthesizer>("Serve");

    engine
        .register_type_with_name::<HeaderView>("Headers")
        .register_indexer_get(|h: &mut HeaderView, name: ImmutableString| h.get(&name))
        .register_indexer_set(
            |h: &mut HeaderView, name: ImmutableString, value: Dynamic| -> FnResult<()> {
                Ok(h.set(&name, &value)?)
            },
        );

    engine
        .register_type_with_name::<StateBagView>("StateBag")
        .register_indexer_get(|bag: &mut StateBagView, key: ImmutableString| bag.get(&key))
        .register_indexer_set(
            |bag: &mut StateBagView, key: ImmutableString, value: Dynamic| {
                if let Err(err) = bag.set(&key, &value) {
                    warn!(key = %key, error = %err, "Ignoring state bag assignment");
                }
            },
        )
        .register_fn("get", |bag: &mut StateBagView, key: ImmutableString| bag.get(&key))
        .register_fn(
            "set",
            |bag: &mut StateBagView, key: ImmutableString, value: Dynamic| match bag
                .set(&key, &value)
            {
                Ok(()) => Dynamic::UNIT,
                Err(err) => Dynamic::from(err.to_string()),
            },
        );
}
