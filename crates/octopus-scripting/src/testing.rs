//! Test runtime with scripted behavior
//!
//! The "source" of a mock program is a whitespace-separated list of words:
//! `request` / `response` declare hooks, `fail` makes calls return a runtime
//! error, `panic` makes calls panic, and `!syntax` fails compilation.

use crate::context::InvocationContext;
use crate::engine::{Interpreter, ScriptRuntime};
use crate::error::{Result, ScriptError};
use crate::source::RouteParam;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub(crate) struct MockRuntime {
    instantiated: AtomicUsize,
    fail_instantiate: AtomicBool,
}

impl MockRuntime {
    pub(crate) fn fail_instantiate(&self, fail: bool) {
        self.fail_instantiate.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn instantiated(&self) -> usize {
        self.instantiated.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub(crate) struct MockProgram {
    words: Vec<String>,
    calls: AtomicUsize,
}

impl MockProgram {
    fn has(&self, word: &str) -> bool {
        self.words.iter().any(|w| w == word)
    }
}

#[derive(Debug)]
pub(crate) struct MockInstance {
    program: Arc<MockProgram>,
    busy: AtomicBool,
}

impl MockInstance {
    pub(crate) fn enter(&mut self) {
        assert!(
            !self.busy.swap(true, Ordering::SeqCst),
            "interpreter used by two callers"
        );
    }

    pub(crate) fn leave(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

impl ScriptRuntime for MockRuntime {
    type Program = MockProgram;
    type Instance = MockInstance;

    fn compile(&self, _name: &str, source: &str) -> Result<Self::Program> {
        let words: Vec<String> = source.split_whitespace().map(str::to_string).collect();
        if words.iter().any(|w| w == "!syntax") {
            return Err(ScriptError::compilation("unexpected token"));
        }
        Ok(MockProgram {
            words,
            calls: AtomicUsize::new(0),
        })
    }

    fn instantiate(&self, program: &Arc<Self::Program>) -> Result<Self::Instance> {
        if self.fail_instantiate.load(Ordering::SeqCst) {
            return Err(ScriptError::runtime("instantiation failed"));
        }
        self.instantiated.fetch_add(1, Ordering::SeqCst);
        Ok(MockInstance {
            program: Arc::clone(program),
            busy: AtomicBool::new(false),
        })
    }
}

impl Interpreter for MockInstance {
    fn has_global(&self, name: &str) -> bool {
        self.program.has(name)
    }

    fn call(&mut self, name: &str, ctx: InvocationContext, params: &[RouteParam]) -> Result<()> {
        self.enter();
        self.program.calls.fetch_add(1, Ordering::SeqCst);
        if self.program.has("panic") {
            panic!("mock hook panicked");
        }
        let result = if self.program.has("fail") {
            Err(ScriptError::runtime(format!("{name} failed")))
        } else {
            let mut req = ctx.filter_context().request().lock();
            let value = format!("{name}:{}", params.len());
            if let Ok(value) = value.parse() {
                req.headers_mut().insert("x-mock-hook", value);
            }
            Ok(())
        };
        self.leave();
        result
    }
}

pub(crate) fn calls(program: &MockProgram) -> usize {
    program.calls.load(Ordering::SeqCst)
}
