//! Bounded cache of ready interpreters
//!
//! Acquisition never blocks: an idle interpreter is handed out if one is
//! ready, otherwise a fresh one is created from the program. Released
//! interpreters are kept up to the pool capacity and dropped beyond it. The
//! pool is a warm cache, not a concurrency limiter.

use crate::engine::ScriptRuntime;
use crate::error::{Result, ScriptError};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Pool of interpreters created from one compiled program
pub struct InterpreterPool<R: ScriptRuntime> {
    runtime: Arc<R>,
    program: Arc<R::Program>,
    ready_tx: Sender<R::Instance>,
    ready_rx: Receiver<R::Instance>,
    max_size: usize,
    closed: AtomicBool,
    created: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
}

impl<R: ScriptRuntime> InterpreterPool<R> {
    /// Create an empty pool keeping at most `max_size` idle interpreters
    pub fn new(runtime: Arc<R>, program: Arc<R::Program>, max_size: usize) -> Self {
        let (ready_tx, ready_rx) = bounded(max_size);
        Self {
            runtime,
            program,
            ready_tx,
            ready_rx,
            max_size,
            closed: AtomicBool::new(false),
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Eagerly create `count` interpreters and offer them to the pool
    pub fn seed(&self, count: usize) -> Result<()> {
        for _ in 0..count {
            let instance = self.create()?;
            self.release(instance);
        }
        debug!(seeded = count, idle = self.idle(), "Interpreter pool seeded");
        Ok(())
    }

    /// Take an interpreter for exclusive use
    ///
    /// Fails only when the pool is closed, in which case nothing is created.
    pub fn acquire(&self) -> Result<PooledInterpreter<'_, R>> {
        if self.is_closed() {
            return Err(ScriptError::PoolClosed);
        }

        let instance = match self.ready_rx.try_recv() {
            Ok(instance) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                trace!("Reusing pooled interpreter");
                instance
            }
            Err(_) => {
                trace!("Pool empty, creating interpreter");
                self.create()?
            }
        };

        Ok(PooledInterpreter {
            pool: self,
            instance: Some(instance),
        })
    }

    /// Return an interpreter; it is dropped when the pool is full or closed
    pub fn release(&self, instance: R::Instance) {
        if self.is_closed() {
            self.discard(instance);
            return;
        }

        if let Err(err) = self.ready_tx.try_send(instance) {
            trace!("Pool full, dropping interpreter");
            self.discard(err.into_inner());
            return;
        }

        // close() may have drained between the check above and the send
        if self.is_closed() {
            self.drain();
        }
    }

    /// Mark the pool closed and drop idle interpreters
    ///
    /// Later acquisitions fail with [`ScriptError::PoolClosed`]; interpreters
    /// released afterwards are dropped.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.drain();
            debug!(
                created = self.created.load(Ordering::Relaxed),
                discarded = self.discarded.load(Ordering::Relaxed),
                "Interpreter pool closed"
            );
        }
    }

    /// Whether [`InterpreterPool::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of idle interpreters
    pub fn idle(&self) -> usize {
        self.ready_rx.len()
    }

    /// Maximum number of idle interpreters
    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// The program interpreters are created from
    pub fn program(&self) -> &Arc<R::Program> {
        &self.program
    }

    /// Pool statistics
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.idle(),
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }

    fn create(&self) -> Result<R::Instance> {
        let instance = self.runtime.instantiate(&self.program)?;
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(instance)
    }

    fn discard(&self, instance: R::Instance) {
        drop(instance);
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    fn drain(&self) {
        while let Ok(instance) = self.ready_rx.try_recv() {
            self.discard(instance);
        }
    }
}

impl<R: ScriptRuntime> fmt::Debug for InterpreterPool<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterpreterPool")
            .field("idle", &self.idle())
            .field("max_size", &self.max_size)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Exclusive handle on a pooled interpreter; releases it on drop
pub struct PooledInterpreter<'a, R: ScriptRuntime> {
    pool: &'a InterpreterPool<R>,
    instance: Option<R::Instance>,
}

impl<R: ScriptRuntime> PooledInterpreter<'_, R> {
    /// Drop the interpreter instead of returning it to the pool
    pub fn discard(mut self) {
        if let Some(instance) = self.instance.take() {
            self.pool.discard(instance);
        }
    }
}

impl<R: ScriptRuntime> Deref for PooledInterpreter<'_, R> {
    type Target = R::Instance;

    fn deref(&self) -> &Self::Target {
        // Only `discard` and `drop` take the instance, both consume the guard
        self.instance.as_ref().expect("pooled interpreter already taken")
    }
}

impl<R: ScriptRuntime> DerefMut for PooledInterpreter<'_, R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.instance.as_mut().expect("pooled interpreter already taken")
    }
}

impl<R: ScriptRuntime> Drop for PooledInterpreter<'_, R> {
    fn drop(&mut self) {
        if let Some(instance) = self.instance.take() {
            self.pool.release(instance);
        }
    }
}

impl<R: ScriptRuntime> fmt::Debug for PooledInterpreter<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledInterpreter")
            .field("instance", &self.instance)
            .finish()
    }
}

/// Interpreter pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Idle interpreters ready for reuse
    pub idle: usize,
    /// Interpreters created, including seeded ones
    pub created: u64,
    /// Acquisitions served from the pool
    pub reused: u64,
    /// Interpreters dropped because the pool was full or closed
    pub discarded: u64,
}

impl PoolStats {
    /// Fraction of acquisitions served by an idle interpreter (0.0 to 1.0)
    pub fn reuse_rate(&self) -> f64 {
        let acquisitions = self.reused + self.created;
        if acquisitions == 0 {
            0.0
        } else {
            self.reused as f64 / acquisitions as f64
        }
    }
}
