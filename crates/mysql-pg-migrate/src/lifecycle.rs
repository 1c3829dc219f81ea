//! Per-worker resource lifecycle.
//!
//! Worker threads have plain synchronous entry and exit points, but the
//! resource they own may have asynchronous setup and teardown. An
//! [`Initializer`] bridges the two: called on the worker thread it builds a
//! dedicated current-thread runtime, drives the setup to completion on it,
//! and returns a [`WorkerScope`] guard whose drop drives the teardown on the
//! same runtime when the worker exits.

use crate::error::{MigrateError, Result};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, warn};

type SetupFn<T> = dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync;
type TeardownFn<T> = dyn Fn(T) -> BoxFuture<'static, Result<()>> + Send + Sync;

/// Synchronous worker-start callback producing a torn-down-on-exit resource.
pub struct Initializer<T> {
    name: Arc<str>,
    setup: Arc<SetupFn<T>>,
    teardown: Arc<TeardownFn<T>>,
}

impl<T> Clone for Initializer<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            setup: self.setup.clone(),
            teardown: self.teardown.clone(),
        }
    }
}

/// Build an [`Initializer`] from an async setup and its matching teardown.
pub fn initializer<T, S, SFut, D, DFut>(name: &str, setup: S, teardown: D) -> Initializer<T>
where
    T: Send + 'static,
    S: Fn() -> SFut + Send + Sync + 'static,
    SFut: Future<Output = Result<T>> + Send + 'static,
    D: Fn(T) -> DFut + Send + Sync + 'static,
    DFut: Future<Output = Result<()>> + Send + 'static,
{
    Initializer {
        name: Arc::from(name),
        setup: Arc::new(move || -> BoxFuture<'static, Result<T>> { Box::pin(setup()) }),
        teardown: Arc::new(move |value: T| -> BoxFuture<'static, Result<()>> {
            Box::pin(teardown(value))
        }),
    }
}

impl<T> Initializer<T> {
    /// Name used in log lines.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the setup on the calling thread.
    ///
    /// Must be called from a plain (non-async) thread: it blocks on a runtime
    /// owned by the returned scope.
    pub fn init(&self) -> Result<WorkerScope<T>> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| MigrateError::pool(e, format!("building runtime for {}", self.name)))?;
        let value = runtime.block_on((self.setup)())?;
        debug!("{}: worker resource ready", self.name);
        Ok(WorkerScope {
            name: self.name.clone(),
            runtime,
            value: Some(value),
            teardown: self.teardown.clone(),
        })
    }
}

/// A worker-owned resource, torn down when the scope is dropped.
pub struct WorkerScope<T> {
    name: Arc<str>,
    runtime: Runtime,
    value: Option<T>,
    teardown: Arc<TeardownFn<T>>,
}

impl<T> WorkerScope<T> {
    /// Shared view of the resource.
    pub fn value(&self) -> &T {
        self.value.as_ref().expect("worker resource present until drop")
    }

    /// Exclusive view of the resource for the current work item.
    pub fn value_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("worker resource present until drop")
    }

    /// Drive an async work item to completion on the worker's runtime.
    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }
}

impl<T> Drop for WorkerScope<T> {
    fn drop(&mut self) {
        let Some(value) = self.value.take() else {
            return;
        };
        match self.runtime.block_on((self.teardown)(value)) {
            Ok(()) => debug!("{}: worker resource released", self.name),
            Err(e) => warn!("{}: teardown failed: {}", self.name, e),
        }
    }
}
