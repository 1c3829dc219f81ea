//! Cancellation-safe parallel join.
//!
//! A [`TaskGroup`] starts every operation, and on the first failure cancels
//! the rest, waits until all of them have settled, and only then returns the
//! failure that triggered the cancellation. When it returns, nothing it
//! spawned is still running.

use crate::error::{MigrateError, Result};
use std::future::Future;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// A set of independent tasks joined with cancel-then-join-then-propagate
/// semantics.
pub struct TaskGroup<T> {
    tasks: JoinSet<(usize, Result<T>)>,
    cancel: CancellationToken,
    spawned: usize,
}

impl<T: Send + 'static> TaskGroup<T> {
    /// Create an empty group with its own cancellation token.
    pub fn new() -> Self {
        Self::with_parent(&CancellationToken::new())
    }

    /// Create a group whose token is cancelled when `parent` is.
    pub fn with_parent(parent: &CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            cancel: parent.child_token(),
            spawned: 0,
        }
    }

    /// Start `op`, handing it the group's cancellation token.
    ///
    /// Operations are expected to check the token at their suspension points
    /// and unwind with [`MigrateError::Cancelled`], releasing what they hold.
    pub fn spawn<F, Fut>(&mut self, op: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let index = self.spawned;
        self.spawned += 1;
        let fut = op(self.cancel.clone());
        self.tasks.spawn(async move { (index, fut.await) });
    }

    /// Wait for every task. Returns results in spawn order, or the first
    /// failure once all tasks have settled.
    pub async fn join_all(mut self) -> Result<Vec<T>> {
        let mut results: Vec<Option<T>> = Vec::with_capacity(self.spawned);
        results.resize_with(self.spawned, || None);
        let mut failure: Option<MigrateError> = None;

        while let Some(joined) = self.tasks.join_next().await {
            let outcome = match joined {
                Ok((index, Ok(value))) => {
                    results[index] = Some(value);
                    continue;
                }
                Ok((_, Err(e))) => e,
                Err(join_err) => {
                    error!("Task panicked: {}", join_err);
                    MigrateError::TaskFailed(join_err.to_string())
                }
            };

            if failure.is_none() {
                if !outcome.is_cancelled() {
                    debug!("Task failed, cancelling {} siblings", self.tasks.len());
                }
                self.cancel.cancel();
                failure = Some(outcome);
            } else {
                debug!("Discarding secondary failure during cancellation: {}", outcome);
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }

        Ok(results.into_iter().flatten().collect())
    }
}

impl<T: Send + 'static> Default for TaskGroup<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Run every operation in a fresh [`TaskGroup`] under `parent`.
pub async fn run_all<I, F, Fut, T>(parent: &CancellationToken, ops: I) -> Result<Vec<T>>
where
    I: IntoIterator<Item = F>,
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let mut group = TaskGroup::with_parent(parent);
    for op in ops {
        group.spawn(op);
    }
    group.join_all().await
}
