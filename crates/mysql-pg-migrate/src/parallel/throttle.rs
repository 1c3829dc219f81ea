//! Concurrency admission control.

use crate::error::{MigrateError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Bounds how many operations run at once.
///
/// Cloning shares the same slots.
#[derive(Debug, Clone)]
pub struct Throttle {
    semaphore: Arc<Semaphore>,
}

impl Throttle {
    /// Create a throttle admitting at most `limit` operations.
    ///
    /// # Panics
    ///
    /// Panics if `limit` is zero; configuration validation rejects that earlier.
    pub fn new(limit: usize) -> Self {
        assert!(limit > 0, "throttle limit must be positive");
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
        }
    }

    /// Run `op` once a slot is free. The slot is released when `op` settles,
    /// whether it succeeded or not.
    ///
    /// Waiting for admission ends early with [`MigrateError::Cancelled`] if
    /// `cancel` fires first; `op` is then never started.
    pub async fn run<F, T>(&self, cancel: &CancellationToken, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MigrateError::Cancelled),
            permit = self.semaphore.acquire() => {
                permit.map_err(|_| MigrateError::Cancelled)?
            }
        };
        op.await
    }
}
