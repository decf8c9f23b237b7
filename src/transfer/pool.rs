//! Session-wide limit on concurrent chunk operations.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::{MegaError, Result};

pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 16;

/// Counting pool of worker slots shared by every transfer that holds a clone.
///
/// Resizing means building a new pool; transfers already running keep the
/// one they started with.
#[derive(Debug, Clone)]
pub(crate) struct WorkerPool {
    semaphore: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.clamp(MIN_WORKERS, MAX_WORKERS);
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    #[cfg(test)]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a slot unless `cancel` fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<OwnedSemaphorePermit> {
        if cancel.is_cancelled() {
            return Err(MegaError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(MegaError::Cancelled),
            permit = self.semaphore.clone().acquire_owned() => {
                permit.map_err(|_| MegaError::SessionClosed)
            }
        }
    }
}
