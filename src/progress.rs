//! Progress reporting for file transfers.

use std::sync::{Arc, Mutex};

/// Progress information for uploads and downloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    /// Bytes confirmed so far
    pub done: u64,
    /// Total bytes to transfer
    pub total: u64,
    /// Name of the file being transferred
    pub name: String,
}

impl TransferProgress {
    pub fn new(done: u64, total: u64, name: impl Into<String>) -> Self {
        Self {
            done,
            total,
            name: name.into(),
        }
    }

    /// Progress as a percentage (0.0 to 100.0). Empty transfers report 0.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.done as f64 / self.total as f64) * 100.0
    }

    pub fn is_complete(&self) -> bool {
        self.done >= self.total
    }
}

/// Callback invoked as chunks are confirmed.
///
/// Returning `false` cancels the transfer; in-flight chunks drain and the
/// transfer resolves with [`crate::MegaError::Cancelled`].
pub type ProgressCallback = Box<dyn FnMut(&TransferProgress) -> bool + Send>;

/// Progress callback shared between the session and running transfers.
#[derive(Clone, Default)]
pub(crate) struct ProgressSink {
    inner: Option<Arc<Mutex<ProgressCallback>>>,
}

impl ProgressSink {
    pub(crate) fn new(callback: ProgressCallback) -> Self {
        Self {
            inner: Some(Arc::new(Mutex::new(callback))),
        }
    }

    /// Report progress; returns `false` if the callback asked to stop.
    pub(crate) fn report(&self, progress: &TransferProgress) -> bool {
        match &self.inner {
            Some(cb) => match cb.lock() {
                Ok(mut cb) => cb(progress),
                Err(_) => true,
            },
            None => true,
        }
    }
}

impl std::fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSink")
            .field("attached", &self.inner.is_some())
            .finish()
    }
}
