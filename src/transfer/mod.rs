//! Chunked, resumable transfers under a shared worker pool.

pub(crate) mod chunk;
pub(crate) mod download;
pub(crate) mod mac;
pub(crate) mod pool;
pub(crate) mod resume;
pub(crate) mod retry;
pub(crate) mod upload;

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::api::Transport;
use crate::progress::ProgressSink;
use pool::WorkerPool;
use resume::ResumeStore;

pub use pool::{MAX_WORKERS, MIN_WORKERS};
pub use retry::RetryPolicy;

/// Session-wide transfer settings. Changes apply to transfers started afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Concurrent chunk operations across all transfers of a session.
    pub workers: usize,
    /// Persist checkpoints so interrupted transfers can continue.
    pub resume: bool,
    /// Generate thumbnails for uploaded images.
    pub previews: bool,
    /// Where checkpoints are kept; defaults to a directory under the system temp dir.
    #[serde(default)]
    pub resume_dir: Option<PathBuf>,
    #[serde(skip)]
    pub retry: RetryPolicy,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            resume: true,
            previews: false,
            resume_dir: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl TransferConfig {
    pub(crate) fn resume_store(&self) -> Option<ResumeStore> {
        self.resume.then(|| ResumeStore::new(self.staging_dir()))
    }

    /// Directory for checkpoints and staged downloads.
    pub(crate) fn staging_dir(&self) -> PathBuf {
        self.resume_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("megacore-resume"))
    }
}

/// Everything a running transfer needs, captured when it starts.
#[derive(Clone)]
pub(crate) struct TransferContext {
    pub transport: Arc<dyn Transport>,
    pub pool: WorkerPool,
    pub retry: RetryPolicy,
    pub progress: ProgressSink,
    pub resume: Option<ResumeStore>,
    pub cancel: CancellationToken,
}

impl std::fmt::Debug for TransferContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferContext")
            .field("workers", &self.pool.size())
            .field("resume", &self.resume)
            .finish()
    }
}
