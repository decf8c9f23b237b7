//! Resume checkpoints for interrupted transfers.
//!
//! A checkpoint records the acknowledged-chunk high-water mark of one
//! transfer together with everything needed to continue it: the chunk MACs
//! of the acknowledged prefix and, for uploads, the upload URL and the file
//! key. Checkpoints live as JSON files in a caller-chosen directory, named by
//! a hash of the remote identity and the local target.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::Result;

/// Upload URLs expire after about a day.
pub(crate) const MAX_CHECKPOINT_AGE: Duration = Duration::from_secs(24 * 3600);

/// Upload-only part of a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct UploadResume {
    pub upload_url: String,
    pub file_key: [u8; 16],
    pub nonce: [u8; 8],
    /// Completion token, once the service has reported the file complete.
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ResumeState {
    pub remote: String,
    pub local: String,
    pub size: u64,
    /// Content identity: source fingerprint for uploads, node key for downloads.
    pub identity: String,
    /// MACs of chunks `0..k`, where `k` is the high-water mark.
    pub acknowledged: Vec<[u8; 16]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload: Option<UploadResume>,
    pub created_at: u64,
}

impl ResumeState {
    pub fn new(key: &CheckpointKey, size: u64, identity: impl Into<String>) -> Self {
        Self {
            remote: key.remote.clone(),
            local: key.local.clone(),
            size,
            identity: identity.into(),
            acknowledged: Vec::new(),
            upload: None,
            created_at: now_secs(),
        }
    }

    /// Usable for a transfer of `size` bytes with the given content identity.
    pub fn is_valid_for(&self, size: u64, identity: &str) -> bool {
        let age = now_secs().saturating_sub(self.created_at);
        self.size == size && self.identity == identity && age < MAX_CHECKPOINT_AGE.as_secs()
    }
}

/// Identifies one transfer: the same remote object moved to or from the same local target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CheckpointKey {
    pub remote: String,
    pub local: String,
}

impl CheckpointKey {
    pub fn new(remote: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
            local: local.into(),
        }
    }

    /// Stable name shared by the checkpoint and the staging file.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.remote.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.local.as_bytes());
        hex::encode(&hasher.finalize()[..16])
    }

    fn file_name(&self) -> String {
        format!("{}.resume.json", self.digest())
    }
}

/// Checkpoint keys of the transfers currently running in a session.
///
/// Only one transfer may own a key's checkpoint and staging file; a second
/// one with the same key runs without them.
#[derive(Debug, Clone, Default)]
pub(crate) struct ActiveTransfers {
    keys: Arc<Mutex<HashSet<CheckpointKey>>>,
}

impl ActiveTransfers {
    /// Claim `key`, or `None` while another transfer holds it.
    pub fn claim(&self, key: &CheckpointKey) -> Option<TransferLease> {
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        if !keys.insert(key.clone()) {
            debug!(remote = %key.remote, "checkpoint already in use");
            return None;
        }
        Some(TransferLease {
            keys: self.keys.clone(),
            key: key.clone(),
        })
    }
}

/// Ownership of a checkpoint key; released on drop.
#[derive(Debug)]
pub(crate) struct TransferLease {
    keys: Arc<Mutex<HashSet<CheckpointKey>>>,
    key: CheckpointKey,
}

impl Drop for TransferLease {
    fn drop(&mut self) {
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        keys.remove(&self.key);
    }
}

/// Directory of checkpoint files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResumeStore {
    dir: PathBuf,
}

impl ResumeStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &CheckpointKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Load the checkpoint for `key`. Unreadable checkpoints are discarded.
    pub async fn load(&self, key: &CheckpointKey) -> Option<ResumeState> {
        let path = self.path_for(key);
        let json = match tokio::fs::read(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read checkpoint");
                return None;
            }
        };
        match serde_json::from_slice::<ResumeState>(&json) {
            Ok(state) if state.remote == key.remote && state.local == key.local => Some(state),
            Ok(_) => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "discarding corrupt checkpoint");
                self.remove(key).await;
                None
            }
        }
    }

    pub async fn save(&self, state: &ResumeState) -> Result<()> {
        let key = CheckpointKey::new(&state.remote, &state.local);
        let path = self.path_for(&key);
        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(state)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(chunks = state.acknowledged.len(), "checkpoint saved");
        Ok(())
    }

    pub async fn remove(&self, key: &CheckpointKey) {
        let path = self.path_for(key);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "cannot remove checkpoint");
            }
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResumeStore::new(dir.path());
        let key = CheckpointKey::new("ROOT/report.pdf", "/tmp/report.pdf");

        assert!(store.load(&key).await.is_none());

        let mut state = ResumeState::new(&key, 4096, "fingerprint");
        state.acknowledged = vec![[1u8; 16], [2u8; 16]];
        state.upload = Some(UploadResume {
            upload_url: "https://upload.example/xyz".to_string(),
            file_key: [3u8; 16],
            nonce: [4u8; 8],
            token: None,
        });
        store.save(&state).await.unwrap();

        let loaded = store.load(&key).await.unwrap();
        assert_eq!(loaded, state);

        let other = CheckpointKey::new("ROOT/report.pdf", "/tmp/other.pdf");
        assert!(store.load(&other).await.is_none());

        store.remove(&key).await;
        assert!(store.load(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResumeStore::new(dir.path());
        let key = CheckpointKey::new("a", "b");
        std::fs::write(dir.path().join(key.file_name()), b"{not json").unwrap();
        assert!(store.load(&key).await.is_none());
        assert!(!dir.path().join(key.file_name()).exists());
    }

    #[test]
    fn test_lease_is_exclusive_until_dropped() {
        let active = ActiveTransfers::default();
        let key = CheckpointKey::new("H1", "/tmp/a");
        let lease = active.claim(&key).unwrap();
        assert!(active.claim(&key).is_none());
        assert!(active.claim(&CheckpointKey::new("H1", "/tmp/b")).is_some());
        drop(lease);
        assert!(active.claim(&key).is_some());
    }

    #[test]
    fn test_digest_depends_on_both_sides() {
        let a = CheckpointKey::new("H1", "/tmp/a");
        assert_eq!(a.digest().len(), 32);
        assert_ne!(a.digest(), CheckpointKey::new("H1", "/tmp/b").digest());
        assert_ne!(a.digest(), CheckpointKey::new("H2", "/tmp/a").digest());
    }

    #[test]
    fn test_validity() {
        let key = CheckpointKey::new("a", "b");
        let mut state = ResumeState::new(&key, 100, "id");
        assert!(state.is_valid_for(100, "id"));
        assert!(!state.is_valid_for(101, "id"));
        assert!(!state.is_valid_for(100, "other"));
        state.created_at -= MAX_CHECKPOINT_AGE.as_secs() + 1;
        assert!(!state.is_valid_for(100, "id"));
    }
}
