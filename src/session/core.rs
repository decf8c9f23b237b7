//! Session state owned by the session actor.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::ApiClient;
use crate::base64::base64url_encode;
use crate::crypto::{wrap_key, MegaRsaKey};
use crate::error::Result;
use crate::fs::contact::Contact;
use crate::fs::tree::{FileSystemTree, Keychain};
use crate::progress::{ProgressCallback, ProgressSink};
use crate::transfer::pool::WorkerPool;
use crate::transfer::resume::{ActiveTransfers, CheckpointKey, TransferLease};
use crate::transfer::{TransferConfig, TransferContext, MAX_WORKERS, MIN_WORKERS};

/// Identity of the logged-in account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub email: String,
    pub name: Option<String>,
    pub user_handle: String,
}

/// Authenticated MEGA session.
///
/// Only the session actor touches this; everyone else sees the published
/// tree snapshot.
pub(crate) struct Session {
    pub(crate) api: ApiClient,
    pub(crate) master_key: [u8; 16],
    pub(crate) user_handle: String,
    pub(crate) email: String,
    pub(crate) name: Option<String>,
    /// Present after a password login on accounts with an RSA key.
    pub(crate) rsa_key: Option<MegaRsaKey>,
    /// Share keys by folder handle, including the ones of our own exports.
    pub(crate) share_keys: HashMap<String, [u8; 16]>,
    pub(crate) tree: Arc<FileSystemTree>,
    pub(crate) contacts: Vec<Contact>,
    pub(crate) config: TransferConfig,
    progress: ProgressSink,
    pool: WorkerPool,
    active: ActiveTransfers,
}

impl Session {
    pub(crate) fn new(
        api: ApiClient,
        master_key: [u8; 16],
        user_handle: String,
        email: String,
        name: Option<String>,
    ) -> Self {
        let config = TransferConfig::default();
        Session {
            api,
            master_key,
            user_handle,
            email,
            name,
            rsa_key: None,
            share_keys: HashMap::new(),
            tree: Arc::new(FileSystemTree::default()),
            contacts: Vec::new(),
            pool: WorkerPool::new(config.workers),
            config,
            progress: ProgressSink::default(),
            active: ActiveTransfers::default(),
        }
    }

    pub(crate) fn session_id(&self) -> Option<&str> {
        self.api.session_id()
    }

    pub(crate) fn account_info(&self) -> AccountInfo {
        AccountInfo {
            email: self.email.clone(),
            name: self.name.clone(),
            user_handle: self.user_handle.clone(),
        }
    }

    /// Keys able to unwrap node keys of this account.
    pub(crate) fn keychain(&self) -> Keychain {
        let mut keychain = Keychain::new(&self.user_handle, self.master_key);
        keychain.share_keys = self.share_keys.clone();
        keychain
    }

    /// Replace the current snapshot.
    pub(crate) fn commit(&mut self, tree: FileSystemTree) {
        debug!(version = tree.version(), nodes = tree.len(), "tree snapshot committed");
        self.tree = Arc::new(tree);
    }

    /// Clamp and apply a new worker count. Running transfers keep their pool.
    pub(crate) fn set_workers(&mut self, workers: usize) {
        let workers = workers.clamp(MIN_WORKERS, MAX_WORKERS);
        if workers != self.pool.size() {
            self.pool = WorkerPool::new(workers);
        }
        self.config.workers = workers;
    }

    pub(crate) fn set_resume(&mut self, enabled: bool) {
        self.config.resume = enabled;
    }

    pub(crate) fn enable_previews(&mut self, enabled: bool) {
        self.config.previews = enabled;
    }

    pub(crate) fn apply_config(&mut self, config: TransferConfig) {
        let workers = config.workers;
        self.config = config;
        self.set_workers(workers);
    }

    pub(crate) fn watch_status(&mut self, callback: ProgressCallback) {
        self.progress = ProgressSink::new(callback);
    }

    pub(crate) fn clear_status(&mut self) {
        self.progress = ProgressSink::default();
    }

    /// Everything the transfer keyed by `key` needs, frozen at the moment it
    /// starts. While another transfer holds the key no lease is returned and
    /// the context carries no checkpoint store.
    pub(crate) fn transfer_context(
        &self,
        key: &CheckpointKey,
        cancel: CancellationToken,
    ) -> (TransferContext, Option<TransferLease>) {
        let lease = self.active.claim(key);
        let ctx = TransferContext {
            transport: self.api.transport().clone(),
            pool: self.pool.clone(),
            retry: self.config.retry,
            progress: self.progress.clone(),
            resume: lease.as_ref().and_then(|_| self.config.resume_store()),
            cancel,
        };
        (ctx, lease)
    }

    /// Nearest folder at or above `handle` that carries a share key.
    pub(crate) fn share_for(&self, handle: &str) -> Option<(String, [u8; 16])> {
        let mut current = self.tree.raw(handle)?;
        loop {
            if let Some(key) = self.share_keys.get(&current.handle) {
                return Some((current.handle.clone(), *key));
            }
            current = self.tree.raw(current.parent.as_deref()?)?;
        }
    }

    /// `cr` block giving sharees of `parent`'s share access to new node keys.
    ///
    /// Layout: `[[share], [nodes...], [share_index, node_index, wrapped_key, ...]]`.
    pub(crate) fn crypto_request(
        &self,
        parent: &str,
        targets: &[(String, Vec<u8>)],
    ) -> Result<Option<Value>> {
        let Some((share, share_key)) = self.share_for(parent) else {
            return Ok(None);
        };
        share_crypto_request(&share, &share_key, targets).map(Some)
    }
}

pub(crate) fn share_crypto_request(
    share: &str,
    share_key: &[u8; 16],
    targets: &[(String, Vec<u8>)],
) -> Result<Value> {
    let mut keys = Vec::with_capacity(targets.len() * 3);
    for (i, (_, key)) in targets.iter().enumerate() {
        keys.push(json!(0));
        keys.push(json!(i));
        keys.push(json!(base64url_encode(&wrap_key(key, share_key)?)));
    }
    let handles: Vec<&str> = targets.iter().map(|(h, _)| h.as_str()).collect();
    Ok(json!([[share], handles, keys]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::unwrap_key;
    use crate::base64::base64url_decode;

    #[test]
    fn test_share_crypto_request_layout() {
        let share_key = [4u8; 16];
        let cr = share_crypto_request(
            "SHARE001",
            &share_key,
            &[("AAAAAAAA".into(), vec![1u8; 16]), ("BBBBBBBB".into(), vec![2u8; 32])],
        )
        .unwrap();
        assert_eq!(cr[0], json!(["SHARE001"]));
        assert_eq!(cr[1], json!(["AAAAAAAA", "BBBBBBBB"]));
        let triples = cr[2].as_array().unwrap();
        assert_eq!(triples.len(), 6);
        assert_eq!(triples[3], json!(0));
        assert_eq!(triples[4], json!(1));
        let wrapped = base64url_decode(triples[5].as_str().unwrap()).unwrap();
        assert_eq!(unwrap_key(&wrapped, &share_key).unwrap(), vec![2u8; 32]);
    }
}
