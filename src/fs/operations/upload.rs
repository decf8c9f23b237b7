//! Upload registration.
//!
//! An upload is split in two commands around the transfer engine: the
//! session hands out an upload URL, file key and checkpoint, the chunks are
//! sent outside the actor, and the finished upload comes back to be
//! registered as a node.

use bytes::Bytes;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::base64::base64url_encode;
use crate::crypto::{
    attribute_key, encrypt_attributes, make_random_key, make_random_nonce, pack_node_key,
    wrap_key, NodeAttributes,
};
use crate::error::{MegaError, Result};
use crate::fs::path::{normalize_path, validate_name};
use crate::fs::tree::TreeChange;
use crate::fs::Node;
use crate::preview::{encrypt_file_attribute, THUMBNAIL_ATTR};
use crate::session::Session;
use crate::transfer::resume::{CheckpointKey, ResumeState, TransferLease, UploadResume};
use crate::transfer::upload::{UploadOutcome, UploadTask};
use crate::transfer::TransferContext;

use super::dir_ops::first_created;

/// What to upload and where.
#[derive(Debug, Clone)]
pub(crate) struct UploadRequest {
    pub remote_folder: String,
    pub name: String,
    pub size: u64,
    /// Names the source; part of the checkpoint key.
    pub local: String,
    /// Source fingerprint; a checkpoint is only reused for the same one.
    pub identity: String,
}

/// Everything needed to run an upload outside the session.
#[derive(Debug)]
pub(crate) struct PreparedUpload {
    pub task: UploadTask,
    pub ctx: TransferContext,
    pub parent: String,
    pub previews: bool,
    /// Held until the node is registered; `None` if the same upload is
    /// already running, in which case nothing is checkpointed.
    pub lease: Option<TransferLease>,
}

impl Session {
    /// Reserve the upload described by `request`. With `fresh` any
    /// checkpoint for it is discarded first.
    pub(crate) async fn prepare_upload(
        &self,
        request: &UploadRequest,
        fresh: bool,
        cancel: CancellationToken,
    ) -> Result<PreparedUpload> {
        let UploadRequest {
            remote_folder,
            name,
            size,
            local,
            identity,
        } = request;
        let (name, size) = (name.as_str(), *size);
        validate_name(name)?;
        let parent = self.folder_at(remote_folder)?;
        self.ensure_free(&parent.handle, remote_folder, name)?;

        let remote = format!("{}/{}", normalize_path(remote_folder), name);
        let key = CheckpointKey::new(remote, local.as_str());
        let (ctx, lease) = self.transfer_context(&key, cancel);
        let resumed = match &ctx.resume {
            Some(store) if fresh => {
                store.remove(&key).await;
                None
            }
            Some(store) => store
                .load(&key)
                .await
                .filter(|s| s.is_valid_for(size, identity) && s.upload.is_some()),
            None => None,
        };

        let state = match resumed {
            Some(state) => {
                debug!(name, chunks = state.acknowledged.len(), "reusing upload checkpoint");
                state
            }
            None => {
                let response = self.api.request(json!({"a": "u", "s": size})).await?;
                let upload_url = response
                    .get("p")
                    .and_then(|p| p.as_str())
                    .ok_or(MegaError::InvalidResponse)?
                    .to_string();
                let mut state = ResumeState::new(&key, size, identity);
                state.upload = Some(UploadResume {
                    upload_url,
                    file_key: make_random_key(),
                    nonce: make_random_nonce(),
                    token: None,
                });
                state
            }
        };

        Ok(PreparedUpload {
            task: UploadTask {
                name: name.to_string(),
                size,
                key,
                state,
            },
            ctx,
            parent: parent.handle,
            previews: self.config.previews,
            lease,
        })
    }

    /// Register a completed upload as a file node under `parent`.
    pub(crate) async fn finalize_upload(
        &mut self,
        parent: &str,
        name: &str,
        outcome: UploadOutcome,
        thumbnail: Option<Vec<u8>>,
        checkpoint: Option<&CheckpointKey>,
    ) -> Result<Node> {
        let parent_path = self.tree.path_of(parent).ok_or_else(|| {
            MegaError::not_found(format!("upload target of {}", name))
        })?;
        self.ensure_free(parent, &parent_path, name)?;

        let node_key = pack_node_key(&outcome.file_key, &outcome.nonce, &outcome.meta_mac);
        let attr_key = attribute_key(&node_key).ok_or_else(|| {
            MegaError::Crypto("cannot derive attribute key".to_string())
        })?;
        let attrs = encrypt_attributes(&NodeAttributes::named(name), &attr_key)?;
        let wrapped = base64url_encode(&wrap_key(&node_key, &self.master_key)?);

        let mut entry = json!({"h": outcome.token, "t": 0, "a": attrs, "k": wrapped});
        if let Some(data) = thumbnail {
            match self.upload_thumbnail(&data, &outcome.file_key).await {
                Ok(fa) => entry["fa"] = json!(fa),
                Err(e) => warn!(name, error = %e, "thumbnail upload failed, continuing without"),
            }
        }
        let mut request = json!({"a": "p", "t": parent, "n": [entry]});
        let targets = [(outcome.token.clone(), node_key.to_vec())];
        if let Some(cr) = self.crypto_request(parent, &targets)? {
            request["cr"] = cr;
        }

        let response = self.api.request(request).await?;
        let raw = first_created(&response)?;
        let handle = raw.handle.clone();
        self.commit(self.tree.apply([TreeChange::Insert(raw)]));
        if let (Some(store), Some(key)) = (self.config.resume_store(), checkpoint) {
            store.remove(key).await;
        }
        info!(name, %handle, parent = %parent_path, "upload registered");
        self.tree.get(&handle).ok_or(MegaError::InvalidResponse)
    }

    /// Encrypt and store a thumbnail; returns the `fa` attribute reference.
    async fn upload_thumbnail(&self, jpeg: &[u8], file_key: &[u8; 16]) -> Result<String> {
        let encrypted = encrypt_file_attribute(jpeg, file_key)?;
        let response = self
            .api
            .request(json!({"a": "ufa", "s": encrypted.len(), "ssl": 0}))
            .await?;
        let url = response
            .get("p")
            .and_then(|p| p.as_str())
            .ok_or(MegaError::InvalidResponse)?;
        let handle = self
            .api
            .transport()
            .upload_file_attribute(url, Bytes::from(encrypted))
            .await?;
        if handle.len() != 8 {
            return Err(MegaError::InvalidResponse);
        }
        Ok(format!("{}*{}", THUMBNAIL_ATTR, base64url_encode(&handle)))
    }

    fn ensure_free(&self, parent: &str, parent_path: &str, name: &str) -> Result<()> {
        if self.tree.child_named(parent, name).is_some() {
            return Err(MegaError::NameConflict {
                parent: normalize_path(parent_path),
                name: name.to_string(),
            });
        }
        Ok(())
    }
}
