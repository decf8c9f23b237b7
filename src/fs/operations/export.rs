//! Export and public link operations.

use serde_json::{json, Value};
use tracing::info;

use crate::api::ApiErrorCode;
use crate::error::{MegaError, Result};
use crate::fs::node::NodeType;
use crate::fs::path::normalize_path;
use crate::fs::tree::{FileSystemTree, TreeChange};
use crate::link::{LinkKind, PublicLink};
use crate::session::Session;

/// Pseudo-user that public folder shares are granted to.
const EXPORT_USER: &str = "EXP";

impl Session {
    /// Export a file or folder and return its public link.
    ///
    /// Files link with their node key. Folders are first shared with the
    /// export pseudo-user; the share key (the folder key unless the folder
    /// was already shared) travels in the link and every node key in the
    /// subtree is made available under it.
    pub(crate) async fn export(&mut self, path: &str) -> Result<String> {
        let node = self.node_at(path)?;
        let (kind, key, new_share) = match node.node_type {
            NodeType::File => (LinkKind::File, node.key_bytes().to_vec(), None),
            NodeType::Folder => {
                let folder_key: [u8; 16] = node.key_bytes().try_into().map_err(|_| {
                    MegaError::Crypto(format!("no usable key for {}", node.display_name()))
                })?;
                match self.share_keys.get(&node.handle) {
                    Some(existing) => (LinkKind::Folder, existing.to_vec(), None),
                    None => (LinkKind::Folder, folder_key.to_vec(), Some(folder_key)),
                }
            }
            _ => {
                return Err(MegaError::InvalidArgument(format!(
                    "cannot export root category {}",
                    node.display_name()
                )))
            }
        };
        if kind == LinkKind::File && key.len() != kind.key_len() {
            return Err(MegaError::Crypto(format!(
                "no usable key for {}",
                node.display_name()
            )));
        }

        if let Some(share_key) = new_share {
            self.send_share(&node.handle, json!({"u": EXPORT_USER, "r": 0}), &share_key)
                .await
                .map_err(|e| e.with_path(path))?;
        }

        let response = self
            .api
            .request(json!({"a": "l", "n": node.handle}))
            .await
            .map_err(|e| e.with_path(path))?;
        let public_handle = response
            .as_str()
            .ok_or(MegaError::InvalidResponse)?
            .to_string();

        let mut next = self.tree.apply([TreeChange::SetPublicHandle {
            handle: node.handle.clone(),
            public_handle: Some(public_handle.clone()),
        }]);
        if let Some(share_key) = new_share {
            self.share_keys.insert(node.handle.clone(), share_key);
            next = FileSystemTree::build(next.raw_nodes(), self.keychain(), Some(&next));
        }
        self.commit(next);

        let link = PublicLink::new(kind, public_handle, key)?;
        info!(path, "node exported");
        Ok(link.encode())
    }

    /// Export several files in one round trip. Returns `(path, url)` pairs in
    /// input order; the first per-file failure is reported after the
    /// successful exports have been recorded.
    pub(crate) async fn export_many(&mut self, paths: &[String]) -> Result<Vec<(String, String)>> {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let node = self.node_at(path)?;
            if !node.is_file() {
                return Err(MegaError::InvalidArgument(format!(
                    "{} is not a file; export folders one at a time",
                    normalize_path(path)
                )));
            }
            files.push((normalize_path(path), node));
        }
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let requests = files
            .iter()
            .map(|(_, node)| json!({"a": "l", "n": node.handle}))
            .collect();
        let replies = self.api.request_batch(requests).await?;

        let mut changes = Vec::new();
        let mut links = Vec::new();
        let mut first_error = None;
        for ((path, node), reply) in files.into_iter().zip(replies) {
            match reply {
                Value::String(ph) => {
                    changes.push(TreeChange::SetPublicHandle {
                        handle: node.handle.clone(),
                        public_handle: Some(ph.clone()),
                    });
                    match PublicLink::new(LinkKind::File, ph, node.key_bytes().to_vec()) {
                        Ok(link) => links.push((path, link.encode())),
                        Err(e) => {
                            first_error.get_or_insert(e);
                        }
                    }
                }
                other => {
                    let code = other.as_i64().unwrap_or(ApiErrorCode::Unknown as i64);
                    first_error.get_or_insert_with(|| {
                        ApiErrorCode::from(code).into_error(code).with_path(&path)
                    });
                }
            }
        }
        if !changes.is_empty() {
            self.commit(self.tree.apply(changes));
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(links),
        }
    }
}
