//! Structural mutations: mkdir, rename, move and remove.
//!
//! Each operation validates against the current snapshot, issues one API
//! command and, once the service has accepted it, commits the matching
//! change as a new snapshot.

use serde_json::{json, Value};
use tracing::info;

use crate::base64::base64url_encode;
use crate::crypto::{
    attribute_key, decrypt_attributes, encrypt_attributes, make_random_key, wrap_key,
    NodeAttributes,
};
use crate::error::{MegaError, Result};
use crate::fs::path::{normalize_path, split_parent, validate_name};
use crate::fs::tree::{RawNode, TreeChange};
use crate::fs::Node;
use crate::session::Session;

/// Placeholder handle for nodes created by `p`; the service assigns the real one.
pub(crate) const NEW_NODE_HANDLE: &str = "xxxxxxxx";

impl Session {
    /// Create a folder. The parent must exist; the name must be free.
    pub(crate) async fn mkdir(&mut self, path: &str) -> Result<Node> {
        let path = normalize_path(path);
        let (parent_path, name) = split_parent(&path)?;
        validate_name(&name)?;
        let parent = self.folder_at(&parent_path)?;
        if self.tree.child_named(&parent.handle, &name).is_some() {
            return Err(MegaError::AlreadyExists { path });
        }

        let folder_key = make_random_key();
        let attrs = encrypt_attributes(&NodeAttributes::named(&name), &folder_key)?;
        let wrapped = base64url_encode(&wrap_key(&folder_key, &self.master_key)?);
        let mut request = json!({
            "a": "p",
            "t": parent.handle,
            "n": [{"h": NEW_NODE_HANDLE, "t": 1, "a": attrs, "k": wrapped}],
        });
        let targets = [(NEW_NODE_HANDLE.to_string(), folder_key.to_vec())];
        if let Some(cr) = self.crypto_request(&parent.handle, &targets)? {
            request["cr"] = cr;
        }

        let response = self
            .api
            .request(request)
            .await
            .map_err(|e| e.with_path(&path))?;
        let raw = first_created(&response)?;
        let handle = raw.handle.clone();
        self.commit(self.tree.apply([TreeChange::Insert(raw)]));
        info!(%path, %handle, "folder created");
        self.tree
            .get(&handle)
            .ok_or(MegaError::InvalidResponse)
    }

    /// Rename a node in place.
    pub(crate) async fn rename(&mut self, path: &str, new_name: &str) -> Result<()> {
        validate_name(new_name)?;
        let node = self.node_at(path)?;
        if node.node_type.is_root_category() {
            return Err(MegaError::InvalidArgument(format!(
                "cannot rename root category {}",
                node.display_name()
            )));
        }
        let parent = node.parent_handle.clone().unwrap_or_default();
        if let Some(existing) = self.tree.child_named(&parent, new_name) {
            if existing != node.handle {
                return Err(MegaError::NameConflict {
                    parent: self.tree.path_of(&parent).unwrap_or(parent),
                    name: new_name.to_string(),
                });
            }
            return Ok(());
        }

        let key = attribute_key(node.key_bytes()).ok_or_else(|| {
            MegaError::Crypto(format!("no usable key for {}", node.display_name()))
        })?;
        // Keep attribute fields other than the name.
        let mut attrs = self
            .tree
            .raw(&node.handle)
            .and_then(|raw| decrypt_attributes(raw.attrs.as_deref()?, &key))
            .unwrap_or_else(|| NodeAttributes::named(new_name));
        attrs.name = new_name.to_string();
        let encrypted = encrypt_attributes(&attrs, &key)?;

        self.api
            .request(json!({"a": "a", "n": node.handle, "at": encrypted}))
            .await
            .map_err(|e| e.with_path(path))?;
        self.commit(self.tree.apply([TreeChange::SetAttributes {
            handle: node.handle.clone(),
            attrs: encrypted,
        }]));
        info!(path, new_name, "node renamed");
        Ok(())
    }

    /// Move a node into another folder, keeping its name.
    pub(crate) async fn mv(&mut self, source: &str, dest_folder: &str) -> Result<()> {
        let node = self.node_at(source)?;
        if node.node_type.is_root_category() {
            return Err(MegaError::InvalidArgument(format!(
                "cannot move root category {}",
                node.display_name()
            )));
        }
        let dest = self.folder_at(dest_folder)?;
        if node.parent_handle.as_deref() == Some(dest.handle.as_str()) {
            return Ok(());
        }
        if self.tree.subtree(&node.handle).contains(&dest.handle) {
            return Err(MegaError::InvalidArgument(format!(
                "cannot move {} into its own subtree",
                normalize_path(source)
            )));
        }
        if let Some(name) = &node.name {
            if self.tree.child_named(&dest.handle, name).is_some() {
                return Err(MegaError::NameConflict {
                    parent: normalize_path(dest_folder),
                    name: name.clone(),
                });
            }
        }

        self.api
            .request(json!({"a": "m", "n": node.handle, "t": dest.handle}))
            .await
            .map_err(|e| e.with_path(source))?;
        self.commit(self.tree.apply([TreeChange::Move {
            handle: node.handle.clone(),
            parent: dest.handle.clone(),
        }]));
        info!(source, dest_folder, "node moved");
        Ok(())
    }

    /// Remove a node and everything below it.
    ///
    /// The service deletes the subtree in one command, so either all of it
    /// goes or, on failure, the snapshot is left exactly as it was.
    pub(crate) async fn rm(&mut self, path: &str) -> Result<()> {
        let node = self.node_at(path)?;
        if node.node_type.is_root_category() {
            return Err(MegaError::InvalidArgument(format!(
                "cannot remove root category {}",
                node.display_name()
            )));
        }
        let removed = self.tree.subtree(&node.handle).len();
        self.api
            .request(json!({"a": "d", "n": node.handle}))
            .await
            .map_err(|e| e.with_path(path))?;
        self.commit(self.tree.apply([TreeChange::RemoveSubtree(node.handle.clone())]));
        info!(path, removed, "subtree removed");
        Ok(())
    }
}

/// First node record of a `p` response.
pub(crate) fn first_created(response: &Value) -> Result<RawNode> {
    let value = response
        .get("f")
        .and_then(Value::as_array)
        .and_then(|f| f.first())
        .ok_or(MegaError::InvalidResponse)?;
    serde_json::from_value(value.clone()).map_err(|_| MegaError::InvalidResponse)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_created() {
        let response = json!({"f": [{"h": "NEWHNDL1", "p": "ROOT", "t": 1, "a": "x", "k": "u:k", "ts": 5}]});
        let raw = first_created(&response).unwrap();
        assert_eq!(raw.handle, "NEWHNDL1");
        assert_eq!(raw.parent.as_deref(), Some("ROOT"));
        assert!(matches!(
            first_created(&json!({"f": []})),
            Err(MegaError::InvalidResponse)
        ));
    }
}
