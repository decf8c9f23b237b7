//! Sharing folders with other users.

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::base64::{base64url_decode, base64url_encode};
use crate::crypto::{aes128_ecb_encrypt_block, wrap_key, RsaPublicKey};
use crate::error::{MegaError, Result};
use crate::fs::contact::AccessLevel;
use crate::fs::node::NodeType;
use crate::fs::tree::FileSystemTree;
use crate::session::core::share_crypto_request;
use crate::session::Session;

impl Session {
    /// Share the folder at `path` with the user `email`.
    ///
    /// The share key is the folder key unless the folder is already shared.
    /// The recipient receives it under their RSA key, we keep it under the
    /// master key, and the keys of everything below the folder are wrapped
    /// with it in a `cr` block.
    pub(crate) async fn share_folder(
        &mut self,
        path: &str,
        email: &str,
        level: AccessLevel,
    ) -> Result<()> {
        let node = self.node_at(path)?;
        if node.node_type != NodeType::Folder {
            return Err(MegaError::InvalidArgument(format!(
                "{} is not a folder",
                node.display_name()
            )));
        }
        let existing = self.share_keys.get(&node.handle).copied();
        let share_key = match existing {
            Some(key) => key,
            None => node.key_bytes().try_into().map_err(|_| {
                MegaError::Crypto(format!("no usable key for {}", node.display_name()))
            })?,
        };

        let recipient = self
            .public_key_of(email)
            .await
            .map_err(|e| e.with_path(email))?;
        let grant = json!({
            "u": email,
            "r": level as i64,
            "k": base64url_encode(&recipient.encrypt_key(&share_key)?),
        });
        self.send_share(&node.handle, grant, &share_key)
            .await
            .map_err(|e| e.with_path(path))?;

        if existing.is_none() {
            self.share_keys.insert(node.handle.clone(), share_key);
            let previous = self.tree.clone();
            let next =
                FileSystemTree::build(previous.raw_nodes(), self.keychain(), Some(&*previous));
            self.commit(next);
        }
        info!(path, email, ?level, "folder shared");
        Ok(())
    }

    /// Send an `s2` granting `user` access to `handle` under `share_key`.
    pub(crate) async fn send_share(
        &self,
        handle: &str,
        user: Value,
        share_key: &[u8; 16],
    ) -> Result<()> {
        let targets = self.subtree_keys(handle);
        debug!(handle, nodes = targets.len(), "sending share");
        let request = json!({
            "a": "s2",
            "n": handle,
            "s": [user],
            "ok": base64url_encode(&wrap_key(share_key, &self.master_key)?),
            "ha": share_authenticator(handle, &self.master_key),
            "cr": share_crypto_request(handle, share_key, &targets)?,
        });
        self.api.request(request).await?;
        Ok(())
    }

    /// Node keys of `handle` and everything below it.
    fn subtree_keys(&self, handle: &str) -> Vec<(String, Vec<u8>)> {
        self.tree
            .subtree(handle)
            .into_iter()
            .filter_map(|h| {
                let key = self.tree.get(&h)?.key_bytes().to_vec();
                (!key.is_empty()).then_some((h, key))
            })
            .collect()
    }

    async fn public_key_of(&self, email: &str) -> Result<RsaPublicKey> {
        let response = self.api.request(json!({"a": "uk", "u": email})).await?;
        let pubk = response
            .get("pubk")
            .and_then(Value::as_str)
            .ok_or(MegaError::InvalidResponse)?;
        RsaPublicKey::from_mpis(&base64url_decode(pubk)?)
    }
}

/// Proof of share ownership: the handle, repeated to a block, under the master key.
fn share_authenticator(handle: &str, master_key: &[u8; 16]) -> String {
    let mut block = [0u8; 16];
    for (dst, src) in block.iter_mut().zip(handle.bytes().cycle()) {
        *dst = src;
    }
    base64url_encode(&aes128_ecb_encrypt_block(&block, master_key))
}
