//! Full tree fetch and reconciliation.

use std::collections::HashMap;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::base64::base64url_decode;
use crate::crypto::unwrap_key;
use crate::error::{MegaError, Result};
use crate::fs::contact::parse_contacts;
use crate::fs::tree::{FileSystemTree, RawNode};
use crate::session::Session;

/// Longest base64 form of an AES-wrapped 16-byte key; anything longer is RSA.
const AES_SHARE_KEY_B64_LEN: usize = 22;

impl Session {
    /// Fetch the whole node graph and swap in the new snapshot.
    ///
    /// The previous snapshot stays current until the response has been
    /// fully processed; a failed fetch leaves it untouched.
    pub(crate) async fn refresh(&mut self) -> Result<()> {
        let response = self.api.request(json!({"a": "f", "c": 1, "r": 1})).await?;
        let nodes = response
            .get("f")
            .and_then(Value::as_array)
            .ok_or(MegaError::InvalidResponse)?;

        self.absorb_share_keys(&response, nodes);
        let public_handles = public_handles(&response);

        let mut raws = Vec::with_capacity(nodes.len());
        let mut skipped = 0usize;
        for value in nodes {
            match serde_json::from_value::<RawNode>(value.clone()) {
                Ok(mut raw) => {
                    raw.public_handle = public_handles.get(&raw.handle).cloned();
                    raws.push(raw);
                }
                Err(e) => {
                    skipped += 1;
                    debug!(error = %e, "skipping unparsable node record");
                }
            }
        }
        if skipped > 0 {
            warn!(skipped, "some node records could not be parsed");
        }

        self.contacts = parse_contacts(&response, &self.user_handle);
        let tree = FileSystemTree::build(raws, self.keychain(), Some(&*self.tree));
        info!(
            nodes = tree.len(),
            version = tree.version(),
            contacts = self.contacts.len(),
            "tree refreshed"
        );
        self.commit(tree);
        Ok(())
    }

    /// Learn share keys from the `ok` array and from `sk` fields of inbound shares.
    fn absorb_share_keys(&mut self, response: &Value, nodes: &[Value]) {
        let owned = response
            .get("ok")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|ok| Some((ok.get("h")?.as_str()?, ok.get("k")?.as_str()?)));
        let inbound = nodes
            .iter()
            .filter_map(|n| Some((n.get("h")?.as_str()?, n.get("sk")?.as_str()?)));

        for (handle, wrapped) in owned.chain(inbound) {
            match self.decrypt_share_key(wrapped) {
                Some(key) => {
                    self.share_keys.insert(handle.to_string(), key);
                }
                None => debug!(handle, "cannot decrypt share key"),
            }
        }
    }

    fn decrypt_share_key(&self, wrapped_b64: &str) -> Option<[u8; 16]> {
        let wrapped = base64url_decode(wrapped_b64).ok()?;
        let plain = if wrapped_b64.len() > AES_SHARE_KEY_B64_LEN {
            self.rsa_key.as_ref()?.decrypt_key(&wrapped, 16).ok()?
        } else {
            unwrap_key(&wrapped, &self.master_key).ok()?
        };
        plain.get(..16)?.try_into().ok()
    }
}

/// `ph` entries map node handles to the public handles of their links.
fn public_handles(response: &Value) -> HashMap<String, String> {
    response
        .get("ph")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|e| {
            Some((
                e.get("h")?.as_str()?.to_string(),
                e.get("ph")?.as_str()?.to_string(),
            ))
        })
        .collect()
}
