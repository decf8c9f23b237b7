//! Versioned session blob.
//!
//! Layout: the magic `MGCS`, a big-endian `u16` format version, a JSON body
//! and a SHA-256 digest over everything before it. The body carries what is
//! needed to resume without logging in again: the session id, the master key
//! (plain, or wrapped under a caller-provided local key), the account
//! identity, the cached node records and the transfer configuration.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::api::{ApiClient, Transport};
use crate::base64::{base64url_decode, base64url_decode_array, base64url_encode};
use crate::crypto::{aes128_ecb_encrypt, unwrap_key, wrap_key, MegaRsaKey};
use crate::error::{AuthError, MegaError, PersistenceError, Result};
use crate::fs::tree::{FileSystemTree, RawNode};
use crate::transfer::TransferConfig;

use super::core::Session;

const MAGIC: &[u8; 4] = b"MGCS";
/// Session blob format written by this version of the crate.
pub const SESSION_FORMAT_VERSION: u16 = 1;
const HEADER_LEN: usize = 6;
const DIGEST_LEN: usize = 32;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum StoredMasterKey {
    Plain { key: String },
    /// Wrapped under a local key; `check` identifies the right local key.
    Wrapped { key: String, check: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionBody {
    session_id: String,
    master_key: StoredMasterKey,
    user_handle: String,
    email: String,
    #[serde(default)]
    name: Option<String>,
    /// RSA private key, AES-ECB under the master key as `privk` is.
    #[serde(default)]
    private_key: Option<String>,
    /// Share keys wrapped under the master key.
    #[serde(default)]
    share_keys: BTreeMap<String, String>,
    nodes: Vec<RawNode>,
    tree_version: u64,
    #[serde(default)]
    config: TransferConfig,
}

fn malformed(msg: impl Into<String>) -> MegaError {
    PersistenceError::Malformed(msg.into()).into()
}

fn key_check(master_key: &[u8; 16]) -> String {
    hex::encode(&Sha256::digest(master_key)[..8])
}

impl Session {
    /// Serialize this session. With `local_key`, the master key is stored
    /// wrapped and the blob can only be loaded with the same key.
    pub(crate) fn to_blob(&self, local_key: Option<&[u8; 16]>) -> Result<Vec<u8>> {
        let session_id = self
            .session_id()
            .ok_or(MegaError::Auth(AuthError::SessionExpired))?
            .to_string();
        let master_key = match local_key {
            Some(local) => StoredMasterKey::Wrapped {
                key: base64url_encode(&wrap_key(&self.master_key, local)?),
                check: key_check(&self.master_key),
            },
            None => StoredMasterKey::Plain {
                key: base64url_encode(&self.master_key),
            },
        };
        let private_key = match &self.rsa_key {
            Some(rsa) => {
                let mut mpis = rsa.to_private_mpis();
                mpis.resize(mpis.len().div_ceil(16) * 16, 0);
                Some(base64url_encode(&aes128_ecb_encrypt(&mpis, &self.master_key)?))
            }
            None => None,
        };
        let mut share_keys = BTreeMap::new();
        for (handle, key) in &self.share_keys {
            share_keys.insert(
                handle.clone(),
                base64url_encode(&wrap_key(key, &self.master_key)?),
            );
        }

        let body = SessionBody {
            session_id,
            master_key,
            user_handle: self.user_handle.clone(),
            email: self.email.clone(),
            name: self.name.clone(),
            private_key,
            share_keys,
            nodes: self.tree.raw_nodes(),
            tree_version: self.tree.version(),
            config: self.config.clone(),
        };

        let mut blob = Vec::new();
        blob.extend_from_slice(MAGIC);
        blob.extend_from_slice(&SESSION_FORMAT_VERSION.to_be_bytes());
        serde_json::to_writer(&mut blob, &body)?;
        let digest = Sha256::digest(&blob);
        blob.extend_from_slice(&digest);
        debug!(bytes = blob.len(), nodes = body.nodes.len(), "session serialized");
        Ok(blob)
    }

    /// Rebuild a session from a blob. Nothing is sent to the service.
    pub(crate) fn from_blob(
        blob: &[u8],
        local_key: Option<&[u8; 16]>,
        transport: Arc<dyn Transport>,
    ) -> Result<Session> {
        if blob.len() < MAGIC.len() || &blob[..MAGIC.len()] != MAGIC {
            return Err(PersistenceError::BadMagic.into());
        }
        if blob.len() < HEADER_LEN + DIGEST_LEN {
            return Err(malformed("truncated"));
        }
        let found = u16::from_be_bytes([blob[4], blob[5]]);
        if found != SESSION_FORMAT_VERSION {
            return Err(PersistenceError::UnsupportedVersion {
                found,
                supported: SESSION_FORMAT_VERSION,
            }
            .into());
        }
        let (content, digest) = blob.split_at(blob.len() - DIGEST_LEN);
        if Sha256::digest(content).as_slice() != digest {
            return Err(PersistenceError::Corrupt.into());
        }
        let body: SessionBody = serde_json::from_slice(&content[HEADER_LEN..])
            .map_err(|e| malformed(e.to_string()))?;

        let master_key = match (&body.master_key, local_key) {
            (StoredMasterKey::Plain { key }, _) => {
                base64url_decode_array::<16>(key).ok_or_else(|| malformed("master key"))?
            }
            (StoredMasterKey::Wrapped { .. }, None) => {
                return Err(PersistenceError::LocalKeyRequired.into())
            }
            (StoredMasterKey::Wrapped { key, check }, Some(local)) => {
                let wrapped = base64url_decode(key).map_err(|_| malformed("master key"))?;
                let master: [u8; 16] = unwrap_key(&wrapped, local)
                    .ok()
                    .and_then(|k| k.try_into().ok())
                    .ok_or_else(|| malformed("master key"))?;
                if key_check(&master) != *check {
                    return Err(PersistenceError::WrongLocalKey.into());
                }
                master
            }
        };

        let rsa_key = match &body.private_key {
            Some(privk) => Some(
                MegaRsaKey::from_encrypted(privk, &master_key)
                    .map_err(|_| malformed("private key"))?,
            ),
            None => None,
        };

        let mut api = ApiClient::new(transport);
        api.set_session_id(body.session_id);
        let mut session = Session::new(api, master_key, body.user_handle, body.email, body.name);
        session.rsa_key = rsa_key;
        for (handle, wrapped) in &body.share_keys {
            let wrapped = base64url_decode(wrapped).map_err(|_| malformed("share key"))?;
            let key: [u8; 16] = unwrap_key(&wrapped, &master_key)
                .ok()
                .and_then(|k| k.try_into().ok())
                .ok_or_else(|| malformed("share key"))?;
            session.share_keys.insert(handle.clone(), key);
        }
        session.apply_config(body.config);
        let tree = FileSystemTree::restore(body.nodes, session.keychain(), body.tree_version);
        session.commit(tree);
        Ok(session)
    }
}
