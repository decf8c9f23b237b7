//! Node attribute blocks (`MEGA{json}` encrypted with AES-CBC).

use serde_json::{Map, Value};

use super::aes::{aes128_cbc_decrypt, aes128_cbc_encrypt};
use crate::base64::{base64url_decode, base64url_encode};
use crate::error::Result;

/// Decrypted node attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeAttributes {
    pub name: String,
    /// Remaining attribute fields (fingerprint, labels, ...), kept verbatim.
    pub extra: Map<String, Value>,
}

impl NodeAttributes {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extra: Map::new(),
        }
    }

    fn to_json(&self) -> String {
        let mut map = self.extra.clone();
        map.insert("n".to_string(), Value::String(self.name.clone()));
        Value::Object(map).to_string()
    }
}

/// Encrypt attributes under a 16-byte attribute key, returning base64.
pub fn encrypt_attributes(attrs: &NodeAttributes, key: &[u8; 16]) -> Result<String> {
    let mut plain = format!("MEGA{}", attrs.to_json()).into_bytes();
    let pad = (16 - plain.len() % 16) % 16;
    plain.resize(plain.len() + pad, 0);
    Ok(base64url_encode(&aes128_cbc_encrypt(&plain, key)?))
}

/// Decrypt a base64 attribute block. `None` means the key is wrong or the block is corrupt.
pub fn decrypt_attributes(attrs_b64: &str, key: &[u8; 16]) -> Option<NodeAttributes> {
    let encrypted = base64url_decode(attrs_b64).ok()?;
    let decrypted = aes128_cbc_decrypt(&encrypted, key).ok()?;
    let body = decrypted.strip_prefix(b"MEGA")?;
    let end = body.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
    let value: Value = serde_json::from_slice(&body[..end]).ok()?;
    let mut map = match value {
        Value::Object(map) => map,
        _ => return None,
    };
    let name = match map.remove("n") {
        Some(Value::String(name)) => name,
        _ => return None,
    };
    Some(NodeAttributes { name, extra: map })
}
