//! Key derivation, node-key packing and key wrapping.
//!
//! The password KDF here is MEGA's legacy scheme, not a general-purpose KDF.

use super::aes::{aes128_ecb_decrypt, aes128_ecb_encrypt, aes128_ecb_encrypt_block};
use super::mac::condense_mac;
use crate::error::{MegaError, Result};

/// Pack a password into the big-endian word layout the legacy KDF expects.
///
/// UTF-16 code units up to 0xFF become one byte, wider units two bytes; the
/// result is zero-padded to a 4-byte boundary. Returns the bytes and the
/// number of code units.
fn password_to_a32_bytes(password: &str) -> (Vec<u8>, usize) {
    let code_units: Vec<u16> = password.encode_utf16().collect();
    let mut bytes = Vec::with_capacity(code_units.len() * 2);
    for cu in &code_units {
        if *cu <= 0x00FF {
            bytes.push(*cu as u8);
        } else {
            bytes.extend_from_slice(&cu.to_be_bytes());
        }
    }
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    (bytes, code_units.len())
}

/// Legacy (v1) password key: 65,536 rounds of AES keyed by 16-byte password slices.
pub fn make_password_key(password: &str) -> [u8; 16] {
    let (password_bytes, len_units) = password_to_a32_bytes(password);
    let mut pkey: [u8; 16] = [
        0x93, 0xC4, 0x67, 0xE3, 0x7D, 0xB0, 0xC7, 0xA4, 0xD1, 0xBE, 0x3F, 0x81, 0x01, 0x52, 0xCB,
        0x56,
    ];

    if len_units == 0 {
        return pkey;
    }

    let keys: Vec<[u8; 16]> = password_bytes
        .chunks(16)
        .map(|chunk| {
            let mut key = [0u8; 16];
            key[..chunk.len()].copy_from_slice(chunk);
            key
        })
        .collect();

    for _ in 0..65536 {
        for key in &keys {
            pkey = aes128_ecb_encrypt_block(&pkey, key);
        }
    }
    pkey
}

/// Legacy (v1) login hash of the lowercase email under the password key.
pub fn make_username_hash(username: &str, key: &[u8; 16]) -> [u8; 8] {
    let mut hash = [0u8; 16];
    for (i, &byte) in username.as_bytes().iter().enumerate() {
        hash[i % 16] ^= byte;
    }

    for _ in 0..16384 {
        hash = aes128_ecb_encrypt_block(&hash, key);
    }

    let mut result = [0u8; 8];
    result[..4].copy_from_slice(&hash[..4]);
    result[4..].copy_from_slice(&hash[8..12]);
    result
}

/// Components of a 32-byte file node key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileKey {
    /// AES key for content and attributes
    pub aes_key: [u8; 16],
    /// CTR nonce
    pub nonce: [u8; 8],
    /// Condensed file MAC
    pub mac: [u8; 8],
}

impl FileKey {
    /// Split a packed 32-byte node key.
    pub fn unpack(node_key: &[u8]) -> Result<Self> {
        if node_key.len() != 32 {
            return Err(MegaError::Crypto(format!(
                "file key must be 32 bytes, got {}",
                node_key.len()
            )));
        }
        let mut aes_key = [0u8; 16];
        for i in 0..16 {
            aes_key[i] = node_key[i] ^ node_key[i + 16];
        }
        let mut nonce = [0u8; 8];
        nonce.copy_from_slice(&node_key[16..24]);
        let mut mac = [0u8; 8];
        mac.copy_from_slice(&node_key[24..32]);
        Ok(FileKey {
            aes_key,
            nonce,
            mac,
        })
    }

    /// Pack back into the 32-byte wire layout.
    pub fn pack(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[16..24].copy_from_slice(&self.nonce);
        out[24..32].copy_from_slice(&self.mac);
        for i in 0..16 {
            out[i] = self.aes_key[i] ^ out[i + 16];
        }
        out
    }
}

/// Pack file key, nonce and 16-byte file MAC into a 32-byte node key.
pub fn pack_node_key(file_key: &[u8; 16], nonce: &[u8; 8], meta_mac: &[u8; 16]) -> [u8; 32] {
    FileKey {
        aes_key: *file_key,
        nonce: *nonce,
        mac: condense_mac(meta_mac),
    }
    .pack()
}

/// Key used for attribute encryption: files fold their 32-byte key, folders use it as-is.
pub fn attribute_key(node_key: &[u8]) -> Option<[u8; 16]> {
    match node_key.len() {
        32 => {
            let mut key = [0u8; 16];
            for i in 0..16 {
                key[i] = node_key[i] ^ node_key[i + 16];
            }
            Some(key)
        }
        16 => node_key.try_into().ok(),
        _ => None,
    }
}

/// Wrap a node or share key under a 16-byte key (AES-ECB).
pub fn wrap_key(key: &[u8], wrapping_key: &[u8; 16]) -> Result<Vec<u8>> {
    aes128_ecb_encrypt(key, wrapping_key)
}

/// Unwrap a node or share key; the result has the input's length.
pub fn unwrap_key(wrapped: &[u8], wrapping_key: &[u8; 16]) -> Result<Vec<u8>> {
    if wrapped.len() != 16 && wrapped.len() != 32 {
        return Err(MegaError::Crypto(format!(
            "wrapped key must be 16 or 32 bytes, got {}",
            wrapped.len()
        )));
    }
    aes128_ecb_decrypt(wrapped, wrapping_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_to_a32_ascii() {
        let (bytes, len_units) = password_to_a32_bytes("test");
        assert_eq!(len_units, 4);
        assert_eq!(bytes, vec![0x74, 0x65, 0x73, 0x74]);
    }

    #[test]
    fn test_password_to_a32_surrogate_pair() {
        let (bytes, len_units) = password_to_a32_bytes("\u{1F600}");
        assert_eq!(len_units, 2);
        assert_eq!(bytes, vec![0xD8, 0x3D, 0xDE, 0x00]);
    }

    #[test]
    fn test_empty_password_returns_seed() {
        let key = make_password_key("");
        assert_eq!(key[0], 0x93);
        assert_eq!(key[15], 0x56);
    }

    #[test]
    fn test_username_hash_depends_on_user() {
        let key = [0x11u8; 16];
        assert_ne!(
            make_username_hash("a@example.com", &key),
            make_username_hash("b@example.com", &key)
        );
    }

    #[test]
    fn test_file_key_pack_unpack() {
        let file_key = [0xA5u8; 16];
        let nonce = [1, 2, 3, 4, 5, 6, 7, 8];
        let meta = [0x3Cu8; 16];
        let packed = pack_node_key(&file_key, &nonce, &meta);

        let unpacked = FileKey::unpack(&packed).unwrap();
        assert_eq!(unpacked.aes_key, file_key);
        assert_eq!(unpacked.nonce, nonce);
        assert_eq!(unpacked.mac, condense_mac(&meta));
        assert_eq!(unpacked.pack(), packed);
        assert_eq!(attribute_key(&packed), Some(file_key));
    }

    #[test]
    fn test_unwrap_rejects_odd_lengths() {
        let k = [0u8; 16];
        assert!(unwrap_key(&[0u8; 8], &k).is_err());
        let wrapped = wrap_key(&[9u8; 32], &k).unwrap();
        assert_eq!(unwrap_key(&wrapped, &k).unwrap(), vec![9u8; 32]);
    }
}
