//! Login-time cryptography: v2 key derivation and session id recovery.

use hmac::Hmac;
use pbkdf2::pbkdf2;
use sha2::Sha512;

use super::aes::aes128_ecb_encrypt_block;
use super::keys::unwrap_key;
use super::rsa::MegaRsaKey;
use crate::base64::{base64url_decode, base64url_encode};
use crate::error::{MegaError, Result};

/// Length of a raw session id.
pub const SID_LEN: usize = 43;

/// PBKDF2-HMAC-SHA512, 100,000 rounds, 32-byte output (v2 accounts).
///
/// The first half is the password key, the second half the login hash.
///
/// # Examples
/// ```
/// use megacore::crypto::derive_key_v2;
///
/// # fn example() -> megacore::Result<()> {
/// let key = derive_key_v2("password", b"salt")?;
/// assert_eq!(key.len(), 32);
/// # Ok(())
/// # }
/// ```
pub fn derive_key_v2(password: &str, salt: &[u8]) -> Result<[u8; 32]> {
    let mut key = [0u8; 32];
    pbkdf2::<Hmac<Sha512>>(password.as_bytes(), salt, 100_000, &mut key)
        .map_err(|_| MegaError::Crypto("PBKDF2 failed".to_string()))?;
    Ok(key)
}

/// Decrypt the account master key returned by `us`.
pub fn decrypt_master_key(k_b64: &str, password_key: &[u8; 16]) -> Result<[u8; 16]> {
    let data = base64url_decode(k_b64)?;
    if data.len() != 16 {
        return Err(MegaError::Crypto("invalid master key length".to_string()));
    }
    let plain = unwrap_key(&data, password_key)?;
    plain
        .try_into()
        .map_err(|_| MegaError::Crypto("invalid master key length".to_string()))
}

/// Check a `tsid` challenge: the first 16 bytes encrypted under the master
/// key must equal the last 16.
pub fn verify_tsid(tsid_b64: &str, master_key: &[u8; 16]) -> Result<bool> {
    let sid = base64url_decode(tsid_b64)?;
    if sid.len() != SID_LEN {
        return Ok(false);
    }
    let mut challenge = [0u8; 16];
    challenge.copy_from_slice(&sid[..16]);
    let encrypted = aes128_ecb_encrypt_block(&challenge, master_key);
    Ok(encrypted[..] == sid[SID_LEN - 16..])
}

/// Recover the session id from the RSA-encrypted `csid`.
pub fn decrypt_session_id(csid_b64: &str, rsa_key: &MegaRsaKey) -> Result<String> {
    let data = base64url_decode(csid_b64)?;
    let plain = rsa_key.decrypt_mpi(&data)?;
    if plain.len() < SID_LEN {
        return Err(MegaError::Crypto("session id too short".to_string()));
    }
    Ok(base64url_encode(&plain[..SID_LEN]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::wrap_key;

    #[test]
    fn test_master_key_unwrap() {
        let master = [1u8; 16];
        let pkey = [2u8; 16];
        let k = base64url_encode(&wrap_key(&master, &pkey).unwrap());
        assert_eq!(decrypt_master_key(&k, &pkey).unwrap(), master);
        assert!(decrypt_master_key(&base64url_encode(&[0u8; 8]), &pkey).is_err());
    }

    #[test]
    fn test_verify_tsid() {
        let master_key = [7u8; 16];
        let mut sid = [0u8; SID_LEN];
        sid[..16].copy_from_slice(&[9u8; 16]);
        sid[16..27].copy_from_slice(&[1u8; 11]);
        let tail = aes128_ecb_encrypt_block(&[9u8; 16], &master_key);
        sid[27..].copy_from_slice(&tail);

        assert!(verify_tsid(&base64url_encode(&sid), &master_key).unwrap());

        sid[42] ^= 1;
        assert!(!verify_tsid(&base64url_encode(&sid), &master_key).unwrap());
        assert!(!verify_tsid(&base64url_encode(&sid[..20]), &master_key).unwrap());
    }
}
