//! Random key material.

use rand::RngCore;

/// Random 16-byte AES-128 key.
pub fn make_random_key() -> [u8; 16] {
    let mut key = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

/// Random 8-byte CTR nonce.
pub fn make_random_nonce() -> [u8; 8] {
    let mut nonce = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_keys_are_different() {
        assert_ne!(make_random_key(), make_random_key());
        assert_ne!(make_random_nonce(), make_random_nonce());
    }
}
