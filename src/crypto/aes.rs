//! AES-128 block modes.
//!
//! MEGA uses AES-128 in three ways:
//! - ECB: key wrapping and the legacy password KDF
//! - CBC with a zero IV: node attribute blocks
//! - CTR: file content, counter derived from the byte offset

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;

use crate::error::{MegaError, Result};

fn check_aligned(data: &[u8]) -> Result<()> {
    if data.len() % 16 != 0 {
        return Err(MegaError::Crypto(format!(
            "data length must be a multiple of 16, got {}",
            data.len()
        )));
    }
    Ok(())
}

/// AES-128-ECB encrypt a single 16-byte block.
pub fn aes128_ecb_encrypt_block(data: &[u8; 16], key: &[u8; 16]) -> [u8; 16] {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut block = GenericArray::clone_from_slice(data);
    cipher.encrypt_block(&mut block);
    block.into()
}

/// AES-128-ECB decrypt a single 16-byte block.
pub fn aes128_ecb_decrypt_block(data: &[u8; 16], key: &[u8; 16]) -> [u8; 16] {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut block = GenericArray::clone_from_slice(data);
    cipher.decrypt_block(&mut block);
    block.into()
}

/// AES-128-ECB encrypt a block-aligned buffer.
pub fn aes128_ecb_encrypt(data: &[u8], key: &[u8; 16]) -> Result<Vec<u8>> {
    check_aligned(data)?;
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut result = data.to_vec();
    for chunk in result.chunks_mut(16) {
        cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
    }
    Ok(result)
}

/// AES-128-ECB decrypt a block-aligned buffer.
pub fn aes128_ecb_decrypt(data: &[u8], key: &[u8; 16]) -> Result<Vec<u8>> {
    check_aligned(data)?;
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut result = data.to_vec();
    for chunk in result.chunks_mut(16) {
        cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
    }
    Ok(result)
}

/// AES-128-CBC encrypt with a zero IV.
pub fn aes128_cbc_encrypt(data: &[u8], key: &[u8; 16]) -> Result<Vec<u8>> {
    check_aligned(data)?;
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut result = Vec::with_capacity(data.len());
    let mut prev = [0u8; 16];

    for chunk in data.chunks(16) {
        let mut block = GenericArray::clone_from_slice(chunk);
        for (b, p) in block.iter_mut().zip(prev.iter()) {
            *b ^= p;
        }
        cipher.encrypt_block(&mut block);
        prev.copy_from_slice(&block);
        result.extend_from_slice(&block);
    }

    Ok(result)
}

/// AES-128-CBC decrypt with a zero IV.
pub fn aes128_cbc_decrypt(data: &[u8], key: &[u8; 16]) -> Result<Vec<u8>> {
    check_aligned(data)?;
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut result = Vec::with_capacity(data.len());
    let mut prev = [0u8; 16];

    for chunk in data.chunks(16) {
        let mut block = GenericArray::clone_from_slice(chunk);
        cipher.decrypt_block(&mut block);
        for (b, p) in block.iter_mut().zip(prev.iter()) {
            *b ^= p;
        }
        prev.copy_from_slice(chunk);
        result.extend_from_slice(&block);
    }

    Ok(result)
}

/// AES-128-CTR keystream XOR starting at byte `offset` of the file.
///
/// The counter block is the 8-byte nonce followed by the big-endian block
/// index (`offset / 16`). Encryption and decryption are the same operation.
pub fn aes128_ctr_apply(data: &mut [u8], key: &[u8; 16], nonce: &[u8; 8], offset: u64) {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut counter = offset / 16;
    let mut skip = (offset % 16) as usize;
    let mut pos = 0;

    while pos < data.len() {
        let mut block = aes::Block::default();
        block[..8].copy_from_slice(nonce);
        block[8..].copy_from_slice(&counter.to_be_bytes());
        cipher.encrypt_block(&mut block);

        let take = (16 - skip).min(data.len() - pos);
        for i in 0..take {
            data[pos + i] ^= block[skip + i];
        }
        pos += take;
        skip = 0;
        counter += 1;
    }
}

/// Owned-buffer wrapper around [`aes128_ctr_apply`].
pub fn aes128_ctr(data: &[u8], key: &[u8; 16], nonce: &[u8; 8], offset: u64) -> Vec<u8> {
    let mut out = data.to_vec();
    aes128_ctr_apply(&mut out, key, nonce, offset);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        // FIPS-197 appendix C.1
        let key: [u8; 16] = [
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d,
            0x0e, 0x0f,
        ];
        let plaintext: [u8; 16] = [
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd,
            0xee, 0xff,
        ];
        let expected: [u8; 16] = [
            0x69, 0xc4, 0xe0, 0xd8, 0x6a, 0x7b, 0x04, 0x30, 0xd8, 0xcd, 0xb7, 0x80, 0x70, 0xb4,
            0xc5, 0x5a,
        ];

        assert_eq!(aes128_ecb_encrypt_block(&plaintext, &key), expected);
        assert_eq!(aes128_ecb_decrypt_block(&expected, &key), plaintext);
    }

    #[test]
    fn test_misaligned_input_is_an_error() {
        let key = [0u8; 16];
        assert!(aes128_ecb_encrypt(&[0u8; 15], &key).is_err());
        assert!(aes128_cbc_decrypt(&[0u8; 17], &key).is_err());
    }

    #[test]
    fn test_cbc_chains_blocks() {
        let key = [0u8; 16];
        let p = [1u8; 16];

        let c1 = aes128_ecb_encrypt_block(&p, &key);
        let mut x = [0u8; 16];
        for i in 0..16 {
            x[i] = p[i] ^ c1[i];
        }
        let c2 = aes128_ecb_encrypt_block(&x, &key);

        let ciphertext = aes128_cbc_encrypt(&[p, p].concat(), &key).unwrap();
        assert_eq!(&ciphertext[..16], &c1);
        assert_eq!(&ciphertext[16..], &c2);
        assert_eq!(aes128_cbc_decrypt(&ciphertext, &key).unwrap(), [p, p].concat());
    }

    #[test]
    fn test_ctr_offset_matches_contiguous_stream() {
        let key = [0x42u8; 16];
        let nonce = [7u8; 8];
        let data: Vec<u8> = (0..100u8).collect();

        let whole = aes128_ctr(&data, &key, &nonce, 0);
        // Encrypting a tail at its file offset must line up with the whole stream,
        // including offsets inside a block.
        assert_eq!(aes128_ctr(&data[32..], &key, &nonce, 32), whole[32..]);
        assert_eq!(aes128_ctr(&data[37..], &key, &nonce, 37), whole[37..]);
        assert_eq!(aes128_ctr(&whole, &key, &nonce, 0), data);
    }

    #[test]
    fn test_ctr_counter_block_layout() {
        let key = [1u8; 16];
        let nonce = [2u8; 8];
        let mut counter = [0u8; 16];
        counter[..8].copy_from_slice(&nonce);
        counter[8..].copy_from_slice(&5u64.to_be_bytes());
        let keystream = aes128_ecb_encrypt_block(&counter, &key);

        assert_eq!(aes128_ctr(&[0u8; 16], &key, &nonce, 80), keystream);
    }
}
