//! Chunk MACs and the condensed file MAC.
//!
//! Each chunk gets a CBC-MAC over its plaintext seeded with `nonce || nonce`.
//! The file MAC folds the chunk MACs in index order through another CBC-MAC
//! with a zero seed, and is condensed to 8 bytes for storage in the node key.

use super::aes::aes128_ecb_encrypt_block;

fn xor_in(acc: &mut [u8; 16], block: &[u8]) {
    for (a, b) in acc.iter_mut().zip(block) {
        *a ^= b;
    }
}

/// CBC-MAC of one chunk's plaintext. The final partial block is zero-padded.
pub fn chunk_mac(data: &[u8], key: &[u8; 16], nonce: &[u8; 8]) -> [u8; 16] {
    let mut mac = [0u8; 16];
    mac[..8].copy_from_slice(nonce);
    mac[8..].copy_from_slice(nonce);

    for block in data.chunks(16) {
        xor_in(&mut mac, block);
        mac = aes128_ecb_encrypt_block(&mac, key);
    }
    mac
}

/// Fold chunk MACs (already in index order) into the 16-byte file MAC.
pub fn meta_mac<'a, I>(chunk_macs: I, key: &[u8; 16]) -> [u8; 16]
where
    I: IntoIterator<Item = &'a [u8; 16]>,
{
    let mut mac = [0u8; 16];
    for chunk in chunk_macs {
        xor_in(&mut mac, chunk);
        mac = aes128_ecb_encrypt_block(&mac, key);
    }
    mac
}

/// Condense a 16-byte file MAC to the 8 bytes stored in the node key.
pub fn condense_mac(mac: &[u8; 16]) -> [u8; 8] {
    let mut out = [0u8; 8];
    for i in 0..4 {
        out[i] = mac[i] ^ mac[4 + i];
        out[4 + i] = mac[8 + i] ^ mac[12 + i];
    }
    out
}
