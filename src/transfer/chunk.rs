//! Chunk boundaries and the upload checksum.

use crate::base64::base64url_encode;

const KIB: u64 = 1024;

/// One planned chunk of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Chunk {
    pub index: usize,
    pub offset: u64,
    pub len: u64,
}

impl Chunk {
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// Nominal size of chunk `index`: 128 KiB steps up to 1 MiB, then 1 MiB.
pub(crate) fn chunk_size(index: usize) -> u64 {
    if index < 8 {
        (index as u64 + 1) * 128 * KIB
    } else {
        1024 * KIB
    }
}

/// Split `total` bytes into chunks; the last one is truncated.
///
/// An empty file still has one empty chunk so the service can hand out a
/// completion token for it.
pub(crate) fn plan_chunks(total: u64) -> Vec<Chunk> {
    if total == 0 {
        return vec![Chunk {
            index: 0,
            offset: 0,
            len: 0,
        }];
    }
    let mut chunks = Vec::new();
    let mut offset = 0;
    while offset < total {
        let index = chunks.len();
        let len = chunk_size(index).min(total - offset);
        chunks.push(Chunk { index, offset, len });
        offset += len;
    }
    chunks
}

/// Rolling XOR checksum sent with each uploaded chunk.
pub(crate) fn upload_checksum(data: &[u8]) -> String {
    let mut crc = [0u8; 12];
    for (i, &byte) in data.iter().enumerate() {
        crc[i % 12] ^= byte;
    }
    base64url_encode(&crc)
}
