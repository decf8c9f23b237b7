//! Order-independent collection of chunk MACs.

use std::collections::BTreeMap;

use crate::crypto::meta_mac;
use crate::error::{MegaError, Result};

/// Collects `(index, mac)` pairs as chunks complete, in any order, and
/// folds them in index order once every chunk is present.
#[derive(Debug, Clone)]
pub(crate) struct MacAccumulator {
    expected: usize,
    macs: BTreeMap<usize, [u8; 16]>,
}

impl MacAccumulator {
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            macs: BTreeMap::new(),
        }
    }

    /// Start from an acknowledged prefix restored from a checkpoint.
    pub fn with_prefix(expected: usize, prefix: &[[u8; 16]]) -> Self {
        let mut acc = Self::new(expected);
        for (index, mac) in prefix.iter().take(expected).enumerate() {
            acc.macs.insert(index, *mac);
        }
        acc
    }

    pub fn insert(&mut self, index: usize, mac: [u8; 16]) -> Result<()> {
        if index >= self.expected {
            return Err(MegaError::InvalidArgument(format!(
                "chunk {} out of range ({} chunks)",
                index, self.expected
            )));
        }
        self.macs.insert(index, mac);
        Ok(())
    }

    /// Number of chunks acknowledged without a gap from index 0.
    pub fn high_water_mark(&self) -> usize {
        self.macs
            .keys()
            .enumerate()
            .take_while(|(position, index)| position == *index)
            .count()
    }

    /// MACs of the contiguous acknowledged prefix.
    pub fn prefix(&self) -> Vec<[u8; 16]> {
        self.macs
            .values()
            .take(self.high_water_mark())
            .copied()
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.high_water_mark() == self.expected
    }

    /// Fold into the 16-byte file MAC; fails while any chunk is missing.
    pub fn finalize(&self, key: &[u8; 16]) -> Result<[u8; 16]> {
        if !self.is_complete() {
            return Err(MegaError::InvalidArgument(format!(
                "{} of {} chunk MACs present",
                self.high_water_mark(),
                self.expected
            )));
        }
        Ok(meta_mac(self.macs.values(), key))
    }
}
