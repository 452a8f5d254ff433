//! Cumulative 64-bit FNV-1 hasher.
//!
//! The hash state carries over between writes, so a manifest hashed in one
//! call and the same bytes streamed in arbitrary chunks give the same result.

use std::io;

use serde::Serialize;

use crate::error::{Error, Result};

const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const PRIME: u64 = 0x0000_0100_0000_01b3;

/// Streaming FNV-1 (64-bit) hash over raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHash {
    state: u64,
}

impl Default for ObjectHash {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectHash {
    /// Create a hasher at the FNV offset basis.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: OFFSET_BASIS,
        }
    }

    /// Fold bytes into the hash.
    pub fn update(&mut self, bytes: &[u8]) {
        self.state = bytes.iter().fold(self.state, |hash, &byte| {
            hash.wrapping_mul(PRIME) ^ u64::from(byte)
        });
    }

    /// Fold each string's bytes into the hash, in order.
    pub fn sum_hash_strings<I, S>(&mut self, values: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for value in values {
            self.update(value.as_ref().as_bytes());
        }
    }

    /// Fold the JSON encoding of each value into the hash, in order.
    ///
    /// # Errors
    ///
    /// Returns error if a value cannot be serialized to JSON.
    pub fn sum_hash<T: Serialize>(&mut self, values: &[T]) -> Result<()> {
        for value in values {
            let bytes =
                serde_json::to_vec(value).map_err(|e| Error::serialization(e.to_string()))?;
            self.update(&bytes);
        }
        Ok(())
    }

    /// Reset to the offset basis.
    pub fn reset(&mut self) {
        self.state = OFFSET_BASIS;
    }

    /// Current raw hash value.
    #[must_use]
    pub const fn finish(&self) -> u64 {
        self.state
    }

    /// Current hash as lowercase hex without zero padding.
    #[must_use]
    pub fn get_hash(&self) -> String {
        format!("{:x}", self.state)
    }
}

impl io::Write for ObjectHash {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
