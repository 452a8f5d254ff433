//! Error types for the digest crate.

use thiserror::Error;

/// Result type alias for digest operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Digest error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A manifest document could not be decoded.
    #[error("decoding manifest: {reason}")]
    Decode { reason: String },

    /// A value could not be serialized for hashing.
    #[error("serializing value for hashing: {reason}")]
    Serialization { reason: String },
}

impl Error {
    /// Create a decode error.
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }
}
