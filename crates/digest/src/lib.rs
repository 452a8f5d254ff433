//! Manifest digests for release drift detection.
//!
//! A release manifest is streamed once: a tee reader feeds every byte the
//! YAML decoder consumes into a 64-bit FNV-1 hash, so the object list and the
//! digest come out of the same pass. [`compute_digest`] is the fast path for
//! callers that only need the digest; both paths agree on every input.
//!
//! # Example
//!
//! ```ignore
//! use composition_digest::{compute_digest, decode_manifest, MinimalMetadata};
//!
//! let manifest = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm\n";
//! let (objects, digest) = decode_manifest::<MinimalMetadata>(manifest)?;
//! assert_eq!(digest, compute_digest(manifest));
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod hasher;
pub mod objects;
pub mod processor;

pub use error::{Error, Result};
pub use hasher::ObjectHash;
pub use objects::{ManifestObject, Metadata, MinimalMetadata, UnstructuredObject};
pub use processor::{
    compute_digest, compute_release_digest, decode_manifest, decode_min_release, decode_release,
    decode_unstructured_release, Decoded,
};
