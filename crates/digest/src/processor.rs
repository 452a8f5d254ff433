//! Release manifest processing: decode and digest in a single pass.
//!
//! The digest is a function of the manifest *bytes*, not of the decoded
//! objects. Reordering documents, or changing whitespace or comments,
//! changes the digest. Drift detection relies on this: any textual change
//! in what the package manager rendered counts as drift.

use std::io::{self, Read};

use composition_core::Release;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::hasher::ObjectHash;
use crate::objects::{ManifestObject, MinimalMetadata, UnstructuredObject};

/// Objects decoded from a manifest, plus the manifest digest.
pub type Decoded<T> = (Vec<T>, String);

/// Reader that forwards every byte it yields into a hasher.
struct TeeReader<'h, R> {
    inner: R,
    hasher: &'h mut ObjectHash,
}

impl<'h, R: Read> TeeReader<'h, R> {
    fn new(inner: R, hasher: &'h mut ObjectHash) -> Self {
        Self { inner, hasher }
    }
}

impl<R: Read> Read for TeeReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if let Some(read) = buf.get(..n) {
            self.hasher.update(read);
        }
        Ok(n)
    }
}

/// Decode a manifest into objects of shape `T` while hashing it.
///
/// Documents that decode to nothing (separators, comments) or to an object
/// with an empty `apiVersion` are skipped; their bytes still count toward
/// the digest. Empty or whitespace-only input yields no objects and the
/// empty digest.
///
/// # Errors
///
/// Returns error if any document is malformed.
pub fn decode_manifest<T>(manifest: &str) -> Result<Decoded<T>>
where
    T: ManifestObject + DeserializeOwned,
{
    if manifest.trim().is_empty() {
        return Ok((Vec::new(), String::new()));
    }

    let mut hasher = ObjectHash::new();
    // Most charts render fewer than ten objects.
    let mut objects = Vec::with_capacity(10);

    {
        let reader = TeeReader::new(manifest.as_bytes(), &mut hasher);
        for document in serde_yaml::Deserializer::from_reader(reader) {
            let decoded =
                Option::<T>::deserialize(document).map_err(|e| Error::decode(e.to_string()))?;

            match decoded {
                Some(object) if !object.api_version().is_empty() => objects.push(object),
                _ => {}
            }
        }
    }

    Ok((objects, hasher.get_hash()))
}

/// Digest a manifest without decoding it.
///
/// Always agrees with the digest returned by [`decode_manifest`].
#[must_use]
pub fn compute_digest(manifest: &str) -> String {
    if manifest.trim().is_empty() {
        return String::new();
    }

    let mut hasher = ObjectHash::new();
    hasher.update(manifest.as_bytes());
    hasher.get_hash()
}

/// Decode a release manifest into objects of shape `T` plus its digest.
///
/// # Errors
///
/// Returns error if any document is malformed.
pub fn decode_release<T>(release: &Release) -> Result<Decoded<T>>
where
    T: ManifestObject + DeserializeOwned,
{
    decode_manifest(&release.manifest)
}

/// Decode a release into minimal identity descriptors plus its digest.
///
/// # Errors
///
/// Returns error if any document is malformed.
pub fn decode_min_release(release: &Release) -> Result<Decoded<MinimalMetadata>> {
    decode_release(release)
}

/// Decode a release into full objects plus its digest.
///
/// # Errors
///
/// Returns error if any document is malformed.
pub fn decode_unstructured_release(release: &Release) -> Result<Decoded<UnstructuredObject>> {
    decode_release(release)
}

/// Digest of a release manifest without decoding it.
#[must_use]
pub fn compute_release_digest(release: &Release) -> String {
    compute_digest(&release.manifest)
}
