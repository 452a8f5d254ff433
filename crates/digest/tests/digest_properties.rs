//! Property tests for manifest digests.
//!
//! - fast path and decode path agree on every manifest
//! - digests are deterministic
//! - document order is part of the digest

#![allow(clippy::unwrap_used)]

use composition_digest::{compute_digest, decode_manifest, MinimalMetadata, UnstructuredObject};
use proptest::prelude::*;

fn document(kind: &str, name: &str, payload: &str) -> String {
    format!(
        "apiVersion: v1\nkind: {kind}\nmetadata:\n  name: \"{name}\"\ndata:\n  payload: \"{payload}\"\n"
    )
}

fn documents() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(
        (
            prop::sample::select(vec!["ConfigMap", "Secret", "Service"]),
            "[a-z][a-z0-9-]{0,12}",
            "[a-zA-Z0-9 ]{0,32}",
        )
            .prop_map(|(kind, name, payload)| document(kind, &name, &payload)),
        0..8,
    )
}

proptest! {
    #[test]
    fn fast_path_agrees_with_decode(docs in documents()) {
        let manifest = docs.join("---\n");
        let (objects, decoded) = decode_manifest::<MinimalMetadata>(&manifest).unwrap();

        prop_assert_eq!(objects.len(), docs.len());
        prop_assert_eq!(decoded, compute_digest(&manifest));
    }

    #[test]
    fn full_and_minimal_shapes_share_digest(docs in documents()) {
        let manifest = docs.join("---\n");
        let (_, minimal) = decode_manifest::<MinimalMetadata>(&manifest).unwrap();
        let (_, full) = decode_manifest::<UnstructuredObject>(&manifest).unwrap();

        prop_assert_eq!(minimal, full);
    }

    #[test]
    fn digest_is_deterministic(text in ".*") {
        prop_assert_eq!(compute_digest(&text), compute_digest(&text));
    }

    #[test]
    fn whitespace_only_is_empty_digest(ws in "[ \t\r\n]{0,16}") {
        let (objects, decoded) = decode_manifest::<MinimalMetadata>(&ws).unwrap();
        let fast = compute_digest(&ws);

        prop_assert!(objects.is_empty());
        prop_assert_eq!(decoded.as_str(), "");
        prop_assert_eq!(fast.as_str(), "");
    }

    #[test]
    fn swapping_distinct_documents_changes_digest(
        first in "[a-z]{1,8}",
        second in "[a-z]{1,8}",
    ) {
        prop_assume!(first != second);
        let a = document("ConfigMap", &first, "x");
        let b = document("ConfigMap", &second, "x");

        prop_assert_ne!(
            compute_digest(&format!("{a}---\n{b}")),
            compute_digest(&format!("{b}---\n{a}"))
        );
    }
}
