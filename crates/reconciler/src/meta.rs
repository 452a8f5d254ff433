//! Composition metadata: release name, pause markers, definition labels.
//!
//! Pause precedence:
//!
//! | `gracefully-paused` | `gracefully-paused-time` | state |
//! |---------------------|--------------------------|-------|
//! | not `"true"`        | any                      | [`PauseState::Active`] (stale time is cleared) |
//! | `"true"`            | absent                   | [`PauseState::Requested`] (Update stamps it) |
//! | `"true"`            | present                  | [`PauseState::Paused`] (every operation short-circuits) |

use chrono::{DateTime, SecondsFormat, Utc};

use crate::composition::Composition;
use crate::ports::CompositionDefinitionInfo;

pub const LABEL_RELEASE_NAME: &str = "krateo.io/release-name";
pub const ANNOTATION_GRACEFULLY_PAUSED: &str = "krateo.io/gracefully-paused";
pub const ANNOTATION_GRACEFULLY_PAUSED_TIME: &str = "krateo.io/gracefully-paused-time";

pub const LABEL_COMPOSITION_DEFINITION_NAME: &str = "krateo.io/composition-definition-name";
pub const LABEL_COMPOSITION_DEFINITION_NAMESPACE: &str =
    "krateo.io/composition-definition-namespace";
pub const LABEL_COMPOSITION_DEFINITION_GROUP: &str = "krateo.io/composition-definition-group";
pub const LABEL_COMPOSITION_DEFINITION_VERSION: &str = "krateo.io/composition-definition-version";
pub const LABEL_COMPOSITION_DEFINITION_RESOURCE: &str =
    "krateo.io/composition-definition-resource";

/// Release names longer than this are rejected by the package manager.
pub const MAX_RELEASE_NAME_LEN: usize = 53;

const UID_PREFIX_LEN: usize = 8;

/// Derive the release name for a record.
///
/// An existing release-name label always wins, so the name never changes
/// once persisted.
#[must_use]
pub fn calculate_release_name(composition: &Composition) -> String {
    if let Some(existing) = release_name(composition) {
        return existing.to_string();
    }

    let name = composition.name();
    let uid_prefix: String = composition.uid().chars().take(UID_PREFIX_LEN).collect();
    let full = if uid_prefix.is_empty() {
        name.to_string()
    } else {
        format!("{name}-{uid_prefix}")
    };

    let truncated: String = full.chars().take(MAX_RELEASE_NAME_LEN).collect();
    truncated.trim_end_matches('-').to_string()
}

/// The persisted release name, if any.
#[must_use]
pub fn release_name(composition: &Composition) -> Option<&str> {
    composition
        .metadata
        .labels
        .get(LABEL_RELEASE_NAME)
        .map(String::as_str)
        .filter(|name| !name.is_empty())
}

/// Returns true when the label changed.
pub fn set_release_name(composition: &mut Composition, name: &str) -> bool {
    set_label(composition, LABEL_RELEASE_NAME, name)
}

/// Where a record sits in the pause protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseState {
    Active,
    Requested,
    Paused,
}

impl PauseState {
    #[must_use]
    pub fn of(composition: &Composition) -> Self {
        if !is_gracefully_paused(composition) {
            return Self::Active;
        }
        if composition
            .metadata
            .annotations
            .contains_key(ANNOTATION_GRACEFULLY_PAUSED_TIME)
        {
            Self::Paused
        } else {
            Self::Requested
        }
    }
}

/// Whether the user asked for a pause.
#[must_use]
pub fn is_gracefully_paused(composition: &Composition) -> bool {
    composition
        .metadata
        .annotations
        .get(ANNOTATION_GRACEFULLY_PAUSED)
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// The instant the pause took effect. `None` when absent or unparsable.
#[must_use]
pub fn gracefully_paused_time(composition: &Composition) -> Option<DateTime<Utc>> {
    composition
        .metadata
        .annotations
        .get(ANNOTATION_GRACEFULLY_PAUSED_TIME)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|t| t.with_timezone(&Utc))
}

pub fn set_gracefully_paused_time(composition: &mut Composition, at: DateTime<Utc>) {
    composition.metadata.annotations.insert(
        ANNOTATION_GRACEFULLY_PAUSED_TIME.to_string(),
        at.to_rfc3339_opts(SecondsFormat::Secs, true),
    );
}

/// Returns true when an annotation was removed.
pub fn remove_gracefully_paused_time(composition: &mut Composition) -> bool {
    composition
        .metadata
        .annotations
        .remove(ANNOTATION_GRACEFULLY_PAUSED_TIME)
        .is_some()
}

/// Stamp the owning definition's coordinates. Returns true when any changed.
pub fn set_composition_definition_labels(
    composition: &mut Composition,
    definition: &CompositionDefinitionInfo,
) -> bool {
    [
        (LABEL_COMPOSITION_DEFINITION_NAME, definition.name.as_str()),
        (
            LABEL_COMPOSITION_DEFINITION_NAMESPACE,
            definition.namespace.as_str(),
        ),
        (LABEL_COMPOSITION_DEFINITION_GROUP, definition.gvr.group.as_str()),
        (
            LABEL_COMPOSITION_DEFINITION_VERSION,
            definition.gvr.version.as_str(),
        ),
        (
            LABEL_COMPOSITION_DEFINITION_RESOURCE,
            definition.gvr.resource.as_str(),
        ),
    ]
    .into_iter()
    .fold(false, |changed, (key, value)| {
        set_label(composition, key, value) || changed
    })
}

fn set_label(composition: &mut Composition, key: &str, value: &str) -> bool {
    let labels = &mut composition.metadata.labels;
    if labels.get(key).map(String::as_str) == Some(value) {
        return false;
    }
    labels.insert(key.to_string(), value.to_string());
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composition::GroupVersionResource;

    fn record() -> Composition {
        Composition::new("composition.krateo.io/v1", "App", "demo", "ns")
            .with_uid("0a1b2c3d-4e5f-6789-abcd-ef0123456789")
    }

    #[test]
    fn test_release_name_uses_uid_prefix() {
        assert_eq!(calculate_release_name(&record()), "demo-0a1b2c3d");
    }

    #[test]
    fn test_release_name_without_uid() {
        let record = Composition::new("v1", "App", "plain", "ns");
        assert_eq!(calculate_release_name(&record), "plain");
    }

    #[test]
    fn test_release_name_truncated_and_trimmed() {
        // 52 characters then a dash at position 53.
        let name = format!("{}-tail", "a".repeat(52));
        let record = Composition::new("v1", "App", name, "ns").with_uid("ffffffff");
        let derived = calculate_release_name(&record);

        assert!(derived.len() <= MAX_RELEASE_NAME_LEN);
        assert!(!derived.ends_with('-'));
        assert_eq!(derived, "a".repeat(52));
    }

    #[test]
    fn test_release_name_is_stable_once_labelled() {
        let mut record = record();
        let first = calculate_release_name(&record);
        assert!(set_release_name(&mut record, &first));

        record.metadata.uid = "99999999".to_string();
        assert_eq!(calculate_release_name(&record), first);
        assert!(!set_release_name(&mut record, &first));
    }

    #[test]
    fn test_pause_precedence() {
        let active = record();
        assert_eq!(PauseState::of(&active), PauseState::Active);

        let requested = record().with_annotation(ANNOTATION_GRACEFULLY_PAUSED, "true");
        assert_eq!(PauseState::of(&requested), PauseState::Requested);

        let mut paused = requested.clone();
        set_gracefully_paused_time(&mut paused, Utc::now());
        assert_eq!(PauseState::of(&paused), PauseState::Paused);
        assert!(gracefully_paused_time(&paused).is_some());

        let stale = record().with_annotation(ANNOTATION_GRACEFULLY_PAUSED_TIME, "2024-01-01T00:00:00Z");
        assert_eq!(PauseState::of(&stale), PauseState::Active);
    }

    #[test]
    fn test_remove_paused_time_reports_change() {
        let mut paused = record().with_annotation(ANNOTATION_GRACEFULLY_PAUSED_TIME, "x");
        assert!(remove_gracefully_paused_time(&mut paused));
        assert!(!remove_gracefully_paused_time(&mut paused));
    }

    #[test]
    fn test_definition_labels() {
        let mut record = record();
        let def = CompositionDefinitionInfo {
            name: "fireworksapp".to_string(),
            namespace: "krateo-system".to_string(),
            gvr: GroupVersionResource::new(
                "core.krateo.io",
                "v1alpha1",
                "compositiondefinitions",
            ),
        };

        assert!(set_composition_definition_labels(&mut record, &def));
        assert!(!set_composition_definition_labels(&mut record, &def));
        assert_eq!(
            record
                .metadata
                .labels
                .get(LABEL_COMPOSITION_DEFINITION_RESOURCE)
                .map(String::as_str),
            Some("compositiondefinitions")
        );
    }
}
