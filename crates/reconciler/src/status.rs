//! Status writer with change suppression.

use crate::composition::{CompositionStatus, ManagedResource};
use crate::condition::{Condition, REASON_AVAILABLE, REASON_GRACEFULLY_PAUSED, TYPE_READY};

pub const GRACEFULLY_PAUSED_MESSAGE: &str = "Composition is gracefully paused.";

/// Which readiness condition a status write sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
    Available,
    ReconcileGracefullyPaused,
}

/// One status write.
#[derive(Debug, Clone)]
pub struct StatusOptions {
    /// Set the condition even if an identical one is present.
    pub force: bool,
    pub chart_url: String,
    pub chart_version: String,
    /// Written only when non-empty.
    pub resources: Vec<ManagedResource>,
    pub previous_digest: String,
    pub digest: String,
    /// Ignored for [`ConditionKind::ReconcileGracefullyPaused`].
    pub message: String,
    pub condition: ConditionKind,
}

impl StatusOptions {
    pub fn available(message: impl Into<String>) -> Self {
        Self {
            force: false,
            chart_url: String::new(),
            chart_version: String::new(),
            resources: Vec::new(),
            previous_digest: String::new(),
            digest: String::new(),
            message: message.into(),
            condition: ConditionKind::Available,
        }
    }

    #[must_use]
    pub fn paused() -> Self {
        Self::available(GRACEFULLY_PAUSED_MESSAGE).into_paused()
    }

    /// Same write, setting the Paused condition instead of Available.
    #[must_use]
    pub fn into_paused(mut self) -> Self {
        self.condition = ConditionKind::ReconcileGracefullyPaused;
        self.message = GRACEFULLY_PAUSED_MESSAGE.to_string();
        self
    }

    #[must_use]
    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    #[must_use]
    pub fn with_chart(mut self, url: impl Into<String>, version: impl Into<String>) -> Self {
        self.chart_url = url.into();
        self.chart_version = version.into();
        self
    }

    #[must_use]
    pub fn with_digests(mut self, previous: impl Into<String>, current: impl Into<String>) -> Self {
        self.previous_digest = previous.into();
        self.digest = current.into();
        self
    }

    #[must_use]
    pub fn with_resources(mut self, resources: Vec<ManagedResource>) -> Self {
        self.resources = resources;
        self
    }
}

/// Apply a status write. Returns true when the status changed.
///
/// Digests and chart coordinates are always written. The condition is
/// skipped when a condition of the same type and reason already carries the
/// same message, unless `force` is set.
pub fn set_status(status: &mut CompositionStatus, options: StatusOptions) -> bool {
    let mut changed = false;

    if !options.resources.is_empty() && status.managed != options.resources {
        status.managed = options.resources;
        changed = true;
    }

    for (field, value) in [
        (&mut status.previous_digest, options.previous_digest),
        (&mut status.digest, options.digest),
        (&mut status.helm_chart_url, options.chart_url),
        (&mut status.helm_chart_version, options.chart_version),
    ] {
        if *field != value {
            *field = value;
            changed = true;
        }
    }

    let (reason, condition) = match options.condition {
        ConditionKind::Available => (
            REASON_AVAILABLE,
            Condition::available().with_message(options.message),
        ),
        ConditionKind::ReconcileGracefullyPaused => (
            REASON_GRACEFULLY_PAUSED,
            Condition::reconcile_gracefully_paused().with_message(GRACEFULLY_PAUSED_MESSAGE),
        ),
    };

    let current_matches = status
        .condition(TYPE_READY)
        .is_some_and(|c| c.reason == reason && c.message == condition.message);
    if options.force || !current_matches {
        changed |= status.set_condition(condition);
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{ConditionStatus, REASON_UNAVAILABLE};

    fn managed(name: &str) -> ManagedResource {
        ManagedResource {
            api_version: "v1".to_string(),
            resource: "configmaps".to_string(),
            name: name.to_string(),
            namespace: "demo".to_string(),
            path: format!("/api/v1/namespaces/demo/configmaps/{name}"),
        }
    }

    #[test]
    fn test_identical_available_write_is_suppressed() {
        let mut status = CompositionStatus::default();
        let opts = StatusOptions::available("Composition is up-to-date").with_digests("a", "a");

        assert!(set_status(&mut status, opts.clone()));
        assert!(!set_status(&mut status, opts));
    }

    #[test]
    fn test_digest_only_write_keeps_managed() {
        let mut status = CompositionStatus::default();
        set_status(
            &mut status,
            StatusOptions::available("Composition created")
                .forced()
                .with_resources(vec![managed("cm")]),
        );

        set_status(
            &mut status,
            StatusOptions::available("Composition is up-to-date").with_digests("x", "y"),
        );

        assert_eq!(status.managed, vec![managed("cm")]);
        assert_eq!(status.digest, "y");
        assert_eq!(status.previous_digest, "x");
    }

    #[test]
    fn test_available_replaces_unavailable() {
        let mut status = CompositionStatus::default();
        status.set_condition(Condition::unavailable().with_message("boom"));

        assert!(set_status(&mut status, StatusOptions::available("ok")));
        let ready = status.condition(TYPE_READY);
        assert_eq!(ready.map(|c| c.status), Some(ConditionStatus::True));
        assert_ne!(ready.map(|c| c.reason.as_str()), Some(REASON_UNAVAILABLE));
    }

    #[test]
    fn test_paused_uses_fixed_message() {
        let mut status = CompositionStatus::default();
        assert!(set_status(&mut status, StatusOptions::paused()));
        let ready = status.condition(TYPE_READY);

        assert_eq!(ready.map(|c| c.reason.as_str()), Some(REASON_GRACEFULLY_PAUSED));
        assert_eq!(
            ready.map(|c| c.message.as_str()),
            Some(GRACEFULLY_PAUSED_MESSAGE)
        );
        assert!(!set_status(&mut status, StatusOptions::paused()));
    }
}
