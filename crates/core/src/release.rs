//! Package-manager release records.
//!
//! A release is owned by the package-manager backend; the controller only
//! observes it and drives it through install/upgrade/rollback/uninstall.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status reported by the package manager for a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseStatus {
    #[default]
    Unknown,
    Deployed,
    Uninstalled,
    Superseded,
    Failed,
    Uninstalling,
    PendingInstall,
    PendingUpgrade,
    PendingRollback,
}

impl ReleaseStatus {
    /// Whether an install or upgrade was interrupted before the package
    /// manager settled the release.
    #[must_use]
    pub const fn is_stuck(self) -> bool {
        matches!(self, Self::PendingInstall | Self::PendingUpgrade)
    }

    /// Status as the package manager spells it.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Deployed => "deployed",
            Self::Uninstalled => "uninstalled",
            Self::Superseded => "superseded",
            Self::Failed => "failed",
            Self::Uninstalling => "uninstalling",
            Self::PendingInstall => "pending-install",
            Self::PendingUpgrade => "pending-upgrade",
            Self::PendingRollback => "pending-rollback",
        }
    }
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An installed chart release.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub name: String,
    pub namespace: String,
    pub revision: u32,
    pub status: ReleaseStatus,
    #[serde(default)]
    pub chart_name: String,
    #[serde(default)]
    pub chart_version: String,
    /// Rendered manifest: concatenated object documents.
    #[serde(default)]
    pub manifest: String,
}

impl Release {
    /// Create a deployed release at revision 1.
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        chart_version: impl Into<String>,
        manifest: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            revision: 1,
            status: ReleaseStatus::Deployed,
            chart_name: String::new(),
            chart_version: chart_version.into(),
            manifest: manifest.into(),
        }
    }

    /// Set the release status.
    #[must_use]
    pub fn with_status(mut self, status: ReleaseStatus) -> Self {
        self.status = status;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stuck_statuses() {
        assert!(ReleaseStatus::PendingInstall.is_stuck());
        assert!(ReleaseStatus::PendingUpgrade.is_stuck());
        assert!(!ReleaseStatus::PendingRollback.is_stuck());
        assert!(!ReleaseStatus::Deployed.is_stuck());
    }

    #[test]
    fn test_status_serializes_kebab_case() {
        let json = serde_json::to_string(&ReleaseStatus::PendingUpgrade).ok();
        assert_eq!(json.as_deref(), Some("\"pending-upgrade\""));
        assert_eq!(ReleaseStatus::PendingUpgrade.to_string(), "pending-upgrade");
    }
}
