//! Readiness conditions carried in a record's status.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::composition::CompositionStatus;

/// Condition type used for every readiness condition.
pub const TYPE_READY: &str = "Ready";

pub const REASON_AVAILABLE: &str = "Available";
pub const REASON_UNAVAILABLE: &str = "Unavailable";
pub const REASON_GRACEFULLY_PAUSED: &str = "ReconcileGracefullyPaused";

/// Tri-state condition status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::True => "True",
            Self::False => "False",
            Self::Unknown => "Unknown",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    fn ready(status: ConditionStatus, reason: &str) -> Self {
        Self {
            condition_type: TYPE_READY.to_string(),
            status,
            reason: reason.to_string(),
            message: String::new(),
            last_transition_time: Utc::now(),
        }
    }

    /// The record's release is installed and current.
    #[must_use]
    pub fn available() -> Self {
        Self::ready(ConditionStatus::True, REASON_AVAILABLE)
    }

    /// Reconciliation failed; the message carries the error text.
    #[must_use]
    pub fn unavailable() -> Self {
        Self::ready(ConditionStatus::False, REASON_UNAVAILABLE)
    }

    #[must_use]
    pub fn reconcile_gracefully_paused() -> Self {
        Self::ready(ConditionStatus::False, REASON_GRACEFULLY_PAUSED)
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Equal in everything but transition time.
    #[must_use]
    pub fn equivalent(&self, other: &Self) -> bool {
        self.condition_type == other.condition_type
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

impl CompositionStatus {
    /// Condition of the given type, if any.
    #[must_use]
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// Replace the condition of the same type, or append it.
    ///
    /// The previous transition time survives when the status value is
    /// unchanged. Returns false when nothing but the timestamp would change.
    pub fn set_condition(&mut self, mut condition: Condition) -> bool {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition.condition_type)
        {
            Some(existing) if existing.equivalent(&condition) => false,
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
                true
            }
            None => {
                self.conditions.push(condition);
                true
            }
        }
    }
}
