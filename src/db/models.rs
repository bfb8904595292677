//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::health::{Health, HealthState};

/// Where and whether to send threshold notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPreference {
    pub address: String,
    pub enabled: bool,
}

impl NotificationPreference {
    pub fn should_notify(&self) -> bool {
        self.enabled && !self.address.trim().is_empty()
    }
}

/// Partial write of a status document. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusPatch {
    pub state: Option<Health>,
    pub uptime_count: Option<u32>,
    pub downtime_count: Option<u32>,
    pub last_transition: Option<DateTime<Utc>>,
}

impl StatusPatch {
    /// Zero both counters, leave everything else.
    pub fn reset_counters() -> Self {
        Self {
            uptime_count: Some(0),
            downtime_count: Some(0),
            ..Default::default()
        }
    }

    /// Overwrite every field with `state`.
    pub fn from_state(state: &HealthState) -> Self {
        Self {
            state: Some(state.state),
            uptime_count: Some(state.uptime_count),
            downtime_count: Some(state.downtime_count),
            last_transition: state.last_transition,
        }
    }
}

/// Partial write of the notification preference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreferencePatch {
    pub address: Option<String>,
    pub enabled: Option<bool>,
}
