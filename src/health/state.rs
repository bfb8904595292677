//! Persisted health state and the identities it is keyed by.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Format used for timestamps in human-readable log lines and messages.
pub const DISPLAY_TIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Render a timestamp the way log lines and crossing messages show it.
pub fn display_time(t: DateTime<Utc>) -> String {
    t.format(DISPLAY_TIME_FORMAT).to_string()
}

/// A monitored echo service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceId {
    /// Raw line-protocol echo server.
    Tcp,
    /// HTTP echo server.
    Http,
}

impl ServiceId {
    pub const ALL: [ServiceId; 2] = [ServiceId::Tcp, ServiceId::Http];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceId::Tcp => "tcp",
            ServiceId::Http => "http",
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health label persisted per service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    #[default]
    Healthy,
    Unhealthy,
}

impl Health {
    pub fn as_str(&self) -> &'static str {
        match self {
            Health::Healthy => "healthy",
            Health::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Health {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(Health::Healthy),
            "unhealthy" => Ok(Health::Unhealthy),
            other => Err(format!("unknown health state: {}", other)),
        }
    }
}

/// One of the two consecutive-result counters kept next to the health label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Uptime,
    Downtime,
}

impl Counter {
    /// Column holding this counter in the status table.
    pub fn column(&self) -> &'static str {
        match self {
            Counter::Uptime => "uptime_count",
            Counter::Downtime => "downtime_count",
        }
    }
}

/// Health document stored per service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthState {
    pub state: Health,
    pub uptime_count: u32,
    pub downtime_count: u32,
    /// When `state` last flipped. `None` until the first crossing.
    pub last_transition: Option<DateTime<Utc>>,
}

/// Consecutive results needed to flip the health label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// Successes needed to go from Unhealthy to Healthy.
    pub healthy: u32,
    /// Failures needed to go from Healthy to Unhealthy.
    pub unhealthy: u32,
}
