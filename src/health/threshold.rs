//! Threshold engine: folds one probe result into the persisted health state.
//!
//! Transition table, evaluated in order each cycle:
//!
//! ```text
//! Unhealthy + down  -> reset both counters
//! Unhealthy + up    -> uptime += 1
//! Healthy   + down  -> downtime += 1
//! Healthy   + up    -> reset both counters
//!
//! downtime == unhealthy threshold -> ToUnhealthy, reset counters
//! uptime   == healthy threshold   -> ToHealthy, reset counters
//! ```
//!
//! Thresholds are matched with exact equality. Each service's counters are
//! only ever written by its own poller, so a counter cannot skip past the
//! threshold between two reads.

use chrono::{DateTime, Utc};

use super::state::{display_time, Counter, Health, HealthState, ServiceId, Thresholds};
use crate::db::NotificationPreference;
use crate::probe::ProbeResult;

/// Direction of a health flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToHealthy,
    ToUnhealthy,
}

/// A threshold was reached and the health label flipped this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossingEvent {
    pub service: ServiceId,
    pub direction: Direction,
    pub at: DateTime<Utc>,
    /// Whether the notification preference asks for a message on this flip.
    pub notify: bool,
    /// Human-readable line shown in the history.
    pub message: String,
}

impl CrossingEvent {
    fn new(service: ServiceId, direction: Direction, at: DateTime<Utc>, notify: bool) -> Self {
        let t = display_time(at);
        let message = match (direction, notify) {
            (Direction::ToUnhealthy, true) => format!(
                "{}: Failure Threshold Reached. {} Server is Down. Confirmation Sent!",
                t, service
            ),
            (Direction::ToUnhealthy, false) => {
                format!("{}: Failure Threshold Reached. {} Server is Down.", t, service)
            }
            (Direction::ToHealthy, true) => format!(
                "{}: Success Threshold Reached! {} Server is Up. Confirmation Sent!",
                t, service
            ),
            (Direction::ToHealthy, false) => {
                format!("{}: Success Threshold Reached! {} Server is Up!", t, service)
            }
        };

        Self {
            service,
            direction,
            at,
            notify,
            message,
        }
    }

    /// Notification subject line.
    pub fn subject(&self) -> String {
        match self.direction {
            Direction::ToUnhealthy => format!("{} Echo Server Down!", self.service),
            Direction::ToHealthy => format!("{} Echo Server Back Online!", self.service),
        }
    }

    /// Notification body.
    pub fn body(&self) -> String {
        match self.direction {
            Direction::ToUnhealthy => format!(
                "{} Echo server down. Maximum failure threshold reached\nWill try to make contact again.....",
                self.service
            ),
            Direction::ToHealthy => format!(
                "{} Echo server Back up. Maximum success threshold reached\nScanning.....",
                self.service
            ),
        }
    }
}

/// How the counters changed before any threshold check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterUpdate {
    Reset,
    Increment(Counter),
}

/// Output of [`advance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: HealthState,
    pub update: CounterUpdate,
    pub crossing: Option<CrossingEvent>,
}

/// Compute the next health state for one probe result.
///
/// Pure: persistence and notification are applied by the caller from the
/// returned [`Transition`]. The probe timestamp becomes `last_transition`
/// when the label flips.
pub fn advance(
    prior: &HealthState,
    result: &ProbeResult,
    thresholds: Thresholds,
    preference: &NotificationPreference,
) -> Transition {
    let mut next = prior.clone();

    let update = match (prior.state, result.up) {
        // An already-down service does not keep accumulating downtime.
        (Health::Unhealthy, false) | (Health::Healthy, true) => {
            next.uptime_count = 0;
            next.downtime_count = 0;
            CounterUpdate::Reset
        }
        (Health::Unhealthy, true) => {
            next.uptime_count = next.uptime_count.saturating_add(1);
            CounterUpdate::Increment(Counter::Uptime)
        }
        (Health::Healthy, false) => {
            next.downtime_count = next.downtime_count.saturating_add(1);
            CounterUpdate::Increment(Counter::Downtime)
        }
    };

    let direction = if next.downtime_count == thresholds.unhealthy {
        Some(Direction::ToUnhealthy)
    } else if next.uptime_count == thresholds.healthy {
        Some(Direction::ToHealthy)
    } else {
        None
    };

    let crossing = direction.map(|direction| {
        next.state = match direction {
            Direction::ToUnhealthy => Health::Unhealthy,
            Direction::ToHealthy => Health::Healthy,
        };
        next.uptime_count = 0;
        next.downtime_count = 0;
        next.last_transition = Some(result.timestamp);
        CrossingEvent::new(
            result.service,
            direction,
            result.timestamp,
            preference.should_notify(),
        )
    });

    Transition {
        next,
        update,
        crossing,
    }
}
