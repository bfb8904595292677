//! Per-service cycle history.
//!
//! Every probe cycle becomes one [`LogRecord`]. Records are kept in memory,
//! capped per service: when a history is full it is cleared before the next
//! record goes in.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::health::{display_time, CrossingEvent, Health, HealthState, ServiceId};
use crate::probe::{AuthOutcome, ProbeResult};

pub const DEFAULT_HISTORY_CAPACITY: usize = 500;

/// Snapshot of one probe cycle, annotated for humans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    pub time: DateTime<Utc>,
    pub service: ServiceId,
    pub auth: String,
    pub sent: String,
    pub received: String,
    pub state: String,
    /// Crossing message, when a threshold was reached this cycle.
    pub threshold: Option<String>,
    pub error: Option<String>,
    /// Mirrors the probe's up/down flag.
    pub cloud_state: bool,
    /// Health label after the cycle; `None` when the store could not be read.
    pub health: Option<Health>,
}

impl LogRecord {
    pub fn from_cycle(result: &ProbeResult, state: Option<&HealthState>, crossing: Option<&CrossingEvent>) -> Self {
        let t = display_time(result.timestamp);

        let auth = match result.auth {
            AuthOutcome::Accepted => format!("{}: Auth Token Accepted", t),
            AuthOutcome::Rejected => format!("{}: Wrong Auth Token", t),
            AuthOutcome::NotAttempted => format!("{}: Auth Not Attempted", t),
        };
        let sent = match &result.sent {
            Some(payload) => format!("{}: Sent: {}", t, payload),
            None => format!("{}: Nothing Sent", t),
        };
        let received = match &result.received {
            Some(echo) => format!("{}: Received: {}", t, echo),
            None => format!("{}: Nothing Received", t),
        };
        let error = result.failure.as_ref().map(|f| {
            if f.is_protocol_violation() {
                format!("protocol violation: {}", f)
            } else {
                format!("transport failure: {}", f)
            }
        });

        Self {
            time: result.timestamp,
            service: result.service,
            auth,
            sent,
            received,
            state: format!("{}: Connection Active: {}", t, result.up),
            threshold: crossing.map(|c| c.message.clone()),
            error,
            cloud_state: result.up,
            health: state.map(|s| s.state),
        }
    }

    /// Append a note to the error text.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        let note = note.into();
        self.error = Some(match self.error.take() {
            Some(existing) => format!("{}; {}", existing, note),
            None => note,
        });
        self
    }

    pub fn health_label(&self) -> &'static str {
        self.health.map(|h| h.as_str()).unwrap_or("unknown")
    }
}

/// Bounded, append-only history for one service.
#[derive(Debug)]
pub struct History {
    capacity: usize,
    records: RwLock<Vec<LogRecord>>,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: RwLock::new(Vec::new()),
        }
    }

    pub async fn append(&self, record: LogRecord) {
        let mut records = self.records.write().await;
        // TODO: switch to a ring buffer so the cap drops the oldest record
        // instead of the whole timeline.
        if records.len() >= self.capacity {
            records.clear();
        }
        records.push(record);
    }

    /// Copy of the records, oldest first.
    pub async fn snapshot(&self) -> Vec<LogRecord> {
        self.records.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn latest(&self) -> Option<LogRecord> {
        self.records.read().await.last().cloned()
    }
}

/// Histories for every monitored service.
#[derive(Debug)]
pub struct HistoryBook {
    tcp: History,
    http: History,
}

impl HistoryBook {
    pub fn new(capacity: usize) -> Self {
        Self {
            tcp: History::new(capacity),
            http: History::new(capacity),
        }
    }

    pub fn history(&self, service: ServiceId) -> &History {
        match service {
            ServiceId::Tcp => &self.tcp,
            ServiceId::Http => &self.http,
        }
    }

    /// Build the record for one cycle and append it.
    pub async fn record(
        &self,
        result: &ProbeResult,
        state: Option<&HealthState>,
        crossing: Option<&CrossingEvent>,
    ) -> LogRecord {
        let record = LogRecord::from_cycle(result, state, crossing);
        self.append(record.clone()).await;
        record
    }

    /// Log `record` and append it to its service's history.
    pub async fn append(&self, record: LogRecord) {
        if record.cloud_state {
            tracing::info!(
                service = %record.service,
                up = true,
                auth = %record.auth,
                health = record.health_label(),
                "{}",
                record.state
            );
        } else {
            tracing::warn!(
                service = %record.service,
                up = false,
                auth = %record.auth,
                health = record.health_label(),
                error = record.error.as_deref().unwrap_or(""),
                "{}",
                record.state
            );
        }
        if let Some(threshold) = &record.threshold {
            tracing::info!(service = %record.service, "{}", threshold);
        }

        self.history(record.service).append(record).await;
    }
}
