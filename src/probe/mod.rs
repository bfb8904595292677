//! Probe module for echo-service liveness checks.
//!
//! Supports a raw TCP line protocol and an HTTP query protocol. Both send a
//! payload and expect it echoed back behind the `CLOUDWALK` prefix.

mod http;
mod stream;

pub use http::*;
pub use stream::*;

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::health::ServiceId;

/// Prefix the echo servers put in front of the payload.
pub const ECHO_PREFIX: &str = "CLOUDWALK";

/// Probe error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("auth rejected, server replied {0:?}")]
    AuthRejected(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ProbeError {
    /// True when the peer answered but broke the protocol, as opposed to a
    /// transport failure.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, ProbeError::AuthRejected(_))
    }
}

/// What happened to the auth token during a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Accepted,
    Rejected,
    NotAttempted,
}

impl fmt::Display for AuthOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthOutcome::Accepted => "accepted",
            AuthOutcome::Rejected => "rejected",
            AuthOutcome::NotAttempted => "not attempted",
        };
        f.write_str(s)
    }
}

/// Outcome of a single probe attempt.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub service: ServiceId,
    pub up: bool,
    pub auth: AuthOutcome,
    /// Payload as transmitted, if it was sent.
    pub sent: Option<String>,
    /// Normalized echo, if one was read.
    pub received: Option<String>,
    pub failure: Option<ProbeError>,
    pub timestamp: DateTime<Utc>,
}

impl ProbeResult {
    /// A fresh, not-yet-successful result stamped with the current time.
    pub fn new(service: ServiceId) -> Self {
        Self {
            service,
            up: false,
            auth: AuthOutcome::NotAttempted,
            sent: None,
            received: None,
            failure: None,
            timestamp: Utc::now(),
        }
    }

    fn fail(&mut self, err: ProbeError) {
        self.up = false;
        self.failure = Some(err);
    }

    /// Record the echoed text and decide liveness from it.
    fn check_echo(&mut self, raw: &str, payload: &str) {
        self.up = echo_matches(raw, payload);
        self.received = Some(normalize_echo(raw));
    }
}

/// A liveness probe for one echo service.
#[derive(Debug, Clone)]
pub enum Probe {
    Stream(StreamProbe),
    Request(RequestProbe),
}

impl Probe {
    pub fn service(&self) -> ServiceId {
        match self {
            Probe::Stream(p) => p.service(),
            Probe::Request(p) => p.service(),
        }
    }

    /// Run one probe attempt. Never retries and never returns an error:
    /// failures are folded into the result.
    pub async fn run(&self) -> ProbeResult {
        let result = match self {
            Probe::Stream(p) => p.run().await,
            Probe::Request(p) => p.run().await,
        };

        if let Some(failure) = &result.failure {
            if failure.is_protocol_violation() {
                tracing::warn!(service = %result.service, "protocol violation: {}", failure);
            } else {
                tracing::warn!(service = %result.service, "transport failure: {}", failure);
            }
        }

        result
    }
}

/// Remove spaces from a payload so it can travel in a query string.
pub fn sanitize_payload(payload: &str) -> String {
    payload.replace(' ', "")
}

/// Strip line terminators and tabs from an echoed line.
///
/// A tab sitting directly between the prefix and the payload is the one
/// exception: it stands in for the separating space.
pub fn normalize_echo(raw: &str) -> String {
    let prefixed_tab = format!("{}\t", ECHO_PREFIX);
    let raw = match raw.strip_prefix(&prefixed_tab) {
        Some(rest) if !rest.starts_with(' ') => format!("{} {}", ECHO_PREFIX, rest),
        _ => raw.to_string(),
    };

    raw.chars().filter(|c| !matches!(c, '\n' | '\r' | '\t')).collect()
}

/// The echo a healthy server returns for `payload`.
pub fn expected_echo(payload: &str) -> String {
    format!("{} {}", ECHO_PREFIX, payload)
}

/// Compare an echoed response against the expected echo for `payload`.
/// Only the received side is normalized, so spacing must match exactly.
pub fn echo_matches(received: &str, payload: &str) -> bool {
    normalize_echo(received) == expected_echo(payload)
}
