//! Poll loop for a single monitored service.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};

use crate::db::{DbError, NotificationPreference, PreferenceStore, StatusPatch, StatusStore};
use crate::health::{advance, CounterUpdate, CrossingEvent, HealthState, ServiceId, Thresholds, Transition};
use crate::history::{HistoryBook, LogRecord};
use crate::notify::Notifier;
use crate::probe::Probe;

/// Shortest cadence a poller runs at; `tokio::time::interval` rejects zero.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Called after every cycle with the probe's up/down flag.
pub type CycleHook = Arc<dyn Fn(ServiceId, bool) + Send + Sync>;

/// Retry policy for reading the prior status from the store.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Delay before the second attempt, doubled after each retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

/// Drives one probe and its threshold state forever.
pub struct Poller {
    probe: Probe,
    thresholds: Thresholds,
    interval: Duration,
    retry: RetryPolicy,
    status: Arc<dyn StatusStore>,
    preferences: Arc<dyn PreferenceStore>,
    notifier: Arc<dyn Notifier>,
    history: Arc<HistoryBook>,
    on_cycle: Option<CycleHook>,
}

impl Poller {
    pub fn new(
        probe: Probe,
        thresholds: Thresholds,
        interval: Duration,
        status: Arc<dyn StatusStore>,
        preferences: Arc<dyn PreferenceStore>,
        notifier: Arc<dyn Notifier>,
        history: Arc<HistoryBook>,
    ) -> Self {
        Self {
            probe,
            thresholds,
            interval: interval.max(MIN_INTERVAL),
            retry: RetryPolicy::default(),
            status,
            preferences,
            notifier,
            history,
            on_cycle: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cycle_hook(mut self, hook: CycleHook) -> Self {
        self.on_cycle = Some(hook);
        self
    }

    pub fn service(&self) -> ServiceId {
        self.probe.service()
    }

    /// Run cycles until `stop` fires. The first cycle starts one interval
    /// after the call.
    pub async fn run(&self, mut stop: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = stop.recv() => {
                    break;
                }
                _ = ticker.tick() => {
                    // Add jitter to avoid probing both servers in lockstep
                    let jitter = rand::random::<u64>() % 100;
                    tokio::time::sleep(Duration::from_millis(jitter)).await;

                    self.run_cycle().await;
                }
            }
        }
    }

    /// One probe, threshold and record cycle. Always produces a record,
    /// whatever collaborator failed along the way.
    pub async fn run_cycle(&self) -> LogRecord {
        let result = self.probe.run().await;
        let service = result.service;

        let record = match self.read_status(service).await {
            Ok(prior) => {
                let preference = self.read_preference();
                let transition = advance(&prior, &result, self.thresholds, &preference);

                self.persist(service, &transition);
                if let Some(crossing) = &transition.crossing {
                    self.notify(crossing, &preference).await;
                }

                self.history
                    .record(&result, Some(&transition.next), transition.crossing.as_ref())
                    .await
            }
            Err(e) => {
                tracing::error!(service = %service, "Status store unavailable, skipping thresholds: {}", e);
                let record = LogRecord::from_cycle(&result, None, None)
                    .with_note(format!("status store unavailable: {}", e));
                self.history.append(record.clone()).await;
                record
            }
        };

        if let Some(hook) = &self.on_cycle {
            hook(service, result.up);
        }

        record
    }

    async fn read_status(&self, service: ServiceId) -> Result<HealthState, DbError> {
        let attempts = self.retry.attempts.max(1);
        let mut delay = self.retry.base_delay;
        let mut attempt = 1;

        loop {
            match self.status.get_status(service) {
                Ok(state) => return Ok(state),
                Err(e) if attempt < attempts => {
                    tracing::warn!(service = %service, attempt, "Failed to read status, retrying: {}", e);
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn read_preference(&self) -> NotificationPreference {
        self.preferences.get_preference().unwrap_or_else(|e| {
            tracing::warn!("Failed to read notification preference, notifications off this cycle: {}", e);
            NotificationPreference::default()
        })
    }

    fn persist(&self, service: ServiceId, transition: &Transition) {
        let outcome = match (&transition.crossing, transition.update) {
            (Some(_), _) => self
                .status
                .set_status(service, &StatusPatch::from_state(&transition.next)),
            (None, CounterUpdate::Increment(counter)) => self.status.increment(service, counter, 1),
            (None, CounterUpdate::Reset) => self.status.set_status(service, &StatusPatch::reset_counters()),
        };

        if let Err(e) = outcome {
            tracing::error!(service = %service, next = ?transition.next, "Failed to persist status: {}", e);
        }
    }

    async fn notify(&self, crossing: &CrossingEvent, preference: &NotificationPreference) {
        if !crossing.notify {
            return;
        }

        if let Err(e) = self
            .notifier
            .send(&preference.address, &crossing.subject(), &crossing.body())
            .await
        {
            tracing::error!(
                service = %crossing.service,
                direction = ?crossing.direction,
                "Failed to send notification: {}",
                e
            );
        }
    }
}
