//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use super::models::*;
use crate::health::{Counter, Health, HealthState, ServiceId};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// Per-service health documents.
///
/// Each call is atomic on its own: `increment` never tears against a
/// concurrent `set_status` on the same service.
pub trait StatusStore: Send + Sync {
    fn get_status(&self, service: ServiceId) -> Result<HealthState, DbError>;

    /// Merge-write: fields left as `None` keep their stored value. Creates
    /// the document if it does not exist yet.
    fn set_status(&self, service: ServiceId, patch: &StatusPatch) -> Result<(), DbError>;

    /// Add `delta` to one counter, clamped at zero.
    fn increment(&self, service: ServiceId, counter: Counter, delta: i64) -> Result<(), DbError>;
}

/// The single notification preference document.
pub trait PreferenceStore: Send + Sync {
    fn get_preference(&self) -> Result<NotificationPreference, DbError>;
    fn set_preference(&self, patch: &PreferencePatch) -> Result<(), DbError>;
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        self.conn()
            .execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    /// Create the status document for `service` if it is missing.
    ///
    /// Returns whether a new document was written. Existing state is never
    /// touched, so restarts keep their counters.
    pub fn seed_status(&self, service: ServiceId, initial: Health) -> Result<bool, DbError> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO current_status (service, state) VALUES (?1, ?2)",
            params![service.as_str(), initial.as_str()],
        )?;
        Ok(inserted > 0)
    }
}

impl StatusStore for Store {
    fn get_status(&self, service: ServiceId) -> Result<HealthState, DbError> {
        let row = self
            .conn()
            .query_row(
                "SELECT state, uptime_count, downtime_count, last_transition FROM current_status WHERE service = ?1",
                params![service.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;

        let (state, uptime_count, downtime_count, last_transition) = row.ok_or(DbError::NotFound)?;

        Ok(HealthState {
            state: state.parse().map_err(DbError::Corrupt)?,
            uptime_count,
            downtime_count,
            last_transition: last_transition.as_deref().and_then(parse_db_time),
        })
    }

    fn set_status(&self, service: ServiceId, patch: &StatusPatch) -> Result<(), DbError> {
        self.conn().execute(
            "INSERT INTO current_status (service, state, uptime_count, downtime_count, last_transition)
             VALUES (?1, COALESCE(?2, 'healthy'), COALESCE(?3, 0), COALESCE(?4, 0), ?5)
             ON CONFLICT(service) DO UPDATE SET
             state = COALESCE(?2, state),
             uptime_count = COALESCE(?3, uptime_count),
             downtime_count = COALESCE(?4, downtime_count),
             last_transition = COALESCE(?5, last_transition)",
            params![
                service.as_str(),
                patch.state.map(|s| s.as_str()),
                patch.uptime_count,
                patch.downtime_count,
                patch.last_transition.map(|t| t.format(TIME_FORMAT).to_string()),
            ],
        )?;
        Ok(())
    }

    fn increment(&self, service: ServiceId, counter: Counter, delta: i64) -> Result<(), DbError> {
        let column = counter.column();
        let updated = self.conn().execute(
            &format!(
                "UPDATE current_status SET {column} = MAX(0, {column} + ?1) WHERE service = ?2"
            ),
            params![delta, service.as_str()],
        )?;

        if updated == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }
}

impl PreferenceStore for Store {
    fn get_preference(&self) -> Result<NotificationPreference, DbError> {
        let pref = self
            .conn()
            .query_row(
                "SELECT email, enabled FROM notification_preference WHERE id = 1",
                [],
                |row| {
                    Ok(NotificationPreference {
                        address: row.get(0)?,
                        enabled: row.get(1)?,
                    })
                },
            )
            .optional()?;

        Ok(pref.unwrap_or_default())
    }

    fn set_preference(&self, patch: &PreferencePatch) -> Result<(), DbError> {
        self.conn().execute(
            "INSERT INTO notification_preference (id, email, enabled)
             VALUES (1, COALESCE(?1, ''), COALESCE(?2, 0))
             ON CONFLICT(id) DO UPDATE SET
             email = COALESCE(?1, email),
             enabled = COALESCE(?2, enabled)",
            params![patch.address, patch.enabled],
        )?;
        Ok(())
    }
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::NamedTempFile;
    use tokio_test::{assert_err, assert_ok};

    fn temp_store() -> (NamedTempFile, Store) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        (tmp, store)
    }

    #[test]
    fn test_seed_does_not_clobber_existing_state() {
        let (_tmp, store) = temp_store();

        assert!(store.seed_status(ServiceId::Tcp, Health::Healthy).unwrap());
        store.increment(ServiceId::Tcp, Counter::Downtime, 1).unwrap();
        assert!(!store.seed_status(ServiceId::Tcp, Health::Unhealthy).unwrap());

        let status = store.get_status(ServiceId::Tcp).unwrap();
        assert_eq!(status.state, Health::Healthy);
        assert_eq!(status.downtime_count, 1);
    }

    #[test]
    fn test_get_missing_status_is_not_found() {
        let (_tmp, store) = temp_store();
        assert!(matches!(store.get_status(ServiceId::Http), Err(DbError::NotFound)));
    }

    #[test]
    fn test_set_status_merges_fields() {
        let (_tmp, store) = temp_store();
        store.seed_status(ServiceId::Http, Health::Healthy).unwrap();
        store.increment(ServiceId::Http, Counter::Uptime, 2).unwrap();

        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        store
            .set_status(
                ServiceId::Http,
                &StatusPatch {
                    state: Some(Health::Unhealthy),
                    last_transition: Some(at),
                    ..Default::default()
                },
            )
            .unwrap();

        let status = store.get_status(ServiceId::Http).unwrap();
        assert_eq!(status.state, Health::Unhealthy);
        assert_eq!(status.uptime_count, 2, "untouched field must survive");
        assert_eq!(status.last_transition, Some(at));

        store.set_status(ServiceId::Http, &StatusPatch::reset_counters()).unwrap();
        let status = store.get_status(ServiceId::Http).unwrap();
        assert_eq!(status.uptime_count, 0);
        assert_eq!(status.state, Health::Unhealthy);
        assert_eq!(status.last_transition, Some(at));
    }

    #[test]
    fn test_set_status_creates_missing_document() {
        let (_tmp, store) = temp_store();
        assert_ok!(store.set_status(ServiceId::Tcp, &StatusPatch::reset_counters()));
        assert_eq!(store.get_status(ServiceId::Tcp).unwrap(), HealthState::default());
    }

    #[test]
    fn test_increment_clamps_and_requires_document() {
        let (_tmp, store) = temp_store();
        assert_err!(store.increment(ServiceId::Tcp, Counter::Uptime, 1));

        store.seed_status(ServiceId::Tcp, Health::Healthy).unwrap();
        store.increment(ServiceId::Tcp, Counter::Uptime, 1).unwrap();
        store.increment(ServiceId::Tcp, Counter::Uptime, -5).unwrap();
        assert_eq!(store.get_status(ServiceId::Tcp).unwrap().uptime_count, 0);
    }

    #[test]
    fn test_preference_defaults_and_merge() {
        let (_tmp, store) = temp_store();
        assert_eq!(store.get_preference().unwrap(), NotificationPreference::default());

        store
            .set_preference(&PreferencePatch {
                address: Some("ops@example.com".to_string()),
                enabled: Some(true),
            })
            .unwrap();
        store
            .set_preference(&PreferencePatch {
                address: None,
                enabled: Some(false),
            })
            .unwrap();

        let pref = store.get_preference().unwrap();
        assert_eq!(pref.address, "ops@example.com");
        assert!(!pref.enabled);
    }

    #[test]
    fn test_state_survives_reopen() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let store = Store::new(tmp.path()).unwrap();
            store.seed_status(ServiceId::Tcp, Health::Healthy).unwrap();
            store
                .set_status(ServiceId::Tcp, &StatusPatch { state: Some(Health::Unhealthy), ..Default::default() })
                .unwrap();
        }

        let store = Store::new(tmp.path()).unwrap();
        assert_eq!(store.get_status(ServiceId::Tcp).unwrap().state, Health::Unhealthy);
    }
}
