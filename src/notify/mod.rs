//! Threshold-crossing notifications.

mod mailgun;

pub use mailgun::*;

use async_trait::async_trait;
use thiserror::Error;

/// Notification error types.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("mail API rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Sends a message to an address.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, address: &str, subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// Notifier used when no mail credentials are configured. Only logs.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, address: &str, subject: &str, _body: &str) -> Result<(), NotifyError> {
        tracing::info!(to = address, subject, "mail delivery not configured, notification logged only");
        Ok(())
    }
}
