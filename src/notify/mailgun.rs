//! Mailgun HTTP API notifier.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{Notifier, NotifyError};

pub const MAILGUN_API_BASE: &str = "https://api.mailgun.net/v3";

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default, Deserialize)]
struct SendReply {
    #[serde(default)]
    id: String,
    #[serde(default)]
    message: String,
}

/// Sends plain-text mail through `POST <base>/<domain>/messages`.
#[derive(Debug, Clone)]
pub struct MailgunNotifier {
    client: reqwest::Client,
    base_url: String,
    domain: String,
    api_key: String,
    sender: String,
}

impl MailgunNotifier {
    pub fn new(domain: &str, api_key: &str, sender: &str) -> Result<Self, NotifyError> {
        Self::with_base_url(MAILGUN_API_BASE, domain, api_key, sender)
    }

    pub fn with_base_url(base_url: &str, domain: &str, api_key: &str, sender: &str) -> Result<Self, NotifyError> {
        if domain.is_empty() || api_key.is_empty() {
            return Err(NotifyError::Config("mailgun domain and api_key are required".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            domain: domain.to_string(),
            api_key: api_key.to_string(),
            sender: sender.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for MailgunNotifier {
    async fn send(&self, address: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        let url = format!("{}/{}/messages", self.base_url, self.domain);

        let response = self
            .client
            .post(&url)
            .basic_auth("api", Some(&self.api_key))
            .form(&[
                ("from", self.sender.as_str()),
                ("to", address),
                ("subject", subject),
                ("text", body),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let reply: SendReply = response.json().await.unwrap_or_default();
        tracing::info!(id = %reply.id, response = %reply.message, to = address, "notification sent");

        Ok(())
    }
}
