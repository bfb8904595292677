//! HTTP echo probe implementation.

use std::time::Duration;

use super::{sanitize_payload, AuthOutcome, ProbeError, ProbeResult};
use crate::health::ServiceId;

/// Probe for the HTTP echo server: `GET <url>/?auth=<token>&buf=<payload>`.
#[derive(Debug, Clone)]
pub struct RequestProbe {
    url: String,
    auth_token: String,
    /// Payload with spaces already removed.
    payload: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl RequestProbe {
    /// Build a probe. The timeout is the total round-trip deadline,
    /// body included.
    pub fn new(url: &str, auth_token: &str, payload: &str, timeout: Duration) -> Result<Self, ProbeError> {
        let url = if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("http://{}", url)
        };

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Config(e.to_string()))?;

        Ok(Self {
            url,
            auth_token: auth_token.to_string(),
            payload: sanitize_payload(payload),
            timeout,
            client,
        })
    }

    pub fn service(&self) -> ServiceId {
        ServiceId::Http
    }

    fn endpoint(&self) -> String {
        format!("{}/", self.url.trim_end_matches('/'))
    }

    /// Run the probe.
    pub async fn run(&self) -> ProbeResult {
        let mut result = ProbeResult::new(self.service());

        if let Err(e) = self.exchange(&mut result).await {
            result.fail(e);
        }

        result
    }

    async fn exchange(&self, result: &mut ProbeResult) -> Result<(), ProbeError> {
        result.sent = Some(self.payload.clone());

        let response = self
            .client
            .get(self.endpoint())
            .query(&[("auth", self.auth_token.as_str()), ("buf", self.payload.as_str())])
            .send()
            .await
            .map_err(|e| self.map_err(e))?;

        // The server has no explicit auth rejection; getting an answer means
        // the token was carried.
        result.auth = AuthOutcome::Accepted;

        let body = response.text().await.map_err(|e| self.map_err(e))?;
        result.check_echo(&body, &self.payload);

        Ok(())
    }

    fn map_err(&self, e: reqwest::Error) -> ProbeError {
        if e.is_timeout() {
            ProbeError::Timeout(self.timeout)
        } else {
            ProbeError::Network(e.to_string())
        }
    }
}
