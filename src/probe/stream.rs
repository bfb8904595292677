//! TCP line-protocol probe.
//!
//! Exchange: `auth <token>\n` -> `auth ok\n`, then `<payload>\n` ->
//! `CLOUDWALK <payload>\n`.

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::{AuthOutcome, ProbeError, ProbeResult};
use crate::health::ServiceId;

const AUTH_OK: &str = "auth ok\n";

/// Probe for the TCP echo server.
#[derive(Debug, Clone)]
pub struct StreamProbe {
    address: String,
    auth_token: String,
    payload: String,
    timeout: Duration,
}

impl StreamProbe {
    pub fn new(host: &str, port: u16, auth_token: &str, payload: &str, timeout: Duration) -> Self {
        Self {
            address: format!("{}:{}", host, port),
            auth_token: auth_token.to_string(),
            payload: payload.to_string(),
            timeout,
        }
    }

    pub fn service(&self) -> ServiceId {
        ServiceId::Tcp
    }

    /// Run the probe. The whole exchange, connect included, is bounded by
    /// the probe timeout.
    pub async fn run(&self) -> ProbeResult {
        let mut result = ProbeResult::new(self.service());

        match tokio::time::timeout(self.timeout, self.exchange(&mut result)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => result.fail(e),
            Err(_) => result.fail(ProbeError::Timeout(self.timeout)),
        }

        result
    }

    async fn exchange(&self, result: &mut ProbeResult) -> Result<(), ProbeError> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| ProbeError::Network(format!("failed to connect to {}: {}", self.address, e)))?;
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        writer
            .write_all(format!("auth {}\n", self.auth_token).as_bytes())
            .await
            .map_err(|e| ProbeError::Network(format!("failed to send auth: {}", e)))?;

        let reply = read_line(&mut reader).await?;
        if reply != AUTH_OK {
            result.auth = AuthOutcome::Rejected;
            return Err(ProbeError::AuthRejected(reply.trim_end().to_string()));
        }
        result.auth = AuthOutcome::Accepted;

        writer
            .write_all(format!("{}\n", self.payload).as_bytes())
            .await
            .map_err(|e| ProbeError::Network(format!("failed to send payload: {}", e)))?;
        result.sent = Some(self.payload.clone());

        let echo = read_line(&mut reader).await?;
        result.check_echo(&echo, &self.payload);

        Ok(())
    }
}

/// Read one line, newline included if the peer sent one.
async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, ProbeError> {
    let mut line = String::new();
    let n = reader
        .read_line(&mut line)
        .await
        .map_err(|e| ProbeError::Network(format!("failed to read: {}", e)))?;

    if n == 0 {
        return Err(ProbeError::Network("connection closed by peer".to_string()));
    }

    Ok(line)
}
