//! Configuration module for echowatch.
//!
//! Loads `echowatch.toml` (or the file named by `ECHOWATCH_CONFIG`), then
//! applies environment variable overrides. Missing file means defaults.

use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::health::Thresholds;
use crate::history::DEFAULT_HISTORY_CAPACITY;

const DEFAULT_CONFIG_PATH: &str = "echowatch.toml";

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Service configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP port for the dashboard (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "echowatch.db")
    pub db_path: String,
    /// Records kept per service before the history is cleared (default: 500)
    pub history_capacity: usize,
    pub probe: ProbeSettings,
    pub tcp: TcpTarget,
    pub http: HttpTarget,
    pub mailgun: MailgunSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "echowatch.db".to_string(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            probe: ProbeSettings::default(),
            tcp: TcpTarget::default(),
            http: HttpTarget::default(),
            mailgun: MailgunSettings::default(),
        }
    }
}

/// Settings shared by both probes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub auth_token: String,
    /// Payload sent to the echo servers.
    pub message: String,
    pub timeout_secs: u64,
    pub interval_secs: u64,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            auth_token: String::new(),
            message: "hello world".to_string(),
            timeout_secs: 10,
            interval_secs: 10,
            healthy_threshold: 3,
            unhealthy_threshold: 2,
        }
    }
}

impl ProbeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            healthy: self.healthy_threshold,
            unhealthy: self.unhealthy_threshold,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TcpTarget {
    pub host: String,
    pub port: u16,
}

impl Default for TcpTarget {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpTarget {
    pub url: String,
}

impl Default for HttpTarget {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:3001".to_string(),
        }
    }
}

/// Mail delivery credentials. Notifications are only logged when empty.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MailgunSettings {
    pub domain: String,
    pub api_key: String,
    pub sender: String,
}

impl MailgunSettings {
    pub fn is_configured(&self) -> bool {
        !self.domain.is_empty() && !self.api_key.is_empty()
    }
}

impl Config {
    /// Load configuration from the config file and environment variables.
    ///
    /// Environment variables:
    /// - `ECHOWATCH_CONFIG`: config file path (default: "echowatch.toml")
    /// - `ECHOWATCH_HTTP_PORT`: dashboard port
    /// - `ECHOWATCH_DB_PATH`: database file path
    /// - `ECHOWATCH_AUTH_TOKEN`: echo server auth token
    /// - `ECHOWATCH_MAILGUN_API_KEY`: mail API key
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("ECHOWATCH_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut cfg = Self::from_file(Path::new(&path))?;
        cfg.apply_overrides(|key| env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!("Loading configuration from {}", path.display());
                Self::parse(&contents).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(port_str) = env("ECHOWATCH_HTTP_PORT") {
            match port_str.parse() {
                Ok(port) => self.http_port = port,
                Err(_) => tracing::warn!("Ignoring invalid ECHOWATCH_HTTP_PORT={}", port_str),
            }
        }

        if let Some(db_path) = env("ECHOWATCH_DB_PATH") {
            self.db_path = db_path;
        }

        if let Some(token) = env("ECHOWATCH_AUTH_TOKEN") {
            self.probe.auth_token = token;
        }

        if let Some(key) = env("ECHOWATCH_MAILGUN_API_KEY") {
            self.mailgun.api_key = key;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let probe = &self.probe;
        if probe.healthy_threshold == 0 || probe.unhealthy_threshold == 0 {
            return Err(ConfigError::Invalid("thresholds must be at least 1".to_string()));
        }
        if probe.interval_secs == 0 {
            return Err(ConfigError::Invalid("probe.interval_secs must be at least 1".to_string()));
        }
        if probe.timeout_secs == 0 {
            return Err(ConfigError::Invalid("probe.timeout_secs must be at least 1".to_string()));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::Invalid("history_capacity must be at least 1".to_string()));
        }
        if self.tcp.host.is_empty() {
            return Err(ConfigError::Invalid("tcp.host is required".to_string()));
        }
        if self.http.url.is_empty() {
            return Err(ConfigError::Invalid("http.url is required".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.db_path, "echowatch.db");
        assert_eq!(cfg.history_capacity, 500);
        assert_eq!(cfg.probe.thresholds(), Thresholds { healthy: 3, unhealthy: 2 });
        assert!(!cfg.mailgun.is_configured());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_file_keeps_defaults() {
        let cfg = Config::parse(
            r#"
            http_port = 9090

            [probe]
            auth_token = "secret"
            message = "hi there"
            unhealthy_threshold = 4

            [tcp]
            host = "echo.example.com"
            port = 1234

            [mailgun]
            domain = "mg.example.com"
            api_key = "key"
            sender = "watch@example.com"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.http_port, 9090);
        assert_eq!(cfg.probe.auth_token, "secret");
        assert_eq!(cfg.probe.thresholds(), Thresholds { healthy: 3, unhealthy: 4 });
        assert_eq!(cfg.probe.interval(), Duration::from_secs(10));
        assert_eq!(cfg.tcp.host, "echo.example.com");
        assert_eq!(cfg.tcp.port, 1234);
        assert_eq!(cfg.http.url, "http://127.0.0.1:3001");
        assert!(cfg.mailgun.is_configured());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("ECHOWATCH_HTTP_PORT", "9999"),
            ("ECHOWATCH_DB_PATH", "/tmp/x.db"),
            ("ECHOWATCH_AUTH_TOKEN", "from-env"),
        ]
        .into_iter()
        .collect();
        let mut cfg = Config::default();

        cfg.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(cfg.http_port, 9999);
        assert_eq!(cfg.db_path, "/tmp/x.db");
        assert_eq!(cfg.probe.auth_token, "from-env");
    }

    #[test]
    fn test_invalid_port_override_is_ignored() {
        let mut cfg = Config::default();
        cfg.apply_overrides(|key| (key == "ECHOWATCH_HTTP_PORT").then(|| "not-a-port".to_string()));
        assert_eq!(cfg.http_port, 8080);
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let mut cfg = Config::default();
        cfg.probe.healthy_threshold = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_from_file_missing_uses_defaults_and_bad_toml_errors() {
        let cfg = Config::from_file(Path::new("/nonexistent/echowatch.toml")).unwrap();
        assert_eq!(cfg.http_port, 8080);

        let mut tmp = NamedTempFile::new().unwrap();
        writeln!(tmp, "http_port = \"eighty\"").unwrap();
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
