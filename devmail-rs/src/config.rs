use crate::error::{MailError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub smtp: SmtpConfig,
    pub storage: StorageConfig,
    pub outgoing: OutgoingConfig,
    pub relay: RelayConfig,
    pub events: EventsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub hostname: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub listen_addr: String,
    pub max_message_size: usize,
    pub max_recipients: usize,
    /// When both are set, AUTH credentials are checked but never required.
    pub auth_username: Option<String>,
    pub auth_password: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub mail_dir: PathBuf,
}

/// Upstream SMTP relay settings. Relay is enabled when `host` is non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct OutgoingConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub secure: bool,
    pub auto_relay: bool,
    pub auto_relay_addr: String,
    pub allow_rules: Vec<String>,
    pub deny_rules: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    pub queue_capacity: usize,
    pub workers: usize,
    pub enqueue_timeout_secs: u64,
    pub attempt_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    pub queue_capacity: usize,
    pub max_concurrent_handlers: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| MailError::Config(e.to_string()))?;

        toml::from_str(&content).map_err(|e| MailError::Config(e.to_string()))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let hostname = gethostname::gethostname()
            .into_string()
            .unwrap_or_else(|_| "localhost".to_string());
        Self { hostname }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:1025".to_string(),
            max_message_size: 1024 * 1024, // 1MB
            max_recipients: 50,
            auth_username: None,
            auth_password: None,
        }
    }
}

impl SmtpConfig {
    /// Configured AUTH credentials, if both halves are present.
    pub fn credentials(&self) -> Option<(String, String)> {
        match (&self.auth_username, &self.auth_password) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            _ => None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mail_dir: std::env::temp_dir().join(format!("devmail-{}", std::process::id())),
        }
    }
}

impl OutgoingConfig {
    pub fn is_enabled(&self) -> bool {
        !self.host.is_empty()
    }

    /// Port to dial, falling back to 25 when unset.
    pub fn effective_port(&self) -> u16 {
        if self.port == 0 {
            25
        } else {
            self.port
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            workers: 1,
            enqueue_timeout_secs: 5,
            attempt_timeout_secs: 60,
        }
    }
}

impl RelayConfig {
    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_secs(self.enqueue_timeout_secs)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            max_concurrent_handlers: 32,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
