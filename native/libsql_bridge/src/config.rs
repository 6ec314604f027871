/// Connection and bridge configuration
///
/// Both types deserialize with `serde` so a host can load them from whatever
/// format it already uses; validation happens here, before any I/O.
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

use crate::constants::{
    DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_SYNC_TIMEOUT_SECS,
    DEFAULT_WORKER_THREADS, MIN_ENCRYPTION_KEY_LEN,
};
use crate::error::BridgeError;
use crate::models::Mode;

/// Options recognised when opening a connection.
#[derive(Clone, Deserialize)]
pub struct ConnectConfig {
    pub mode: Mode,
    /// Path to the local database file (local and replica modes)
    #[serde(default)]
    pub database: Option<String>,
    /// Remote database URI (remote and replica modes)
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Encryption at rest, AES-256-CBC
    #[serde(default)]
    pub encryption_key: Option<String>,
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

impl ConnectConfig {
    pub fn local(database: impl Into<String>) -> Self {
        Self {
            mode: Mode::Local,
            database: Some(database.into()),
            uri: None,
            auth_token: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            encryption_key: None,
        }
    }

    pub fn remote(uri: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            mode: Mode::Remote,
            database: None,
            uri: Some(uri.into()),
            auth_token: Some(auth_token.into()),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            encryption_key: None,
        }
    }

    pub fn remote_replica(
        database: impl Into<String>,
        uri: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Self {
        Self {
            mode: Mode::RemoteReplica,
            database: Some(database.into()),
            uri: Some(uri.into()),
            auth_token: Some(auth_token.into()),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            encryption_key: None,
        }
    }

    #[must_use]
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn with_encryption_key(mut self, key: impl Into<String>) -> Self {
        self.encryption_key = Some(key.into());
        self
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Check that every field the mode needs is present and well formed.
    pub fn validate(&self) -> Result<(), BridgeError> {
        let needs_path = matches!(self.mode, Mode::Local | Mode::RemoteReplica);
        let needs_remote = matches!(self.mode, Mode::Remote | Mode::RemoteReplica);

        if needs_path && self.database.as_deref().is_none_or(str::is_empty) {
            return Err(BridgeError::invalid_config(format!(
                "`database` is required for {:?} mode",
                self.mode
            )));
        }

        if needs_remote {
            let uri = self.uri.as_deref().ok_or_else(|| {
                BridgeError::invalid_config(format!("`uri` is required for {:?} mode", self.mode))
            })?;
            validate_uri(uri)?;

            if self.auth_token.as_deref().is_none_or(str::is_empty) {
                return Err(BridgeError::invalid_config(format!(
                    "`auth_token` is required for {:?} mode",
                    self.mode
                )));
            }
        }

        if let Some(key) = &self.encryption_key {
            if self.mode == Mode::Remote {
                return Err(BridgeError::invalid_config(
                    "`encryption_key` only applies to local and replica databases",
                ));
            }
            if key.len() < MIN_ENCRYPTION_KEY_LEN {
                return Err(BridgeError::invalid_config(format!(
                    "`encryption_key` must be at least {MIN_ENCRYPTION_KEY_LEN} bytes"
                )));
            }
        }

        Ok(())
    }
}

fn validate_uri(uri: &str) -> Result<(), BridgeError> {
    let parsed = url::Url::parse(uri)
        .map_err(|e| BridgeError::invalid_config(format!("invalid `uri` {uri:?}: {e}")))?;
    match parsed.scheme() {
        "libsql" | "https" | "http" | "wss" | "ws" => Ok(()),
        other => Err(BridgeError::invalid_config(format!(
            "unsupported `uri` scheme {other:?}"
        ))),
    }
}

// Credentials never reach the logs.
impl fmt::Debug for ConnectConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectConfig")
            .field("mode", &self.mode)
            .field("database", &self.database)
            .field("uri", &self.uri)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("busy_timeout_ms", &self.busy_timeout_ms)
            .field(
                "encryption_key",
                &self.encryption_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Settings of the bridge itself.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Size of the worker pool that drives async libsql calls.
    pub worker_threads: usize,
    pub connect_timeout_secs: u64,
    pub sync_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            worker_threads: DEFAULT_WORKER_THREADS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            sync_timeout_secs: DEFAULT_SYNC_TIMEOUT_SECS,
        }
    }
}

impl BridgeConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.worker_threads == 0 {
            return Err(BridgeError::invalid_config(
                "`worker_threads` must be at least 1",
            ));
        }
        Ok(())
    }
}
