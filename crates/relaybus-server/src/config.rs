//! Relay configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{RelayError, Result};

/// Configuration for one relay instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Host to bind and advertise in the URI (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind. `0` asks the port allocator for a free one.
    pub port: u16,
    /// The single channel path served, without the leading slash.
    pub broadcast_path: String,
    /// Outbound frames queued per connection before it is disconnected.
    pub send_buffer: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Heartbeat ping interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Close a connection after this many seconds without any inbound frame.
    pub heartbeat_timeout_secs: u64,
    /// Default bound used by callers that close without an explicit timeout.
    pub shutdown_timeout_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            broadcast_path: "broadcast".into(),
            send_buffer: 256,
            max_message_size: 16 * 1024 * 1024, // 16 MB
            heartbeat_interval_secs: 20,
            heartbeat_timeout_secs: 20,
            shutdown_timeout_ms: 1000,
        }
    }
}

impl RelayConfig {
    /// Config bound to `host`, everything else default.
    pub fn with_host(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Route the broadcast channel is served on, e.g. `/broadcast`.
    pub fn route(&self) -> String {
        format!("/{}", self.broadcast_path.trim_matches('/'))
    }

    /// Heartbeat interval as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Heartbeat timeout as a [`Duration`].
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// Shutdown bound as a [`Duration`].
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(RelayError::InvalidConfig("host must not be empty".into()));
        }
        if self.broadcast_path.trim_matches('/').is_empty() {
            return Err(RelayError::InvalidConfig(
                "broadcast_path must not be empty".into(),
            ));
        }
        if self.broadcast_path.trim_matches('/').contains('/') {
            return Err(RelayError::InvalidConfig(format!(
                "broadcast_path must be a single segment, got {:?}",
                self.broadcast_path
            )));
        }
        if self.send_buffer == 0 {
            return Err(RelayError::InvalidConfig("send_buffer must be at least 1".into()));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(RelayError::InvalidConfig(
                "heartbeat_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
