//! Relay error types.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced to whoever launches, embeds, or shuts down a relay.
///
/// Failures local to a single connection (a dead recipient, a dropped
/// frame) never show up here; they are counted in
/// [`RelayStats`](crate::metrics::RelayStats) and logged instead.
#[derive(Debug, Error)]
pub enum RelayError {
    /// No ephemeral port could be obtained from the OS.
    #[error("failed to allocate a local port: {0}")]
    PortAllocation(#[source] std::io::Error),
    /// The listener could not bind the allocated address.
    #[error("failed to bind relay listener on {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },
    /// The worker thread or its runtime could not be created.
    #[error("failed to start relay runtime: {0}")]
    Runtime(#[source] std::io::Error),
    /// The worker exited before reporting that the listener was bound.
    #[error("relay worker exited before the listener was ready")]
    LaunchAborted,
    /// A client asked for a channel path this relay does not serve.
    #[error("channel not found: {path}")]
    ChannelNotFound {
        /// Requested request path.
        path: String,
    },
    /// The worker did not stop within the requested bound.
    #[error("relay did not shut down within {timeout:?}")]
    ShutdownTimeout {
        /// Bound that was exceeded.
        timeout: Duration,
    },
    /// Configuration rejected by [`RelayConfig::validate`](crate::config::RelayConfig::validate).
    #[error("invalid relay config: {0}")]
    InvalidConfig(String),
}

impl RelayError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::PortAllocation(_) => "port_allocation",
            Self::Bind { .. } => "bind",
            Self::Runtime(_) => "runtime",
            Self::LaunchAborted => "launch_aborted",
            Self::ChannelNotFound { .. } => "channel_not_found",
            Self::ShutdownTimeout { .. } => "shutdown_timeout",
            Self::InvalidConfig(_) => "invalid_config",
        }
    }

    pub(crate) fn bind(addr: impl std::fmt::Display, source: std::io::Error) -> Self {
        Self::Bind {
            addr: addr.to_string(),
            source,
        }
    }
}

/// Why a single recipient did not get a fanned-out payload.
///
/// Never propagated to the sender.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The recipient is already tearing down (queue closed or kicked).
    #[error("recipient closed")]
    Closed,
    /// The recipient's bounded queue is full; it gets disconnected.
    #[error("recipient send buffer full")]
    Overflow,
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// `host:port`, bracketing bare IPv6 literals.
pub(crate) fn display_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_not_found_display() {
        let err = RelayError::ChannelNotFound {
            path: "/other".into(),
        };
        assert_eq!(err.to_string(), "channel not found: /other");
        assert_eq!(err.error_kind(), "channel_not_found");
    }

    #[test]
    fn shutdown_timeout_display() {
        let err = RelayError::ShutdownTimeout {
            timeout: Duration::from_millis(250),
        };
        assert!(err.to_string().contains("250ms"));
    }

    #[test]
    fn bind_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use");
        let err = RelayError::bind("127.0.0.1:9", io);
        assert!(err.to_string().contains("127.0.0.1:9"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn display_addr_brackets_ipv6() {
        assert_eq!(display_addr("127.0.0.1", 80), "127.0.0.1:80");
        assert_eq!(display_addr("::1", 80), "[::1]:80");
        assert_eq!(display_addr("[::1]", 80), "[::1]:80");
        assert_eq!(display_addr("localhost", 80), "localhost:80");
    }

    #[test]
    fn delivery_error_display() {
        assert_eq!(DeliveryError::Closed.to_string(), "recipient closed");
        assert_eq!(DeliveryError::Overflow.to_string(), "recipient send buffer full");
    }
}
