//! Settings shape.

use relaybus_server::RelayConfig;
use serde::{Deserialize, Serialize};

/// Everything the `relaybus` binary reads at startup.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Relay server settings.
    pub server: RelayConfig,
    /// Log output settings.
    pub logging: LoggingSettings,
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = RelaySettings::default();
        assert_eq!(settings.server, RelayConfig::default());
        assert_eq!(settings.logging.level, "info");
        assert!(!settings.logging.json);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let settings: RelaySettings =
            serde_json::from_str(r#"{"server": {"port": 4100}}"#).unwrap();
        assert_eq!(settings.server.port, 4100);
        assert_eq!(settings.server.broadcast_path, "broadcast");
        assert_eq!(settings.logging, LoggingSettings::default());
    }
}
