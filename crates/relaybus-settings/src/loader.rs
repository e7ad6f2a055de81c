//! Layered settings loading.
//!
//! Loading flow, later layers winning:
//! 1. Compiled [`RelaySettings::default()`]
//! 2. `~/.relaybus/settings.json` (or an explicit path), if present
//! 3. `RELAYBUS_*` environment variables, `__` separating nested keys
//!    (`RELAYBUS_SERVER__PORT=9000`, `RELAYBUS_LOGGING__LEVEL=debug`)

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Json, Serialized};
use figment::Figment;
use tracing::debug;

use crate::errors::Result;
use crate::types::RelaySettings;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "RELAYBUS_";

/// Resolve the path to the settings file (`~/.relaybus/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".relaybus").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file is skipped. Malformed JSON, a value of the wrong type, or
/// a config the relay would refuse is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    if path.exists() {
        debug!(?path, "loading settings from file");
    } else {
        debug!(?path, "settings file not found, using defaults");
    }

    let settings: RelaySettings = figment(path).extract()?;
    settings.server.validate()?;
    Ok(settings)
}

/// The merged provider stack, for callers that layer more on top.
pub fn figment(path: &Path) -> Figment {
    Figment::from(Serialized::defaults(RelaySettings::default()))
        .merge(Json::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}
