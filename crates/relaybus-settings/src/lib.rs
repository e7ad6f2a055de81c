//! # relaybus-settings
//!
//! Layered configuration for the `relaybus` binary.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **User file**: `~/.relaybus/settings.json`, or a path given on the
//!    command line
//! 3. **Environment variables**: `RELAYBUS_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{load_settings, load_settings_from_path, settings_path};
pub use types::{LoggingSettings, RelaySettings};
