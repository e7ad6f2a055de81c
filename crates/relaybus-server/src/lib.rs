//! # relaybus-server
//!
//! A WebSocket broadcast relay: every frame one client sends on the
//! broadcast channel is re-sent to every other connected client.
//!
//! - [`launch`] / [`launch_relay_server`] run a relay on a dedicated worker
//!   thread and return a [`RelayHandle`] with its URI and `close(timeout)`.
//! - [`RelayServer`] can instead be served inside an existing runtime.
//! - Fan-out never waits on a recipient: each has a bounded queue, and a
//!   recipient whose queue fills up is disconnected.
//! - Connections asking for any path other than the broadcast path are
//!   refused with 404.

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod metrics;
pub mod port;
pub mod server;
pub mod websocket;

pub use config::RelayConfig;
pub use errors::{DeliveryError, RelayError, Result};
pub use lifecycle::{launch, launch_relay_server, RelayHandle};
pub use metrics::{RelayStats, StatsSnapshot};
pub use port::allocate_port;
pub use server::{RelayServer, RuntimeState};
pub use websocket::connection::{ConnectionId, Payload};
pub use websocket::connection_set::ConnectionSet;
