//! WebSocket connection management, fan-out, and heartbeat.

pub mod connection;
pub mod connection_set;
pub mod handler;
pub mod heartbeat;
pub mod relay;
