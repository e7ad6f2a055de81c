//! Free-port discovery so the relay never hardcodes a port.

use std::net::TcpListener;

use tracing::debug;

use crate::errors::{display_addr, RelayError, Result};

/// Ask the OS for a port that is free on `host` right now.
///
/// Binds a throwaway listener to port 0, reads back the assigned port and
/// releases the socket. The port is only known to be free at the instant
/// of the check; nothing reserves it for the caller.
pub fn allocate_port(host: &str) -> Result<u16> {
    let listener = TcpListener::bind(display_addr(host, 0)).map_err(RelayError::PortAllocation)?;
    let port = listener
        .local_addr()
        .map_err(RelayError::PortAllocation)?
        .port();
    drop(listener);
    debug!(host, port, "allocated port");
    Ok(port)
}
