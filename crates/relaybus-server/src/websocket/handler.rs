//! Per-connection lifecycle: register, relay until the peer goes away,
//! deregister.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, Instrument};

use super::connection::{Connection, ConnectionId, Payload};
use super::heartbeat::watch_liveness;
use super::relay::fan_out;
use crate::server::AppState;

/// Why a connection left the set. Cleanup is the same for all of them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// Close frame or end of stream from the peer.
    ClientClosed,
    /// Read or write failed.
    NetworkError,
    /// The peer's send buffer filled up.
    Overflow,
    /// No inbound frames within the heartbeat timeout.
    HeartbeatTimeout,
}

impl CloseReason {
    /// Short label for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::NetworkError => "network_error",
            Self::Overflow => "overflow",
            Self::HeartbeatTimeout => "heartbeat_timeout",
        }
    }
}

/// Drive an upgraded socket on the broadcast channel until it closes.
pub async fn handle_connection(socket: WebSocket, state: AppState) {
    let (tx, rx) = mpsc::channel(state.config.send_buffer);
    let connection = Arc::new(Connection::new(ConnectionId::new(), tx));
    let span = info_span!("connection", conn_id = %connection.id);
    run_connection(socket, connection, rx, state).instrument(span).await;
}

async fn run_connection(
    socket: WebSocket,
    connection: Arc<Connection>,
    rx: mpsc::Receiver<Payload>,
    state: AppState,
) {
    // Dropping this removes and counts the connection, whichever way we leave.
    let _membership = state
        .connections
        .register(Arc::clone(&connection))
        .counted_in(Arc::clone(&state.stats));
    state.stats.record_accepted();
    info!(peers = state.connections.len(), "connection accepted");

    let (ws_tx, ws_rx) = socket.split();
    let interval = state.config.heartbeat_interval();

    let reason = tokio::select! {
        reason = read_loop(ws_rx, &connection, &state) => reason,
        reason = write_loop(ws_tx, rx, interval) => reason,
        () = watch_liveness(Arc::clone(&connection), interval, state.config.heartbeat_timeout()) => {
            CloseReason::HeartbeatTimeout
        }
        () = connection.kicked() => CloseReason::Overflow,
    };

    info!(
        reason = reason.as_str(),
        dropped = connection.drop_count(),
        age_ms = u64::try_from(connection.age().as_millis()).unwrap_or(u64::MAX),
        "connection closed"
    );
}

/// Receive frames and fan each data frame out to the other peers.
async fn read_loop(
    mut ws_rx: SplitStream<WebSocket>,
    connection: &Connection,
    state: &AppState,
) -> CloseReason {
    while let Some(frame) = ws_rx.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "read failed");
                return CloseReason::NetworkError;
            }
        };
        connection.mark_alive();
        if let Message::Close(frame) = &message {
            debug!(?frame, "close frame received");
            return CloseReason::ClientClosed;
        }
        if let Some(payload) = Payload::from_message(message) {
            state.stats.record_received();
            let _ = fan_out(&state.connections, &connection.id, &payload, &state.stats);
        }
    }
    CloseReason::ClientClosed
}

/// Forward queued payloads to the socket, pinging on every heartbeat tick.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Payload>,
    heartbeat: Duration,
) -> CloseReason {
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);
    loop {
        tokio::select! {
            queued = rx.recv() => {
                let Some(payload) = queued else {
                    return CloseReason::ClientClosed;
                };
                if let Err(e) = ws_tx.send(payload.into_message()).await {
                    debug!(error = %e, "write failed");
                    return CloseReason::NetworkError;
                }
            }
            _ = ping.tick() => {
                if let Err(e) = ws_tx.send(Message::Ping(Bytes::new())).await {
                    debug!(error = %e, "ping failed");
                    return CloseReason::NetworkError;
                }
            }
        }
    }
}
