//! `RelayServer`: the listener, the single broadcast route, and the serve
//! loop.

use std::future::IntoFuture;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use axum::extract::{State, WebSocketUpgrade};
use axum::http::{StatusCode, Uri};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::RelayConfig;
use crate::errors::{display_addr, RelayError, Result};
use crate::metrics::RelayStats;
use crate::websocket::connection_set::ConnectionSet;
use crate::websocket::handler::handle_connection;

/// Where a relay instance is in its life.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RuntimeState {
    /// Built but not yet accepting.
    Created = 0,
    /// Accepting connections.
    Listening = 1,
    /// Shutdown requested, no longer accepting.
    Stopping = 2,
    /// Execution context gone.
    Stopped = 3,
}

/// Shared, lock-free holder for a [`RuntimeState`].
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(RuntimeState::Created as u8))
    }

    /// Current state.
    pub fn get(&self) -> RuntimeState {
        match self.0.load(Ordering::Acquire) {
            0 => RuntimeState::Created,
            1 => RuntimeState::Listening,
            2 => RuntimeState::Stopping,
            _ => RuntimeState::Stopped,
        }
    }

    pub(crate) fn set(&self, state: RuntimeState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Relay configuration.
    pub config: Arc<RelayConfig>,
    /// Live connections on the broadcast channel.
    pub connections: Arc<ConnectionSet>,
    /// Relay counters.
    pub stats: Arc<RelayStats>,
}

/// The relay server.
pub struct RelayServer {
    config: Arc<RelayConfig>,
    connections: Arc<ConnectionSet>,
    stats: Arc<RelayStats>,
    state: Arc<StateCell>,
}

impl RelayServer {
    /// Create a new server.
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config: Arc::new(config),
            connections: Arc::new(ConnectionSet::new()),
            stats: Arc::new(RelayStats::new()),
            state: Arc::new(StateCell::new()),
        }
    }

    /// Build the router: the broadcast route, and a 404 for everything else.
    pub fn router(&self) -> Router {
        let state = AppState {
            config: Arc::clone(&self.config),
            connections: Arc::clone(&self.connections),
            stats: Arc::clone(&self.stats),
        };

        Router::new()
            .route(&self.config.route(), get(ws_handler))
            .fallback(channel_not_found)
            .with_state(state)
    }

    /// Bind the configured `host:port`.
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = display_addr(&self.config.host, self.config.port);
        TcpListener::bind(&addr)
            .await
            .map_err(|e| RelayError::bind(&addr, e))
    }

    /// Accept and relay until `shutdown` fires.
    ///
    /// Returning stops the accept loop only. Connections already open are
    /// tasks on the hosting runtime and live until that runtime drops them.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) {
        let addr = listener.local_addr().ok();
        self.state.set(RuntimeState::Listening);
        info!(?addr, route = %self.config.route(), "relay listening");

        tokio::select! {
            result = axum::serve(listener, self.router()).into_future() => {
                if let Err(e) = result {
                    warn!(error = %e, "relay accept loop failed");
                }
            }
            () = shutdown.cancelled() => {}
        }

        self.state.set(RuntimeState::Stopping);
        info!(
            open_connections = self.connections.len(),
            "relay stopped accepting"
        );
    }

    /// Live connections.
    pub fn connections(&self) -> &Arc<ConnectionSet> {
        &self.connections
    }

    /// Relay counters.
    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.stats
    }

    /// Lifecycle state.
    pub fn state(&self) -> &Arc<StateCell> {
        &self.state
    }

    /// Server configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }
}

/// GET /{broadcast_path}: WebSocket upgrade onto the broadcast channel.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.max_message_size(state.config.max_message_size)
        .on_failed_upgrade(|e| warn!(error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| handle_connection(socket, state))
}

/// Any other path: refused before it can join the channel.
async fn channel_not_found(State(state): State<AppState>, uri: Uri) -> (StatusCode, String) {
    state.stats.record_rejected();
    let err = RelayError::ChannelNotFound {
        path: uri.path().to_owned(),
    };
    warn!(path = uri.path(), "rejected connection for unknown channel");
    (StatusCode::NOT_FOUND, err.to_string())
}
