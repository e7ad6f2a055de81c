//! Running a relay in the background.
//!
//! [`launch`] starts one dedicated worker thread that owns a current-thread
//! `tokio` runtime; the accept loop and every connection are tasks on that
//! one runtime. The launcher only ever talks to the worker through
//! thread-safe handoffs: a readiness channel at start, a cancellation token
//! to stop, and a completion channel for a bounded join.
//!
//! Stopping drops the runtime, and with it every open connection. Peers see
//! the TCP stream end without a close frame.

use std::net::SocketAddr;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::errors::{display_addr, RelayError, Result};
use crate::metrics::{RelayStats, StatsSnapshot};
use crate::port::allocate_port;
use crate::server::{RelayServer, RuntimeState, StateCell};
use crate::websocket::connection_set::ConnectionSet;

/// Launch a relay on loopback with default settings.
pub fn launch_relay_server() -> Result<RelayHandle> {
    launch(RelayConfig::default())
}

/// Launch a relay on its own worker thread.
///
/// Blocks only until the listener is bound. A `port` of 0 is replaced by
/// one from [`allocate_port`].
pub fn launch(mut config: RelayConfig) -> Result<RelayHandle> {
    config.validate()?;
    if config.port == 0 {
        config.port = allocate_port(&config.host)?;
    }

    let uri = format!(
        "ws://{}{}",
        display_addr(&config.host, config.port),
        config.route()
    );
    let server = RelayServer::new(config);
    let connections = Arc::clone(server.connections());
    let stats = Arc::clone(server.stats());
    let state = Arc::clone(server.state());
    let shutdown = CancellationToken::new();

    let (ready_tx, ready_rx) = mpsc::channel::<Result<SocketAddr>>();
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let worker_token = shutdown.clone();
    let worker_state = Arc::clone(&state);
    let port = server.config().port;

    let thread = thread::Builder::new()
        .name(format!("relaybus-{port}"))
        .spawn(move || {
            // Held until the thread exits, so the launcher sees the channel
            // disconnect even if the worker panics.
            let _done = done_tx;
            run_worker(&server, &worker_token, &ready_tx);
            worker_state.set(RuntimeState::Stopped);
        })
        .map_err(RelayError::Runtime)?;

    let local_addr = match ready_rx.recv() {
        Ok(Ok(addr)) => addr,
        Ok(Err(e)) => {
            let _ = thread.join();
            return Err(e);
        }
        Err(_) => {
            let _ = thread.join();
            return Err(RelayError::LaunchAborted);
        }
    };

    info!(%uri, %local_addr, "relay launched");
    Ok(RelayHandle {
        uri,
        local_addr,
        connections,
        stats,
        state,
        shutdown,
        worker: Mutex::new(Some(Worker {
            thread,
            done: done_rx,
        })),
    })
}

/// Body of the worker thread: build the runtime, bind, report, serve.
fn run_worker(
    server: &RelayServer,
    shutdown: &CancellationToken,
    ready: &mpsc::Sender<Result<SocketAddr>>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = ready.send(Err(RelayError::Runtime(e)));
            return;
        }
    };

    runtime.block_on(async {
        let listener = match server.bind().await {
            Ok(listener) => listener,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };
        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                let _ = ready.send(Err(RelayError::bind(&server.config().host, e)));
                return;
            }
        };
        server.state().set(RuntimeState::Listening);
        let _ = ready.send(Ok(addr));
        server.serve(listener, shutdown.clone()).await;
    });

    // Abandons every connection task still on the runtime.
    drop(runtime);
    debug!("relay runtime dropped");
}

struct Worker {
    thread: thread::JoinHandle<()>,
    done: mpsc::Receiver<()>,
}

/// Handle to a launched relay. Sole owner of its worker thread.
///
/// Dropping the handle without [`close`](Self::close) still signals the
/// worker to stop, but does not wait for it.
pub struct RelayHandle {
    uri: String,
    local_addr: SocketAddr,
    connections: Arc<ConnectionSet>,
    stats: Arc<RelayStats>,
    state: Arc<StateCell>,
    shutdown: CancellationToken,
    worker: Mutex<Option<Worker>>,
}

impl RelayHandle {
    /// How to connect: `ws://host:port/path`.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The address the listener actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Bound port.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Number of connections currently on the channel.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Relay counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Lifecycle state.
    pub fn state(&self) -> RuntimeState {
        self.state.get()
    }

    /// Whether the worker has fully stopped.
    pub fn is_closed(&self) -> bool {
        self.worker.lock().is_none()
    }

    /// Stop the relay and wait up to `timeout` for its worker to exit.
    ///
    /// Safe to call repeatedly: once the worker is gone later calls return
    /// `Ok(())` at once. After a timeout the worker is kept, so a later call
    /// can wait again.
    pub fn close(&self, timeout: Duration) -> Result<()> {
        let mut slot = self.worker.lock();
        let Some(worker) = slot.take() else {
            debug!(uri = %self.uri, "relay already closed");
            return Ok(());
        };

        if self.state.get() == RuntimeState::Listening {
            self.state.set(RuntimeState::Stopping);
        }
        self.shutdown.cancel();

        match worker.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.thread.join().is_err() {
                    error!(uri = %self.uri, "relay worker panicked");
                }
                self.state.set(RuntimeState::Stopped);
                info!(uri = %self.uri, "relay closed");
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(uri = %self.uri, ?timeout, "relay did not stop in time");
                *slot = Some(worker);
                Err(RelayError::ShutdownTimeout { timeout })
            }
        }
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for RelayHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayHandle")
            .field("uri", &self.uri)
            .field("local_addr", &self.local_addr)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
