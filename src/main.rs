//! # relaybus
//!
//! Standalone broadcast relay: `serve` runs one until Ctrl-C, `self-test`
//! checks that a frame from one client reaches another.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::{SinkExt, StreamExt};
use relaybus_server::{launch, RelayConfig, RelayHandle};
use relaybus_settings::RelaySettings;
use serde_json::{json, Value};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// WebSocket broadcast relay.
#[derive(Parser, Debug)]
#[command(name = "relaybus", about = "WebSocket broadcast relay", version)]
struct Cli {
    /// Settings file (defaults to `~/.relaybus/settings.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long, global = true)]
    host: Option<String>,

    /// Port to bind, 0 for a free one (overrides settings).
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Log filter when `RUST_LOG` is unset (overrides settings).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Run the relay until Ctrl-C.
    Serve,
    /// Launch a relay, pass one message between two clients, shut down.
    SelfTest {
        /// How long the second client waits for the message.
        #[arg(long, default_value_t = 500)]
        timeout_ms: u64,
    },
}

impl Cli {
    fn settings(&self) -> Result<RelaySettings> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(relaybus_settings::settings_path);
        let mut settings = relaybus_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;

        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings()?;

    if settings.logging.json {
        relaybus_logging::init_json_subscriber(&settings.logging.level);
    } else {
        relaybus_logging::init_subscriber(&settings.logging.level);
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(settings).await,
        Command::SelfTest { timeout_ms } => {
            let received = self_test(settings, Duration::from_millis(timeout_ms)).await?;
            println!("self-test passed: received {received}");
            Ok(())
        }
    }
}

async fn serve(settings: RelaySettings) -> Result<()> {
    let shutdown_timeout = settings.server.shutdown_timeout();
    let handle = start(settings.server).await?;
    println!("{}", handle.uri());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    close(handle, shutdown_timeout).await?;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Two clients on a fresh relay; one sends `{"hi": "there"}` and the other
/// must see it within `wait`. Returns what arrived.
async fn self_test(settings: RelaySettings, wait: Duration) -> Result<Value> {
    let shutdown_timeout = settings.server.shutdown_timeout();
    let handle = start(settings.server).await?;
    let outcome = exchange(&handle, wait).await;
    close(handle, shutdown_timeout).await?;
    outcome
}

async fn exchange(handle: &RelayHandle, wait: Duration) -> Result<Value> {
    let (mut sender, _) = connect_async(handle.uri())
        .await
        .context("First client failed to connect")?;
    let (mut receiver, _) = connect_async(handle.uri())
        .await
        .context("Second client failed to connect")?;

    let deadline = tokio::time::Instant::now() + wait;
    while handle.connection_count() < 2 {
        if tokio::time::Instant::now() >= deadline {
            bail!("relay registered {} of 2 clients", handle.connection_count());
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let sent = json!({"hi": "there"});
    sender
        .send(Message::text(sent.to_string()))
        .await
        .context("Failed to send test message")?;

    let received = tokio::time::timeout_at(deadline, async {
        while let Some(frame) = receiver.next().await {
            if let Message::Text(text) = frame? {
                return Ok(Some(text));
            }
        }
        Ok::<_, anyhow::Error>(None)
    })
    .await
    .context("Timed out waiting for the relayed message")??;

    let Some(text) = received else {
        bail!("relay closed the receiving client");
    };
    let value: Value = serde_json::from_str(text.as_str()).context("Relayed frame is not JSON")?;
    if value != sent {
        bail!("expected {sent}, received {value}");
    }

    let _ = sender.close(None).await;
    let _ = receiver.close(None).await;
    Ok(value)
}

/// `launch` waits for the worker to bind, so keep it off the async workers.
async fn start(config: RelayConfig) -> Result<RelayHandle> {
    tokio::task::spawn_blocking(move || launch(config))
        .await
        .context("Launch task panicked")?
        .context("Failed to launch relay")
}

async fn close(handle: RelayHandle, timeout: Duration) -> Result<()> {
    tokio::task::spawn_blocking(move || handle.close(timeout))
        .await
        .context("Close task panicked")?
        .context("Failed to stop relay")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_to_serve() {
        let cli = Cli::parse_from(["relaybus"]);
        assert!(cli.command.is_none());
        assert!(cli.port.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn cli_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["relaybus", "serve", "--port", "4100", "--host", "0.0.0.0"]);
        assert_eq!(cli.command, Some(Command::Serve));
        assert_eq!(cli.port, Some(4100));
        assert_eq!(cli.host.as_deref(), Some("0.0.0.0"));
    }

    #[test]
    fn cli_self_test_timeout() {
        let cli = Cli::parse_from(["relaybus", "self-test"]);
        assert_eq!(cli.command, Some(Command::SelfTest { timeout_ms: 500 }));

        let cli = Cli::parse_from(["relaybus", "self-test", "--timeout-ms", "2000"]);
        assert_eq!(cli.command, Some(Command::SelfTest { timeout_ms: 2000 }));
    }

    #[test]
    fn cli_flags_override_settings() {
        let cli = Cli::parse_from([
            "relaybus",
            "--config",
            "/nonexistent/relaybus.json",
            "--port",
            "4100",
            "--log-level",
            "debug",
        ]);
        let settings = cli.settings().unwrap();
        assert_eq!(settings.server.port, 4100);
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.server.broadcast_path, "broadcast");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn start_and_close_on_single_threaded_runtime() {
        let handle = start(RelayConfig::default()).await.unwrap();
        assert!(handle.uri().starts_with("ws://127.0.0.1:"));
        let uri = handle.uri().to_owned();
        close(handle, Duration::from_secs(2)).await.unwrap();
        assert!(connect_async(uri.as_str()).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn self_test_round_trip() {
        let received = self_test(RelaySettings::default(), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(received, json!({"hi": "there"}));
    }
}
