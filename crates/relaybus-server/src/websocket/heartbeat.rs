//! Liveness monitoring for a connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};

use super::connection::Connection;

/// Resolve once `connection` has been silent for too long.
///
/// At each `interval` tick the alive flag is checked and reset. Any inbound
/// frame (data, ping, or pong) sets it again. After `timeout / interval`
/// consecutive silent intervals (at least 1) this returns.
pub async fn watch_liveness(connection: Arc<Connection>, interval: Duration, timeout: Duration) {
    let mut check = time::interval_at(time::Instant::now() + interval, interval);
    check.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let max_missed = max_missed(interval, timeout);
    let mut missed: u32 = 0;

    loop {
        let _ = check.tick().await;
        if connection.check_alive() {
            missed = 0;
        } else {
            missed += 1;
            if missed >= max_missed {
                return;
            }
        }
    }
}

fn max_missed(interval: Duration, timeout: Duration) -> u32 {
    let interval_ms = interval.as_millis().max(1);
    u32::try_from(timeout.as_millis() / interval_ms)
        .unwrap_or(u32::MAX)
        .max(1)
}
