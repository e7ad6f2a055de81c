//! Broadcast fan-out.

use tracing::{debug, trace, warn};

use super::connection::{ConnectionId, Payload};
use super::connection_set::ConnectionSet;
use crate::errors::DeliveryError;
use crate::metrics::RelayStats;

/// Outcome of relaying one payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Recipients the payload was queued for.
    pub delivered: usize,
    /// Recipients whose queue was already closed.
    pub dropped: usize,
    /// Recipients disconnected because their queue was full.
    pub overflowed: usize,
}

impl FanOut {
    /// Number of recipients in the snapshot.
    pub fn recipients(&self) -> usize {
        self.delivered + self.dropped + self.overflowed
    }
}

/// Relay `payload` from `origin` to every other member of `connections`.
///
/// Each recipient gets an independent non-blocking enqueue, so a stalled
/// recipient delays nobody. Per-recipient failures stay here: they are
/// counted and logged, never returned to the sender.
pub fn fan_out(
    connections: &ConnectionSet,
    origin: &ConnectionId,
    payload: &Payload,
    stats: &RelayStats,
) -> FanOut {
    let mut outcome = FanOut::default();
    for recipient in connections.snapshot_excluding(origin) {
        match recipient.send(payload.clone()) {
            Ok(()) => outcome.delivered += 1,
            Err(DeliveryError::Closed) => {
                outcome.dropped += 1;
                debug!(from = %origin, to = %recipient.id, "recipient closed, payload dropped");
            }
            Err(DeliveryError::Overflow) => {
                outcome.overflowed += 1;
                warn!(
                    from = %origin,
                    to = %recipient.id,
                    dropped_total = recipient.drop_count(),
                    "recipient send buffer full, disconnecting"
                );
            }
        }
    }
    trace!(
        from = %origin,
        bytes = payload.len(),
        delivered = outcome.delivered,
        "relayed payload"
    );
    stats.record_fan_out(
        outcome.delivered as u64,
        (outcome.dropped + outcome.overflowed) as u64,
        outcome.overflowed as u64,
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    use crate::websocket::connection::Connection;

    fn join(
        set: &ConnectionSet,
        id: &str,
        capacity: usize,
    ) -> (Arc<Connection>, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = Arc::new(Connection::new(ConnectionId::from_raw(id), tx));
        assert!(set.add(Arc::clone(&conn)));
        (conn, rx)
    }

    #[test]
    fn reaches_everyone_but_sender() {
        let set = ConnectionSet::new();
        let stats = RelayStats::new();
        let (a, mut ra) = join(&set, "a", 8);
        let (_b, mut rb) = join(&set, "b", 8);
        let (_c, mut rc) = join(&set, "c", 8);

        let payload = Payload::from(r#"{"hi":"there"}"#);
        let outcome = fan_out(&set, &a.id, &payload, &stats);

        assert_eq!(outcome.delivered, 2);
        assert_eq!(rb.try_recv().unwrap(), payload);
        assert_eq!(rc.try_recv().unwrap(), payload);
        assert!(ra.try_recv().is_err());
        assert_eq!(stats.snapshot().deliveries, 2);
    }

    #[test]
    fn lone_sender_is_a_noop() {
        let set = ConnectionSet::new();
        let stats = RelayStats::new();
        let (a, mut ra) = join(&set, "a", 8);

        let outcome = fan_out(&set, &a.id, &Payload::from("ping"), &stats);

        assert_eq!(outcome, FanOut::default());
        assert!(ra.try_recv().is_err());
    }

    #[test]
    fn preserves_per_sender_order() {
        let set = ConnectionSet::new();
        let stats = RelayStats::new();
        let (a, _ra) = join(&set, "a", 16);
        let (_b, mut rb) = join(&set, "b", 16);

        for i in 0..10 {
            let _ = fan_out(&set, &a.id, &Payload::Text(format!("m{i}").into()), &stats);
        }
        for i in 0..10 {
            assert_eq!(rb.try_recv().unwrap(), Payload::Text(format!("m{i}").into()));
        }
    }

    #[test]
    fn closed_recipient_is_skipped() {
        let set = ConnectionSet::new();
        let stats = RelayStats::new();
        let (a, _ra) = join(&set, "a", 8);
        let (_b, rb) = join(&set, "b", 8);
        let (_c, mut rc) = join(&set, "c", 8);
        drop(rb);

        let outcome = fan_out(&set, &a.id, &Payload::from("x"), &stats);

        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.dropped, 1);
        assert!(rc.try_recv().is_ok());
        assert_eq!(stats.snapshot().deliveries_dropped, 1);
    }

    #[test]
    fn full_recipient_is_kicked_without_blocking_others() {
        let set = ConnectionSet::new();
        let stats = RelayStats::new();
        let (a, _ra) = join(&set, "a", 8);
        let (slow, _rslow) = join(&set, "slow", 1);
        let (_fast, mut rfast) = join(&set, "fast", 8);

        let first = fan_out(&set, &a.id, &Payload::from("1"), &stats);
        assert_eq!(first.delivered, 2);
        let second = fan_out(&set, &a.id, &Payload::from("2"), &stats);

        assert_eq!(second.delivered, 1);
        assert_eq!(second.overflowed, 1);
        assert_eq!(second.recipients(), 2);
        assert!(slow.is_kicked());
        assert_eq!(rfast.try_recv().unwrap(), Payload::from("1"));
        assert_eq!(rfast.try_recv().unwrap(), Payload::from("2"));

        let snap = stats.snapshot();
        assert_eq!(snap.overflow_disconnects, 1);
        assert_eq!(snap.deliveries_dropped, 1);
    }

    #[test]
    fn full_recipient_counts_one_disconnect() {
        let set = ConnectionSet::new();
        let stats = RelayStats::new();
        let (a, _ra) = join(&set, "a", 8);
        let (slow, _rslow) = join(&set, "slow", 1);

        let outcomes: Vec<FanOut> = (0..5)
            .map(|i| fan_out(&set, &a.id, &Payload::Text(format!("m{i}").into()), &stats))
            .collect();

        assert_eq!(outcomes[0].delivered, 1);
        assert_eq!(outcomes[1].overflowed, 1);
        assert!(outcomes[2..].iter().all(|o| o.overflowed == 0 && o.dropped == 1));
        assert!(slow.is_kicked());
        assert_eq!(slow.drop_count(), 4);

        let snap = stats.snapshot();
        assert_eq!(snap.deliveries, 1);
        assert_eq!(snap.deliveries_dropped, 4);
        assert_eq!(snap.overflow_disconnects, 1);
    }

    #[test]
    fn removed_recipient_gets_nothing() {
        let set = ConnectionSet::new();
        let stats = RelayStats::new();
        let (a, _ra) = join(&set, "a", 8);
        let (b, mut rb) = join(&set, "b", 8);
        let _ = set.remove(&b.id);

        let outcome = fan_out(&set, &a.id, &Payload::from("x"), &stats);

        assert_eq!(outcome.recipients(), 0);
        assert!(rb.try_recv().is_err());
    }
}
