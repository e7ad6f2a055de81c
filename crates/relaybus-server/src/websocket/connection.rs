//! One live WebSocket peer as seen by the rest of the relay.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, Utf8Bytes};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::DeliveryError;

/// Opaque connection identity, `conn_<uuid-v7>`.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generate a new unique id.
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }

    /// Wrap an existing string.
    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An opaque frame relayed between peers. Cloning is cheap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// A text frame.
    Text(Utf8Bytes),
    /// A binary frame.
    Binary(Bytes),
}

impl Payload {
    /// Size of the frame body in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Whether the frame body is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Extract a relayable payload; control frames yield `None`.
    pub fn from_message(message: Message) -> Option<Self> {
        match message {
            Message::Text(text) => Some(Self::Text(text)),
            Message::Binary(bytes) => Some(Self::Binary(bytes)),
            Message::Ping(_) | Message::Pong(_) | Message::Close(_) => None,
        }
    }

    /// Convert into a WebSocket frame for writing.
    pub fn into_message(self) -> Message {
        match self {
            Self::Text(text) => Message::Text(text),
            Self::Binary(bytes) => Message::Binary(bytes),
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.into())
    }
}

/// A connected peer.
///
/// The handler task owns the socket; everyone else talks to the peer
/// through the bounded queue feeding its writer.
pub struct Connection {
    /// Unique connection id.
    pub id: ConnectionId,
    tx: mpsc::Sender<Payload>,
    connected_at: Instant,
    is_alive: AtomicBool,
    dropped_messages: AtomicU64,
    overflowed: AtomicBool,
    kick: CancellationToken,
}

impl Connection {
    /// Create a connection around the sending side of its outbound queue.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Payload>) -> Self {
        Self {
            id,
            tx,
            connected_at: Instant::now(),
            is_alive: AtomicBool::new(true),
            dropped_messages: AtomicU64::new(0),
            overflowed: AtomicBool::new(false),
            kick: CancellationToken::new(),
        }
    }

    /// Queue a payload without waiting.
    ///
    /// A full queue means the peer cannot keep up: the payload is dropped and
    /// the connection is kicked so its handler tears it down. Only the send
    /// that trips the kick reports [`DeliveryError::Overflow`]; once kicked,
    /// every later send is dropped as [`DeliveryError::Closed`].
    pub fn send(&self, payload: Payload) -> Result<(), DeliveryError> {
        if self.kick.is_cancelled() {
            self.record_drop();
            return Err(DeliveryError::Closed);
        }
        match self.tx.try_send(payload) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.record_drop();
                if self.overflowed.swap(true, Ordering::AcqRel) {
                    return Err(DeliveryError::Closed);
                }
                self.kick.cancel();
                Err(DeliveryError::Overflow)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.record_drop();
                Err(DeliveryError::Closed)
            }
        }
    }

    fn record_drop(&self) {
        let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Total payloads this connection never received.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Ask the owning handler to disconnect this peer.
    pub fn kick(&self) {
        self.kick.cancel();
    }

    /// Whether [`kick`](Self::kick) has been called.
    pub fn is_kicked(&self) -> bool {
        self.kick.is_cancelled()
    }

    /// Resolves once the connection has been kicked.
    pub async fn kicked(&self) {
        self.kick.cancelled().await;
    }

    /// Record inbound activity for the heartbeat.
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
    }

    /// Check and reset the alive flag.
    ///
    /// Returns `true` if there was activity since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("dropped_messages", &self.drop_count())
            .field("kicked", &self.is_kicked())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection(capacity: usize) -> (Connection, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Connection::new(ConnectionId::new(), tx), rx)
    }

    #[test]
    fn id_has_prefix() {
        let id = ConnectionId::new();
        assert!(id.as_str().starts_with("conn_"), "got: {id}");
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn from_raw_preserves_value() {
        assert_eq!(ConnectionId::from_raw("c1").as_str(), "c1");
    }

    #[tokio::test]
    async fn send_queues_payload() {
        let (conn, mut rx) = make_connection(4);
        conn.send(Payload::from("hello")).unwrap();
        assert_eq!(rx.recv().await.unwrap(), Payload::from("hello"));
        assert_eq!(conn.drop_count(), 0);
    }

    #[tokio::test]
    async fn send_preserves_order() {
        let (conn, mut rx) = make_connection(8);
        for i in 0..5 {
            conn.send(Payload::Text(format!("msg_{i}").into())).unwrap();
        }
        for i in 0..5 {
            assert_eq!(rx.recv().await.unwrap(), Payload::Text(format!("msg_{i}").into()));
        }
    }

    #[test]
    fn full_queue_overflows_and_kicks() {
        let (conn, _rx) = make_connection(1);
        conn.send(Payload::from("first")).unwrap();
        assert_eq!(conn.send(Payload::from("second")), Err(DeliveryError::Overflow));
        assert!(conn.is_kicked());
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn overflow_reported_once_per_connection() {
        let (conn, _rx) = make_connection(1);
        conn.send(Payload::from("first")).unwrap();
        assert_eq!(conn.send(Payload::from("second")), Err(DeliveryError::Overflow));
        for _ in 0..3 {
            assert_eq!(conn.send(Payload::from("more")), Err(DeliveryError::Closed));
        }
        assert_eq!(conn.drop_count(), 4);
    }

    #[tokio::test]
    async fn kicked_connection_refuses_even_with_room() {
        let (conn, mut rx) = make_connection(4);
        conn.kick();
        assert_eq!(conn.send(Payload::from("late")), Err(DeliveryError::Closed));
        assert!(rx.try_recv().is_err());
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn closed_queue_does_not_kick() {
        let (conn, rx) = make_connection(1);
        drop(rx);
        assert_eq!(conn.send(Payload::from("x")), Err(DeliveryError::Closed));
        assert!(!conn.is_kicked());
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn kicked_resolves_after_kick() {
        let (conn, _rx) = make_connection(1);
        conn.kick();
        conn.kicked().await;
        assert!(conn.is_kicked());
    }

    #[test]
    fn check_alive_resets_flag() {
        let (conn, _rx) = make_connection(1);
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
    }

    #[test]
    fn payload_message_conversion() {
        let text = Payload::from("{\"hi\":\"there\"}");
        assert_eq!(Payload::from_message(text.clone().into_message()), Some(text));

        let binary = Payload::Binary(Bytes::from_static(&[1, 2, 3]));
        assert_eq!(binary.len(), 3);
        assert_eq!(Payload::from_message(binary.clone().into_message()), Some(binary));

        assert_eq!(Payload::from_message(Message::Ping(Bytes::new())), None);
        assert_eq!(Payload::from_message(Message::Close(None)), None);
    }

    #[test]
    fn empty_payload() {
        assert!(Payload::from("").is_empty());
    }
}
