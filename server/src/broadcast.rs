//! Realtime fan-out of order events between connected viewers.
//!
//! Every WebSocket client holds a [`Connection`] obtained from the shared
//! [`RealtimeHub`]. An event published by one connection is delivered,
//! unmodified, to every other live connection and never echoed back to its
//! sender. Events are not stored: a client that connects later does not see
//! earlier events.
//!
//! # Architecture
//!
//! - A tokio broadcast channel carries `(origin, event)` envelopes to all
//!   receivers. Each [`Connection`] skips envelopes it originated.
//! - A mutex-guarded map of [`ConnectionId`]s tracks which connections are
//!   live. Removing an id is idempotent, and a [`Connection`] removes itself
//!   when dropped.
//! - Each live entry owns a `watch` sender. Removing the entry drops it, which
//!   wakes a [`Connection::recv`] that is already waiting.
//!
//! Publishing never iterates peers, so a peer disconnecting mid-broadcast
//! cannot fail delivery to the others.
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use smartserve_server::broadcast::RealtimeHub;
//! use smartserve_server::types::{EventKind, RealtimeEvent};
//!
//! let hub = RealtimeHub::new();
//! let kitchen = hub.connect();
//! let mut floor = hub.connect();
//!
//! let peers = hub.publish(
//!     kitchen.id(),
//!     RealtimeEvent::new(EventKind::StatusUpdate, json!({ "orderId": "o-1" })),
//! );
//! assert_eq!(peers, 1);
//! assert_eq!(floor.try_recv().unwrap().kind, EventKind::StatusUpdate);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::broadcast::{self, Receiver, Sender};
use tokio::sync::watch;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::types::RealtimeEvent;

/// Default channel capacity for event distribution.
///
/// Receivers that fall further behind than this skip the oldest events and
/// log a warning.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Opaque identifier of one live realtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct Envelope {
    origin: ConnectionId,
    event: Arc<RealtimeEvent>,
}

/// Live connections, each with the sender half of its close signal.
type LiveSet = Arc<Mutex<HashMap<ConnectionId, watch::Sender<()>>>>;

fn lock(live: &LiveSet) -> MutexGuard<'_, HashMap<ConnectionId, watch::Sender<()>>> {
    live.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared hub relaying events between realtime connections.
///
/// `RealtimeHub` is `Clone`; clones share the same channel and live set.
#[derive(Clone)]
pub struct RealtimeHub {
    sender: Sender<Envelope>,
    live: LiveSet,
}

impl RealtimeHub {
    /// Creates a hub with [`DEFAULT_CHANNEL_CAPACITY`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a hub with the given channel capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        debug!(capacity, "Created realtime hub");
        Self {
            sender,
            live: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Registers a new live connection.
    ///
    /// The connection receives every event published after this call by any
    /// other connection.
    #[must_use]
    pub fn connect(&self) -> Connection {
        // Subscribe before going live so a live id always has a receiver.
        let receiver = self.sender.subscribe();
        let id = ConnectionId::generate();
        let (close_signal, closed) = watch::channel(());

        let count = {
            let mut live = lock(&self.live);
            live.insert(id, close_signal);
            live.len()
        };
        debug!(connection_id = %id, connections = count, "Realtime client connected");

        Connection {
            id,
            receiver,
            closed,
            live: Arc::clone(&self.live),
        }
    }

    /// Removes a connection from the live set.
    ///
    /// Returns `false` if it was already absent; removing twice is harmless.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let (removed, count) = {
            let mut live = lock(&self.live);
            let removed = live.remove(&id).is_some();
            (removed, live.len())
        };

        if removed {
            debug!(connection_id = %id, connections = count, "Realtime client disconnected");
        } else {
            trace!(connection_id = %id, "Disconnect for connection that is not live");
        }
        removed
    }

    /// Relays `event` to every live connection except `origin`.
    ///
    /// Returns the number of other connections that were live when the
    /// event was published. This method never blocks.
    pub fn publish(&self, origin: ConnectionId, event: RealtimeEvent) -> usize {
        let peers = {
            let live = lock(&self.live);
            live.len() - usize::from(live.contains_key(&origin))
        };

        trace!(
            connection_id = %origin,
            kind = ?event.kind,
            peers,
            "Relaying realtime event"
        );

        let envelope = Envelope {
            origin,
            event: Arc::new(event),
        };

        if self.sender.send(envelope).is_err() {
            // Only happens when no receivers exist at all.
            trace!("No realtime receivers");
            return 0;
        }

        peers
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        lock(&self.live).len()
    }

    /// Returns `true` if `id` is currently live.
    #[must_use]
    pub fn is_live(&self, id: ConnectionId) -> bool {
        lock(&self.live).contains_key(&id)
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RealtimeHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeHub")
            .field("connections", &self.connection_count())
            .finish()
    }
}

/// One live realtime connection.
///
/// Dropping the connection removes it from the hub's live set.
pub struct Connection {
    id: ConnectionId,
    receiver: Receiver<Envelope>,
    closed: watch::Receiver<()>,
    live: LiveSet,
}

impl Connection {
    /// This connection's identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    fn is_live(&self) -> bool {
        lock(&self.live).contains_key(&self.id)
    }

    /// Waits for the next event published by another connection.
    ///
    /// Returns `None` once this connection has been disconnected or the hub
    /// has gone away. A call already waiting when the connection is
    /// disconnected wakes and returns `None`.
    pub async fn recv(&mut self) -> Option<Arc<RealtimeEvent>> {
        loop {
            if !self.is_live() {
                return None;
            }

            let result = tokio::select! {
                biased;
                // The sender half is dropped when the connection leaves the live set.
                _ = self.closed.changed() => return None,
                result = self.receiver.recv() => result,
            };

            match result {
                Ok(envelope) if envelope.origin == self.id => continue,
                Ok(_) if !self.is_live() => return None,
                Ok(envelope) => return Some(envelope.event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(connection_id = %self.id, skipped, "Realtime client lagged, skipped events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next pending event from another connection, if any,
    /// without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<RealtimeEvent>> {
        loop {
            if !self.is_live() {
                return None;
            }

            match self.receiver.try_recv() {
                Ok(envelope) if envelope.origin == self.id => continue,
                Ok(envelope) => return Some(envelope.event),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(connection_id = %self.id, skipped, "Realtime client lagged, skipped events");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if lock(&self.live).remove(&self.id).is_some() {
            trace!(connection_id = %self.id, "Realtime connection dropped");
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventKind;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    fn order(n: u64) -> RealtimeEvent {
        RealtimeEvent::new(EventKind::NewOrder, json!({ "orderId": n }))
    }

    // ========================================================================
    // Live set
    // ========================================================================

    #[test]
    fn connect_adds_to_live_set() {
        let hub = RealtimeHub::new();
        assert_eq!(hub.connection_count(), 0);

        let a = hub.connect();
        let b = hub.connect();
        assert_eq!(hub.connection_count(), 2);
        assert!(hub.is_live(a.id()));
        assert!(hub.is_live(b.id()));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn disconnect_is_idempotent() {
        let hub = RealtimeHub::new();
        let a = hub.connect();

        assert!(hub.disconnect(a.id()));
        assert!(!hub.disconnect(a.id()));
        assert!(!hub.is_live(a.id()));
        assert_eq!(hub.connection_count(), 0);

        // Dropping after an explicit disconnect is also harmless.
        drop(a);
        assert_eq!(hub.connection_count(), 0);
    }

    #[test]
    fn drop_removes_connection() {
        let hub = RealtimeHub::new();
        let a = hub.connect();
        let _b = hub.connect();

        drop(a);
        assert_eq!(hub.connection_count(), 1);
    }

    #[test]
    fn clones_share_state() {
        let hub = RealtimeHub::new();
        let clone = hub.clone();
        let _a = hub.connect();
        assert_eq!(clone.connection_count(), 1);
    }

    // ========================================================================
    // Fan-out
    // ========================================================================

    #[test]
    fn publish_reaches_all_peers_but_not_sender() {
        let hub = RealtimeHub::new();
        let mut sender = hub.connect();
        let mut peers: Vec<Connection> = (0..4).map(|_| hub.connect()).collect();

        let delivered = hub.publish(sender.id(), order(1));
        assert_eq!(delivered, 4);

        for peer in &mut peers {
            let event = peer.try_recv().expect("peer receives event");
            assert_eq!(*event, order(1));
        }
        assert!(sender.try_recv().is_none());
    }

    #[test]
    fn publish_relays_payload_unchanged() {
        let hub = RealtimeHub::new();
        let sender = hub.connect();
        let mut peer = hub.connect();

        let payload = json!({
            "orderId": "o-42",
            "items": [{ "name": "Chicken Biryani", "qty": 2 }],
            "note": null,
        });
        hub.publish(
            sender.id(),
            RealtimeEvent::new(EventKind::NewOrder, payload.clone()),
        );

        let received = peer.try_recv().unwrap();
        assert_eq!(received.data, payload);
        assert_eq!(received.kind, EventKind::NewOrder);
    }

    #[test]
    fn publish_with_no_peers_returns_zero() {
        let hub = RealtimeHub::new();
        let sender = hub.connect();
        assert_eq!(hub.publish(sender.id(), order(1)), 0);
    }

    #[test]
    fn publish_without_any_receivers_returns_zero() {
        let hub = RealtimeHub::new();
        let ghost = hub.connect().id();
        assert_eq!(hub.publish(ghost, order(1)), 0);
    }

    #[test]
    fn events_from_one_sender_arrive_in_order() {
        let hub = RealtimeHub::new();
        let sender = hub.connect();
        let mut peer = hub.connect();

        for n in 0..10 {
            hub.publish(sender.id(), order(n));
        }
        for n in 0..10 {
            assert_eq!(*peer.try_recv().unwrap(), order(n));
        }
    }

    #[test]
    fn late_joiner_gets_no_replay() {
        let hub = RealtimeHub::new();
        let sender = hub.connect();
        let _early = hub.connect();

        hub.publish(sender.id(), order(1));

        let mut late = hub.connect();
        assert!(late.try_recv().is_none());
    }

    #[test]
    fn disconnected_connection_stops_receiving() {
        let hub = RealtimeHub::new();
        let sender = hub.connect();
        let mut peer = hub.connect();

        hub.disconnect(peer.id());
        hub.publish(sender.id(), order(1));
        assert!(peer.try_recv().is_none());
    }

    #[test]
    fn disconnect_during_broadcast_does_not_affect_others() {
        let hub = RealtimeHub::new();
        let sender = hub.connect();
        let leaving = hub.connect();
        let mut staying = hub.connect();

        hub.publish(sender.id(), order(1));
        drop(leaving);
        hub.publish(sender.id(), order(2));

        assert_eq!(*staying.try_recv().unwrap(), order(1));
        assert_eq!(*staying.try_recv().unwrap(), order(2));
    }

    #[test]
    fn lagging_receiver_skips_and_continues() {
        let hub = RealtimeHub::with_capacity(2);
        let sender = hub.connect();
        let mut slow = hub.connect();

        for n in 0..5 {
            hub.publish(sender.id(), order(n));
        }

        // The oldest events were dropped; the newest are still delivered.
        assert_eq!(*slow.try_recv().unwrap(), order(3));
        assert_eq!(*slow.try_recv().unwrap(), order(4));
        assert!(slow.try_recv().is_none());
    }

    #[tokio::test]
    async fn recv_waits_for_peer_event() {
        let hub = RealtimeHub::new();
        let sender = hub.connect();
        let mut peer = hub.connect();

        let publisher = hub.clone();
        let origin = sender.id();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher.publish(origin, order(7));
        });

        let event = timeout(Duration::from_secs(1), peer.recv())
            .await
            .expect("event within timeout")
            .expect("connection still live");
        assert_eq!(*event, order(7));
    }

    #[tokio::test]
    async fn recv_returns_none_after_disconnect() {
        let hub = RealtimeHub::new();
        let mut peer = hub.connect();
        hub.disconnect(peer.id());
        assert!(peer.recv().await.is_none());
    }

    #[tokio::test]
    async fn waiting_recv_sees_nothing_published_after_disconnect() {
        let hub = RealtimeHub::new();
        let sender = hub.connect();
        let mut peer = hub.connect();
        let peer_id = peer.id();

        let waiting = tokio::spawn(async move { peer.recv().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        hub.disconnect(peer_id);
        let counted = hub.publish(sender.id(), order(1));
        assert_eq!(counted, 0);

        let received = timeout(Duration::from_secs(1), waiting)
            .await
            .expect("recv wakes after disconnect")
            .unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn waiting_recv_wakes_on_disconnect_without_events() {
        let hub = RealtimeHub::new();
        let mut peer = hub.connect();
        let peer_id = peer.id();

        let waiting = tokio::spawn(async move { peer.recv().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        hub.disconnect(peer_id);

        let received = timeout(Duration::from_secs(1), waiting)
            .await
            .expect("recv wakes after disconnect")
            .unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn concurrent_connect_and_disconnect_keeps_set_consistent() {
        let hub = RealtimeHub::new();
        let publisher = hub.connect();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let hub = hub.clone();
            handles.push(tokio::spawn(async move {
                let conn = hub.connect();
                tokio::task::yield_now().await;
                hub.disconnect(conn.id());
                hub.disconnect(conn.id());
            }));
        }

        for n in 0..50 {
            hub.publish(publisher.id(), order(n));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(hub.connection_count(), 1);
    }
}
