//! Application-facing events. See [`Event`].

use std::{
    cell::Cell,
    collections::VecDeque,
    net::SocketAddr,
    rc::Rc,
};

use octs::Bytes;

use crate::{channel::DeliveryMethod, error::ErrorCode, peer::PeerId};

/// Why a peer was disconnected (`spec.md` §7, verbatim taxonomy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The remote side sent an explicit `Disconnect` first.
    RemoteConnectionClose,
    /// The local application called
    /// [`Manager::disconnect_peer`](crate::manager::Manager::disconnect_peer)
    /// (or `disconnect_all`) and the remote side acknowledged it.
    DisconnectPeerCalled,
    /// No packet was received within `DisconnectTimeout`.
    Timeout,
    /// A pending `connect()` never received a `ConnectAccept` within
    /// `MaxConnectAttempts` retries.
    ConnectionFailed,
    /// `sendto` failed with an unexpected error code.
    SocketSendError,
}

/// A pending inbound connection, surfaced so the application can decide
/// whether to accept it.
///
/// Dropping this without calling [`Self::accept`] or [`Self::reject`] is
/// equivalent to calling [`Self::reject`].
#[derive(Debug)]
pub struct ConnectionRequest {
    pub(crate) from: SocketAddr,
    pub(crate) connection_id: u64,
    pub(crate) payload: Bytes,
    /// Shared with the `Manager`'s pending-connections table: the event
    /// itself outlives the tick it was produced on (the application decides
    /// on its own schedule), so the decision can't be returned through this
    /// value's lifetime. The `Manager` polls this cell on a later tick.
    pub(crate) decision: Rc<Cell<Option<bool>>>,
}

impl ConnectionRequest {
    /// The remote address requesting a connection.
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.from
    }

    /// The application key/payload the client attached to its request.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Accepts this request; the `Manager` will emit a `ConnectAccept` on
    /// a later tick.
    pub fn accept(&mut self) {
        self.decision.set(Some(true));
    }

    /// Rejects this request; no reply is sent per `spec.md`'s handshake.
    ///
    /// Equivalent to dropping this value without calling either method.
    pub fn reject(&mut self) {
        self.decision.set(Some(false));
    }
}

/// Which side-channel an [`Event::ReceiveUnconnected`] arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnconnectedKind {
    /// A raw application payload (`UnconnectedMessagesEnabled`).
    Message,
    /// A discovery broadcast; the application replies with
    /// [`Manager::send_discovery_response`](crate::manager::Manager::send_discovery_response).
    DiscoveryRequest,
}

/// Tagged union of everything the application can observe, per `spec.md`
/// §3's `Event` data model.
#[derive(Debug)]
pub enum Event {
    /// A handshake completed; `peer` is now `Connected`.
    Connect {
        /// The peer that connected.
        peer: PeerId,
    },
    /// A peer was removed from the table.
    Disconnect {
        /// The peer that disconnected.
        peer: PeerId,
        /// Why.
        reason: DisconnectReason,
        /// Application payload attached to an explicit `Disconnect`, if any.
        payload: Bytes,
    },
    /// A message arrived from a connected peer.
    Receive {
        /// The sender.
        peer: PeerId,
        /// The reassembled payload.
        payload: Bytes,
        /// Which delivery method it arrived on.
        delivery: DeliveryMethod,
        /// Which numbered channel it arrived on.
        channel: u8,
    },
    /// An unconnected message or discovery request arrived.
    ReceiveUnconnected {
        /// The sender's address.
        from: SocketAddr,
        /// The payload.
        payload: Bytes,
        /// Which side-channel this arrived on.
        kind: UnconnectedKind,
    },
    /// A transient or fatal I/O condition occurred.
    Error {
        /// The peer involved, if any.
        peer: Option<PeerId>,
        /// What went wrong.
        code: ErrorCode,
    },
    /// `avgRtt` for a peer was recomputed.
    ConnectionLatencyUpdated {
        /// The peer.
        peer: PeerId,
        /// New average RTT, in milliseconds.
        avg_rtt_ms: u32,
    },
    /// A remote peer is requesting a connection; the application must
    /// inspect and [`ConnectionRequest::accept`] or reject it.
    ConnectionRequest(ConnectionRequest),
}

/// FIFO queue of pending [`Event`]s.
///
/// `spec.md` §3 describes events as "pool-allocated"; this crate instead
/// buffers them in a plain queue and lets the application consume them with
/// [`EventQueue::drain`], per the redesign notes' suggestion to substitute a
/// queue of tagged events for the source's direct-callback dispatch.
#[derive(Debug, Default)]
pub struct EventQueue {
    queue: VecDeque<Event>,
}

impl EventQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, event: Event) {
        self.queue.push_back(event);
    }

    /// Pops the next pending event, if any.
    pub fn pop(&mut self) -> Option<Event> {
        self.queue.pop_front()
    }

    /// Drains every pending event in arrival order.
    pub fn drain(&mut self) -> impl Iterator<Item = Event> + '_ {
        self.queue.drain(..)
    }

    /// Number of events waiting to be consumed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the queue has no pending events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut q = EventQueue::new();
        q.push(Event::Connect { peer: PeerId(1) });
        q.push(Event::Connect { peer: PeerId(2) });
        let drained: Vec<_> = q.drain().collect();
        assert_eq!(2, drained.len());
        assert!(matches!(drained[0], Event::Connect { peer: PeerId(1) }));
        assert!(matches!(drained[1], Event::Connect { peer: PeerId(2) }));
    }
}
