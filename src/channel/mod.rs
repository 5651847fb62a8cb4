//! Per-delivery-method send/recv state machines. See [`Channel`].

mod reliable;
mod sequenced;
mod simple;

pub use reliable::ReliableChannel;
pub use sequenced::SequencedChannel;
pub use simple::SimpleChannel;

use std::time::{Duration, Instant};

use octs::Bytes;

use crate::packet::{FragmentInfo, Packet, PacketPool, PacketProperty};

/// Which of the four delivery methods a payload or [`Channel`] uses.
///
/// `spec.md` §4.3. `ReliableSequenced` is enumerated on the wire
/// ([`PacketProperty::ReliableSequenced`]) but treated as reserved; no
/// variant is offered here for it per §9's open questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryMethod {
    /// In-order, reliable, deduplicated.
    ReliableOrdered,
    /// Reliable and deduplicated, surfaced in arrival order.
    ReliableUnordered,
    /// Unreliable, but stale-dropping: only the newest message survives.
    Sequenced,
    /// Unreliable, unordered, no ACK.
    Simple,
}

impl DeliveryMethod {
    /// The wire property a freshly-sent message of this delivery method uses.
    #[must_use]
    pub const fn packet_property(self) -> PacketProperty {
        match self {
            Self::ReliableOrdered => PacketProperty::ReliableOrdered,
            Self::ReliableUnordered => PacketProperty::ReliableUnordered,
            Self::Sequenced => PacketProperty::Sequenced,
            Self::Simple => PacketProperty::Unreliable,
        }
    }
}

/// Common shape implemented by every per-delivery-method state machine
/// (`spec.md` §4.3).
pub trait Channel {
    /// Enqueues an already-framed outgoing payload. `fragment` carries the
    /// fragment placement, if this payload is one chunk of a larger message
    /// (`spec.md` §4.4); the channel must retain and resend it alongside the
    /// payload bytes, since fragmented reassembly keys off it at the peer.
    fn add_to_queue(&mut self, fragment: Option<FragmentInfo>, payload: Bytes);

    /// Pops due packets (new sends, retransmissions, and pending ACKs) into
    /// `out`, ready for the socket path. May push more than one packet.
    fn send_next_packets(
        &mut self,
        pool: &mut PacketPool,
        channel: u8,
        mtu: usize,
        avg_rtt: Duration,
        now: Instant,
        out: &mut Vec<Packet>,
    );

    /// Consumes an incoming packet already addressed to this channel.
    ///
    /// Returns whether `packet`'s payload should be surfaced to the
    /// application immediately. Channels that buffer/reorder instead return
    /// `false` here and make payloads available through
    /// [`Channel::poll_incoming`].
    fn process_packet(&mut self, packet: &Packet, now: Instant) -> bool;

    /// Dequeues the next in-order payload ready to surface, paired with its
    /// fragment placement if it was sent as one chunk of a larger message.
    fn poll_incoming(&mut self) -> Option<(Option<FragmentInfo>, Bytes)>;
}
