//! See [`Packet`] and [`PacketPool`].

pub mod header;
pub mod pool;

pub use header::{header_size, FragmentInfo, PacketHeader, PacketProperty};
pub use pool::PacketPool;

use octs::{Bytes, BytesMut};

use crate::{error::DecodeError, seq::Seq};

/// A single datagram's worth of data: header metadata plus the contiguous
/// wire bytes (header followed by payload).
///
/// Every [`Packet`] is either pool-owned (obtained from, and destined to be
/// returned to, a [`PacketPool`]) or user-owned (constructed directly, e.g.
/// in tests). There is no destructor-driven recycling: per `spec.md` §9,
/// ownership of a `Packet` is moved explicitly to whoever is responsible for
/// it next, and [`PacketPool::recycle`] is an ordinary method call, not a
/// [`Drop`] impl. A `Packet` that is simply dropped without being recycled
/// has its buffer freed like any other Rust value.
#[derive(Debug, Clone)]
pub struct Packet {
    header: PacketHeader,
    buf: BytesMut,
    /// While set, [`PacketPool::recycle`] is a no-op for this packet (it is
    /// pinned, e.g. referenced by a pending [`Event`](crate::event::Event)).
    dont_recycle_now: bool,
}

impl Packet {
    /// Builds a packet from its parts, encoding the header into a
    /// pool-sourced buffer.
    pub(crate) fn build(
        pool: &mut PacketPool,
        property: PacketProperty,
        channel: u8,
        sequence: Seq,
        fragment: Option<FragmentInfo>,
        payload: &[u8],
    ) -> Self {
        let header = PacketHeader {
            property,
            sequence,
            channel,
            fragment,
        };
        let total = header.encode_len() + payload.len();
        let mut buf = pool.take(total);
        header.encode(&mut buf);
        buf.extend_from_slice(payload);
        Self {
            header,
            buf,
            dont_recycle_now: false,
        }
    }

    /// Parses a packet from received wire bytes.
    ///
    /// Returns `None` if the header is malformed; per `spec.md` §7 this is
    /// always treated as "drop the datagram silently" by callers.
    pub(crate) fn decode(pool: &mut PacketPool, bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut view = Bytes::copy_from_slice(bytes);
        let header = PacketHeader::decode(&mut view)?;
        let mut buf = pool.take(bytes.len());
        buf.extend_from_slice(bytes);
        Ok(Self {
            header,
            buf,
            dont_recycle_now: false,
        })
    }

    /// Kind of payload this packet carries.
    #[must_use]
    pub fn property(&self) -> PacketProperty {
        self.header.property
    }

    /// Logical channel number, meaningful only if `property().has_channel()`.
    #[must_use]
    pub fn channel(&self) -> u8 {
        self.header.channel
    }

    /// Sequence number, meaningful only if `property().is_sequenced()`.
    #[must_use]
    pub fn sequence(&self) -> Seq {
        self.header.sequence
    }

    /// Fragment placement, if this packet is part of a fragmented message.
    #[must_use]
    pub fn fragment(&self) -> Option<FragmentInfo> {
        self.header.fragment
    }

    /// Total encoded size, i.e. `GetDataSize() + HeaderSize(property)`.
    #[must_use]
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    /// Length of the payload, excluding the header.
    #[must_use]
    pub fn data_size(&self) -> usize {
        self.buf.len() - self.header.encode_len()
    }

    /// The payload bytes, excluding the header.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.buf[self.header.encode_len()..]
    }

    /// The full wire bytes (header + payload), ready to hand to a socket.
    #[must_use]
    pub fn wire_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Whether [`PacketPool::recycle`] should treat this packet as pinned.
    #[must_use]
    pub fn dont_recycle_now(&self) -> bool {
        self.dont_recycle_now
    }

    /// Pins or unpins this packet against recycling, e.g. while it is
    /// referenced by a pending event.
    pub fn set_dont_recycle_now(&mut self, pinned: bool) {
        self.dont_recycle_now = pinned;
    }

    pub(crate) fn into_buf(self) -> BytesMut {
        self.buf
    }
}

impl PacketPool {
    /// Returns a zero-initialized packet whose buffer is at least
    /// `payload_size + HeaderSize(property)` bytes.
    pub fn get(&mut self, property: PacketProperty, channel: u8, payload_size: usize) -> Packet {
        let header = PacketHeader {
            property,
            sequence: Seq(0),
            channel,
            fragment: None,
        };
        let total = header.encode_len() + payload_size;
        let mut buf = self.take(total);
        header.encode(&mut buf);
        buf.resize(total, 0);
        Packet {
            header,
            buf,
            dont_recycle_now: false,
        }
    }

    /// Parses a packet straight from received wire bytes. Returns `None` if
    /// the header is malformed.
    pub fn get_and_read(&mut self, bytes: &[u8]) -> Option<Packet> {
        Packet::decode(self, bytes).ok()
    }

    /// Builds a packet carrying `payload` verbatim, with sequence `0` and no
    /// fragmentation - a convenience for control/handshake packets.
    pub fn get_with_data(&mut self, property: PacketProperty, channel: u8, payload: &[u8]) -> Packet {
        Packet::build(self, property, channel, Seq(0), None, payload)
    }

    /// Returns `packet`'s buffer to its bucket, unless it is oversize or
    /// [`Packet::dont_recycle_now`] is set.
    pub fn recycle(&mut self, packet: Packet) {
        if packet.dont_recycle_now {
            return;
        }
        self.give(packet.into_buf());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_then_recycle_then_get() {
        let mut pool = PacketPool::with_limit(8);
        let p = pool.get(PacketProperty::ReliableOrdered, 0, 100);
        assert!(p.size() >= 100);
        assert_eq!(100, p.data_size());
        pool.recycle(p);
        let p2 = pool.get(PacketProperty::ReliableOrdered, 0, 90);
        assert!(p2.size() >= 90);
    }

    #[test]
    fn recycle_is_noop_when_pinned() {
        let mut pool = PacketPool::with_limit(8);
        let mut p = pool.get(PacketProperty::Unreliable, 0, 10);
        p.set_dont_recycle_now(true);
        pool.recycle(p);
        // the pinned packet's buffer was dropped, not pooled: the next `get`
        // for the same size class still has to allocate fresh.
        let fresh = pool.take(10);
        assert!(fresh.capacity() >= 10);
    }

    #[test]
    fn get_and_read_round_trips_payload() {
        let mut pool = PacketPool::with_limit(8);
        let built = pool.get_with_data(PacketProperty::Ping, 0, b"hello");
        let wire = built.wire_bytes().to_vec();
        let parsed = pool.get_and_read(&wire).unwrap();
        assert_eq!(b"hello", parsed.payload());
        assert_eq!(PacketProperty::Ping, parsed.property());
    }

    #[test]
    fn get_and_read_rejects_malformed() {
        let mut pool = PacketPool::with_limit(8);
        assert!(pool.get_and_read(&[31]).is_none());
    }
}
