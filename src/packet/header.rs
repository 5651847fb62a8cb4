//! Bit-exact wire header codec. See [`PacketProperty`] and [`PacketHeader`].

use octs::{Bytes, BytesMut, Read, Write};

use crate::{error::DecodeError, seq::Seq};

/// Kind of payload carried by a [`Packet`](super::Packet).
///
/// Encoded in the low 5 bits of the header's first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketProperty {
    /// Unreliable, unordered, no ACK - the `Simple` channel's wire form.
    Unreliable = 0,
    /// `ReliableUnordered` channel payload.
    ReliableUnordered = 1,
    /// `ReliableOrdered` channel payload.
    ReliableOrdered = 2,
    /// `Sequenced` channel payload.
    Sequenced = 3,
    /// Reserved; enumerated by the protocol but no channel implementation
    /// surfaces it (see `spec.md` §9 open questions).
    ReliableSequenced = 4,
    /// Acknowledgement for a reliable channel: `windowStart | bitmask`.
    Ack = 5,
    /// RTT probe carrying a monotonic stamp.
    Ping = 6,
    /// RTT probe reply, echoing the stamp.
    Pong = 7,
    /// Client → server handshake initiation.
    ConnectRequest = 8,
    /// Server → client handshake acceptance.
    ConnectAccept = 9,
    /// Either side's shutdown notification.
    Disconnect = 10,
    /// Reply to a [`Disconnect`](Self::Disconnect).
    ShutdownOk = 11,
    /// Unconnected user payload (only if enabled).
    UnconnectedMessage = 12,
    /// Unconnected discovery broadcast.
    DiscoveryRequest = 13,
    /// Unicast reply to a [`DiscoveryRequest`](Self::DiscoveryRequest).
    DiscoveryResponse = 14,
    /// MTU probe padded to a candidate size.
    MtuCheck = 15,
    /// Reply to a confirmed [`MtuCheck`](Self::MtuCheck).
    MtuOk = 16,
    /// NAT introduction payload relayed by a third peer.
    NatIntroduction = 17,
    /// Request for a NAT introduction.
    NatIntroductionRequest = 18,
    /// Direct NAT hole-punch probe.
    NatPunchMessage = 19,
    /// Container of concatenated small outbound packets.
    Merged = 20,
}

impl PacketProperty {
    /// Whether this property carries a 16-bit sequence number in the header.
    ///
    /// Only these properties are "sequenced"; `Unreliable` deliberately is
    /// not, since the `Simple` channel has no sequencing or ACK (`spec.md`
    /// §4.3.1).
    #[must_use]
    pub const fn is_sequenced(self) -> bool {
        matches!(
            self,
            Self::ReliableUnordered
                | Self::ReliableOrdered
                | Self::Sequenced
                | Self::ReliableSequenced
                | Self::Ack
        )
    }

    /// Whether this property carries a channel byte, immediately after the
    /// sequence number (`spec.md` §6).
    ///
    /// The four user-facing delivery classes carry it since `channel` is the
    /// numbered sub-stream a payload was sent on; `Ack` carries it too since
    /// an acknowledgement bitmap is itself tracked per channel (`spec.md`
    /// §3's `Channel.windowSize`).
    #[must_use]
    pub const fn has_channel(self) -> bool {
        matches!(
            self,
            Self::Unreliable
                | Self::ReliableUnordered
                | Self::ReliableOrdered
                | Self::Sequenced
                | Self::Ack
        )
    }

    fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::Unreliable,
            1 => Self::ReliableUnordered,
            2 => Self::ReliableOrdered,
            3 => Self::Sequenced,
            4 => Self::ReliableSequenced,
            5 => Self::Ack,
            6 => Self::Ping,
            7 => Self::Pong,
            8 => Self::ConnectRequest,
            9 => Self::ConnectAccept,
            10 => Self::Disconnect,
            11 => Self::ShutdownOk,
            12 => Self::UnconnectedMessage,
            13 => Self::DiscoveryRequest,
            14 => Self::DiscoveryResponse,
            15 => Self::MtuCheck,
            16 => Self::MtuOk,
            17 => Self::NatIntroduction,
            18 => Self::NatIntroductionRequest,
            19 => Self::NatPunchMessage,
            20 => Self::Merged,
            _ => return None,
        })
    }
}

/// Flag bits packed into the high 3 bits of the header's first byte.
mod flags {
    /// Bit 7. This datagram is an ACK for the given channel.
    pub const ACK: u8 = 0b1000_0000;
    /// Bit 6. The remaining header carries a [`FragmentInfo`](super::FragmentInfo).
    pub const FRAGMENTED: u8 = 0b0100_0000;
}

/// Fragment placement info, present only when the header's fragmented flag
/// is set. Six bytes: `fragmentId u16, fragmentPart u16, fragmentsTotal u16`,
/// all little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub struct FragmentInfo {
    /// Id shared by every fragment of one logical message, peer-unique and
    /// wrapping.
    pub fragment_id: u16,
    /// Index of this fragment within the message.
    pub fragment_part: u16,
    /// Total number of fragments in the message.
    pub fragments_total: u16,
}

/// Decoded form of a packet's header (everything before the payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Kind of payload this packet carries.
    pub property: PacketProperty,
    /// Sequence number, valid only if `property.is_sequenced()`.
    pub sequence: Seq,
    /// Numbered logical sub-stream this packet belongs to, valid only if
    /// `property.has_channel()` (`spec.md` §3 `channel (0..MaxChannels-1)`).
    pub channel: u8,
    /// Fragment placement, present only if the fragmented flag was set.
    pub fragment: Option<FragmentInfo>,
}

/// Header length in bytes for a [`PacketHeader`] with the given shape.
#[must_use]
pub const fn header_size(property: PacketProperty, is_fragmented: bool) -> usize {
    1 + if property.is_sequenced() { 2 } else { 0 }
        + if property.has_channel() { 1 } else { 0 }
        + if is_fragmented { 6 } else { 0 }
}

impl PacketHeader {
    /// Length in bytes this header will occupy once encoded.
    #[must_use]
    pub const fn encode_len(&self) -> usize {
        header_size(self.property, self.fragment.is_some())
    }

    /// Encodes this header's bytes into `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        let mut bits = 0u8;
        if self.property == PacketProperty::Ack {
            bits |= flags::ACK;
        }
        if self.fragment.is_some() {
            bits |= flags::FRAGMENTED;
        }
        let first_byte = bits | (self.property as u8);
        dst.write(&first_byte).expect("buffer should not overflow");

        if self.property.is_sequenced() {
            dst.write(&self.sequence.0).expect("buffer should not overflow");
        }
        if self.property.has_channel() {
            dst.write(&self.channel).expect("buffer should not overflow");
        }
        if let Some(frag) = self.fragment {
            dst.write(&frag.fragment_id).expect("buffer should not overflow");
            dst.write(&frag.fragment_part).expect("buffer should not overflow");
            dst.write(&frag.fragments_total).expect("buffer should not overflow");
        }
    }

    /// Decodes a header from the front of `src`, advancing it past the
    /// header bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the property byte is unknown, the buffer
    /// is too short, or a fragmented packet declares
    /// `fragment_part >= fragments_total`.
    pub fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        let first_byte: u8 = src.read().map_err(|_| DecodeError::BufferTooShort)?;
        let property_bits = first_byte & 0b0001_1111;
        let property =
            PacketProperty::from_u8(property_bits).ok_or(DecodeError::UnknownProperty(first_byte))?;
        let fragmented = first_byte & flags::FRAGMENTED != 0;

        let sequence = if property.is_sequenced() {
            Seq(src.read().map_err(|_| DecodeError::BufferTooShort)?)
        } else {
            Seq(0)
        };

        let channel = if property.has_channel() {
            src.read().map_err(|_| DecodeError::BufferTooShort)?
        } else {
            0
        };

        let fragment = if fragmented {
            let fragment_id = src.read().map_err(|_| DecodeError::BufferTooShort)?;
            let fragment_part: u16 = src.read().map_err(|_| DecodeError::BufferTooShort)?;
            let fragments_total: u16 = src.read().map_err(|_| DecodeError::BufferTooShort)?;
            if fragment_part >= fragments_total {
                return Err(DecodeError::InvalidFragmentIndex {
                    part: fragment_part,
                    total: fragments_total,
                });
            }
            Some(FragmentInfo {
                fragment_id,
                fragment_part,
                fragments_total,
            })
        } else {
            None
        };

        Ok(Self {
            property,
            sequence,
            channel,
            fragment,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(header: PacketHeader) {
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(header.encode_len(), buf.len());
        let mut bytes = buf.freeze();
        let decoded = PacketHeader::decode(&mut bytes).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn header_size_buckets() {
        assert_eq!(1, header_size(PacketProperty::Ping, false));
        assert_eq!(4, header_size(PacketProperty::ReliableOrdered, false));
        assert_eq!(10, header_size(PacketProperty::ReliableOrdered, true));
        assert_eq!(2, header_size(PacketProperty::Unreliable, false));
    }

    #[test]
    fn roundtrip_unsequenced() {
        roundtrip(PacketHeader {
            property: PacketProperty::Ping,
            sequence: Seq(0),
            channel: 0,
            fragment: None,
        });
    }

    #[test]
    fn roundtrip_sequenced() {
        roundtrip(PacketHeader {
            property: PacketProperty::ReliableOrdered,
            sequence: Seq(1234),
            channel: 3,
            fragment: None,
        });
    }

    #[test]
    fn roundtrip_fragmented() {
        roundtrip(PacketHeader {
            property: PacketProperty::ReliableOrdered,
            sequence: Seq(1),
            channel: 1,
            fragment: Some(FragmentInfo {
                fragment_id: 7,
                fragment_part: 2,
                fragments_total: 5,
            }),
        });
    }

    #[test]
    fn decode_unknown_property() {
        let mut bytes = Bytes::copy_from_slice(&[31]);
        assert!(PacketHeader::decode(&mut bytes).is_err());
    }

    #[test]
    fn decode_invalid_fragment_index() {
        let mut header = PacketHeader {
            property: PacketProperty::ReliableOrdered,
            sequence: Seq(1),
            channel: 0,
            fragment: Some(FragmentInfo {
                fragment_id: 0,
                fragment_part: 5,
                fragments_total: 5,
            }),
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        // tamper so frag_part >= frag_total survives encode (constructed
        // directly above to exercise decode's validation, not encode's)
        header.fragment = None;
        let mut bytes = buf.freeze();
        assert!(matches!(
            PacketHeader::decode(&mut bytes),
            Err(DecodeError::InvalidFragmentIndex { .. })
        ));
    }
}
