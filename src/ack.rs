//! Per-channel acknowledgement bitmap. See [`AckBitset`].

use bitvec::{bitvec, order::Lsb0, vec::BitVec};
use octs::{Bytes, BytesMut, Read, Write};

use crate::{error::DecodeError, seq::Seq};

/// Number of sequence slots tracked behind `windowStart`, per `spec.md` §3's
/// documented default (`windowSize (fixed, default 64 for reliable)`) and §6
/// (`bitmask[ceil(windowSize/8)]`).
pub const WINDOW_SIZE: usize = 64;

/// Sliding window of which sequence numbers have been received.
///
/// Wire body (`spec.md` §6): `windowStart u16 | bitmask[ceil(windowSize/8)]`.
/// Bit `N` set means sequence `windowStart + N` has been received. This is
/// the forward-indexed counterpart of the gaffer-style "last_recv minus N"
/// bitfield: `windowStart` here is the *oldest* tracked sequence rather than
/// the newest, which is what lets a reliable channel describe "everything
/// before this has been delivered" directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckBitset {
    window_start: Seq,
    bits: BitVec<u8, Lsb0>,
}

impl AckBitset {
    /// Creates an empty window starting at `window_start`.
    #[must_use]
    pub fn new(window_start: Seq) -> Self {
        Self {
            window_start,
            bits: bitvec![u8, Lsb0; 0; WINDOW_SIZE],
        }
    }

    /// The oldest sequence still tracked by this window.
    #[must_use]
    pub fn window_start(&self) -> Seq {
        self.window_start
    }

    /// Marks `seq` as received. Idempotent. No-op if `seq` falls behind the
    /// window or beyond its far edge (caller should grow the window via
    /// [`Self::advance_to`] first if it intends to track `seq`).
    pub fn ack(&mut self, seq: Seq) {
        let offset = self.window_start.dist_to(seq);
        if offset < 0 {
            return;
        }
        if let Ok(idx) = usize::try_from(offset) {
            if idx < WINDOW_SIZE {
                self.bits.set(idx, true);
            }
        }
    }

    /// Whether `seq` has been marked received.
    #[must_use]
    pub fn is_acked(&self, seq: Seq) -> bool {
        let offset = self.window_start.dist_to(seq);
        if offset < 0 {
            return false;
        }
        usize::try_from(offset)
            .ok()
            .filter(|&idx| idx < WINDOW_SIZE)
            .is_some_and(|idx| self.bits[idx])
    }

    /// Iterates every sequence currently marked received, oldest first.
    pub fn iter_acked(&self) -> impl Iterator<Item = Seq> + '_ {
        self.bits.iter_ones().map(|idx| self.window_start + Seq(u16::try_from(idx).expect("window fits in u16")))
    }

    /// Slides the window so `window_start` becomes `new_start`, shifting
    /// already-tracked bits along and clearing the freshly exposed tail.
    /// A no-op if `new_start` is not newer than the current start.
    pub fn advance_to(&mut self, new_start: Seq) {
        let shift = self.window_start.dist_to(new_start);
        let Ok(shift) = usize::try_from(shift) else {
            return;
        };
        if shift == 0 {
            return;
        }
        if shift >= WINDOW_SIZE {
            self.bits.fill(false);
        } else {
            self.bits.shift_left(shift);
        }
        self.window_start = new_start;
    }

    /// Advances `window_start` past the contiguous run of acked sequences
    /// starting at the current window start, returning how many slots were
    /// advanced.
    pub fn advance_contiguous(&mut self) -> u16 {
        let mut advanced = 0u16;
        while !self.bits.is_empty() && self.bits[0] {
            self.bits.shift_left(1);
            self.bits.push(false);
            self.window_start = self.window_start + Seq(1);
            advanced += 1;
        }
        advanced
    }

    /// Encodes this bitset's wire body: `windowStart u16 | bitmask bytes`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.write(&self.window_start.0).expect("buffer should not overflow");
        dst.write(self.bits.as_raw_slice()).expect("buffer should not overflow");
    }

    /// Decodes a bitset's wire body from `src`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::BufferTooShort`] if `src` doesn't contain a
    /// full `windowStart` plus bitmask.
    pub fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        let window_start: u16 = src.read().map_err(|_| DecodeError::BufferTooShort)?;
        let byte_len = WINDOW_SIZE.div_ceil(8);
        if src.len() < byte_len {
            return Err(DecodeError::BufferTooShort);
        }
        let mut raw = vec![0u8; byte_len];
        for slot in &mut raw {
            *slot = src.read().map_err(|_| DecodeError::BufferTooShort)?;
        }
        let mut bits = BitVec::<u8, Lsb0>::from_vec(raw);
        bits.truncate(WINDOW_SIZE);
        Ok(Self {
            window_start: Seq(window_start),
            bits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_idempotent() {
        let mut acks = AckBitset::new(Seq(0));
        acks.ack(Seq(3));
        let cloned = acks.clone();
        acks.ack(Seq(3));
        assert_eq!(cloned, acks);
        assert!(acks.is_acked(Seq(3)));
        assert!(!acks.is_acked(Seq(4)));
    }

    #[test]
    fn out_of_window_is_not_acked() {
        let acks = AckBitset::new(Seq(100));
        assert!(!acks.is_acked(Seq(50)));
    }

    #[test]
    fn advance_to_shifts_bits() {
        let mut acks = AckBitset::new(Seq(0));
        acks.ack(Seq(5));
        acks.advance_to(Seq(5));
        assert!(acks.is_acked(Seq(5)));
        assert_eq!(Seq(5), acks.window_start());
    }

    #[test]
    fn advance_contiguous_counts_prefix() {
        let mut acks = AckBitset::new(Seq(0));
        acks.ack(Seq(0));
        acks.ack(Seq(1));
        acks.ack(Seq(3));
        let advanced = acks.advance_contiguous();
        assert_eq!(2, advanced);
        assert_eq!(Seq(2), acks.window_start());
        assert!(!acks.is_acked(Seq(2)));
        assert!(acks.is_acked(Seq(3)));
    }

    #[test]
    fn round_trip_wire() {
        let mut acks = AckBitset::new(Seq(42));
        acks.ack(Seq(42));
        acks.ack(Seq(44));
        let mut buf = BytesMut::new();
        acks.encode(&mut buf);
        let mut bytes = buf.freeze();
        let decoded = AckBitset::decode(&mut bytes).unwrap();
        assert_eq!(acks, decoded);
    }
}
