//! Write-side fragmentation and read-side reassembly of messages that don't
//! fit in a single packet. See [`fragment_payload`] and [`FragmentBuffer`].

use std::time::{Duration, Instant};

use ahash::AHashMap;
use bitvec::{bitvec, vec::BitVec};
use thiserror::Error;

use crate::packet::FragmentInfo;

/// Splits `payload` into chunks of at most `payload_mtu` bytes, pairing each
/// with the [`FragmentInfo`] header it should be sent with.
///
/// `payload_mtu` is `mtuNegotiated − headerFor(property) − 6` per
/// `spec.md` §4.4. If `payload` fits in a single chunk, the returned
/// iterator yields exactly one item and the caller should not set the
/// fragmented flag at all (a single un-fragmented packet is always
/// preferred - see `Peer::send`).
///
/// # Panics
///
/// Panics if `payload_mtu` is `0`.
pub fn fragment_payload(
    fragment_id: u16,
    payload: &[u8],
    payload_mtu: usize,
) -> impl Iterator<Item = (FragmentInfo, &[u8])> {
    assert!(payload_mtu > 0, "payload_mtu must be non-zero");
    let num_frags = payload.len().div_ceil(payload_mtu).max(1);
    let fragments_total = u16::try_from(num_frags).expect("message too large to fragment");
    payload
        .chunks(payload_mtu)
        .enumerate()
        .map(move |(i, chunk)| {
            (
                FragmentInfo {
                    fragment_id,
                    #[allow(clippy::cast_possible_truncation)]
                    fragment_part: i as u16,
                    fragments_total,
                },
                chunk,
            )
        })
}

/// Error produced while reassembling a fragment into a [`FragmentBuffer`].
#[derive(Debug, Clone, Error)]
pub enum ReassembleError {
    /// This fragment index was already received for this message.
    #[error("fragment {0} already received")]
    AlreadyReceived(u16),
    /// A non-final fragment's payload was not exactly `payload_mtu` bytes.
    #[error("non-final fragment has unexpected length {len}, expected {expected}")]
    InvalidPayloadLength {
        /// Length actually received.
        len: usize,
        /// Length expected (`payload_mtu`).
        expected: usize,
    },
    /// The final fragment's payload exceeded `payload_mtu`.
    #[error("final fragment too large: {len} > {max}")]
    LastFragTooLarge {
        /// Length actually received.
        len: usize,
        /// Maximum allowed (`payload_mtu`).
        max: usize,
    },
}

/// Accumulates the fragments of a single logical multi-packet message.
///
/// One instance is created per incoming `(channel, fragmentId)` pair and
/// destroyed once reassembly completes, or once [`FragmentReceiver::sweep`]
/// evicts it for being stale (`spec.md` §3, §4.4).
///
/// Every non-final fragment of one message is the same length by
/// construction (`fragment_payload`'s `chunks(payload_mtu)`), so this buffer
/// learns that length from whichever non-final fragment arrives first
/// instead of trusting the receiver's own, independently negotiated MTU:
/// each peer negotiates `mtuNegotiated` on its own (`spec.md` §4.5), so a
/// receiver's value can legitimately differ from the sender's.
#[derive(Debug)]
pub struct FragmentBuffer {
    /// Total number of fragments expected for this message.
    fragments_total: u16,
    /// Fragments received so far.
    received_count: u16,
    received: BitVec,
    slots: Vec<Vec<u8>>,
    /// Length every non-final fragment must match, learned from whichever
    /// one arrives first.
    chunk_len: Option<usize>,
    last_recv_at: Instant,
}

impl FragmentBuffer {
    fn new(fragments_total: u16, now: Instant) -> Self {
        Self {
            fragments_total,
            received_count: 0,
            received: bitvec![0; usize::from(fragments_total)],
            slots: vec![Vec::new(); usize::from(fragments_total)],
            chunk_len: None,
            last_recv_at: now,
        }
    }

    /// Writes one fragment's payload into its slot.
    ///
    /// Returns `Some(bytes)` with the fully reassembled message once every
    /// fragment has arrived, `None` otherwise.
    fn write(
        &mut self,
        info: FragmentInfo,
        payload: &[u8],
        now: Instant,
    ) -> Result<Option<Vec<u8>>, ReassembleError> {
        let idx = usize::from(info.fragment_part);
        if self.received[idx] {
            return Err(ReassembleError::AlreadyReceived(info.fragment_part));
        }
        let is_last = info.fragment_part + 1 == info.fragments_total;
        if is_last {
            if let Some(expected) = self.chunk_len {
                if payload.len() > expected {
                    return Err(ReassembleError::LastFragTooLarge {
                        len: payload.len(),
                        max: expected,
                    });
                }
            }
        } else {
            match self.chunk_len {
                Some(expected) if expected != payload.len() => {
                    return Err(ReassembleError::InvalidPayloadLength {
                        len: payload.len(),
                        expected,
                    });
                }
                Some(_) => {}
                None => self.chunk_len = Some(payload.len()),
            }
        }

        self.slots[idx] = payload.to_vec();
        self.received.set(idx, true);
        self.received_count += 1;
        self.last_recv_at = now;

        if self.received_count == self.fragments_total {
            let out = std::mem::take(&mut self.slots).concat();
            Ok(Some(out))
        } else {
            Ok(None)
        }
    }
}

/// Table of in-progress [`FragmentBuffer`]s, keyed by `(channel, fragmentId)`.
#[derive(Debug, Default)]
pub struct FragmentReceiver {
    pending: AHashMap<(u8, u16), FragmentBuffer>,
}

impl FragmentReceiver {
    /// Creates an empty receiver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one received fragment into the table for `channel`.
    ///
    /// Duplicate fragment parts are rejected with
    /// [`ReassembleError::AlreadyReceived`] and should be dropped by the
    /// caller. Returns the completed message once the last fragment for its
    /// id arrives, removing the entry.
    pub fn reassemble(
        &mut self,
        channel: u8,
        info: FragmentInfo,
        payload: &[u8],
        now: Instant,
    ) -> Result<Option<Vec<u8>>, ReassembleError> {
        let key = (channel, info.fragment_id);
        let entry = self
            .pending
            .entry(key)
            .or_insert_with(|| FragmentBuffer::new(info.fragments_total, now));
        let result = entry.write(info, payload, now);
        if matches!(result, Ok(Some(_)) | Err(_)) {
            self.pending.remove(&key);
        }
        result
    }

    /// Drops any entry that hasn't received a new part within `timeout`.
    pub fn sweep(&mut self, now: Instant, timeout: Duration) {
        self.pending
            .retain(|_, buf| now.duration_since(buf.last_recv_at) < timeout);
    }

    /// Number of messages currently being reassembled.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Generates the next peer-unique fragment id, wrapping per `spec.md` §4.5.
#[derive(Debug, Default)]
pub struct FragmentIdCounter(u16);

impl FragmentIdCounter {
    /// Returns the next id and advances the counter, wrapping at `u16::MAX`.
    pub fn next(&mut self) -> u16 {
        let id = self.0;
        self.0 = self.0.wrapping_add(1);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_chunk_when_small() {
        let frags: Vec<_> = fragment_payload(0, b"hi", 1024).collect();
        assert_eq!(1, frags.len());
        assert_eq!(1, frags[0].0.fragments_total);
    }

    #[test]
    fn splits_into_expected_chunks() {
        let payload = vec![7u8; 25];
        let frags: Vec<_> = fragment_payload(3, &payload, 10).collect();
        assert_eq!(3, frags.len());
        assert_eq!(3, frags[0].0.fragments_total);
        assert_eq!(10, frags[0].1.len());
        assert_eq!(10, frags[1].1.len());
        assert_eq!(5, frags[2].1.len());
        for (i, (info, _)) in frags.iter().enumerate() {
            assert_eq!(i as u16, info.fragment_part);
            assert_eq!(3, info.fragment_id);
        }
    }

    #[test]
    fn round_trip_in_order() {
        let payload = vec![9u8; 25];
        let mtu = 10;
        let mut recv = FragmentReceiver::new();
        let now = Instant::now();
        let mut result = None;
        for (info, chunk) in fragment_payload(1, &payload, mtu) {
            result = recv.reassemble(0, info, chunk, now).unwrap();
        }
        assert_eq!(Some(payload), result);
        assert_eq!(0, recv.pending_count());
    }

    #[test]
    fn round_trip_out_of_order() {
        let payload = vec![5u8; 25];
        let mtu = 10;
        let mut recv = FragmentReceiver::new();
        let now = Instant::now();
        let frags: Vec<_> = fragment_payload(2, &payload, mtu)
            .map(|(i, c)| (i, c.to_vec()))
            .collect();
        assert!(recv.reassemble(0, frags[2].0, &frags[2].1, now).unwrap().is_none());
        assert!(recv.reassemble(0, frags[0].0, &frags[0].1, now).unwrap().is_none());
        let done = recv.reassemble(0, frags[1].0, &frags[1].1, now).unwrap();
        assert_eq!(Some(payload), done);
    }

    #[test]
    fn duplicate_fragment_rejected() {
        let payload = vec![1u8; 25];
        let mtu = 10;
        let mut recv = FragmentReceiver::new();
        let now = Instant::now();
        let (info, chunk) = fragment_payload(5, &payload, mtu).next().unwrap();
        recv.reassemble(0, info, chunk, now).unwrap();
        assert!(matches!(
            recv.reassemble(0, info, chunk, now),
            Err(ReassembleError::AlreadyReceived(0))
        ));
    }

    #[test]
    fn stale_entries_are_swept() {
        let payload = vec![1u8; 25];
        let mtu = 10;
        let mut recv = FragmentReceiver::new();
        let now = Instant::now();
        let (info, chunk) = fragment_payload(9, &payload, mtu).next().unwrap();
        recv.reassemble(0, info, chunk, now).unwrap();
        recv.sweep(now + Duration::from_secs(10), Duration::from_secs(5));
        assert_eq!(0, recv.pending_count());
    }
}
