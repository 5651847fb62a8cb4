//! See [`ReliableChannel`].

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use ahash::AHashMap;
use octs::{Bytes, BytesMut};

use super::Channel;
use crate::{
    ack::{AckBitset, WINDOW_SIZE},
    packet::{FragmentInfo, Packet, PacketPool, PacketProperty},
    seq::Seq,
};

/// Floor on the retransmission delay, regardless of measured RTT.
const MIN_RESEND_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct InFlight {
    fragment: Option<FragmentInfo>,
    payload: Bytes,
    last_sent: Instant,
}

/// Shared ACK/retransmission/windowing mechanics for `ReliableUnordered` and
/// `ReliableOrdered` (`spec.md` §4.3.3, §4.3.4). The two differ only in how
/// a newly-received payload is surfaced: unordered surfaces immediately in
/// arrival order, ordered buffers out-of-order arrivals and releases them
/// in strict sequence order.
#[derive(Debug)]
pub struct ReliableChannel {
    ordered: bool,
    property: PacketProperty,

    unsent: VecDeque<(Option<FragmentInfo>, Bytes)>,
    next_seq: Seq,
    send_window_start: Seq,
    in_flight: AHashMap<Seq, InFlight>,
    peer_acks: AckBitset,

    recv_acks: AckBitset,
    pending_ack: bool,
    reorder_buf: AHashMap<Seq, (Option<FragmentInfo>, Bytes)>,
    ready: VecDeque<(Option<FragmentInfo>, Bytes)>,
}

impl ReliableChannel {
    /// Creates a channel for `ReliableOrdered` if `ordered`, else
    /// `ReliableUnordered`.
    #[must_use]
    pub fn new(ordered: bool) -> Self {
        Self {
            ordered,
            property: if ordered {
                PacketProperty::ReliableOrdered
            } else {
                PacketProperty::ReliableUnordered
            },
            unsent: VecDeque::new(),
            next_seq: Seq(0),
            send_window_start: Seq(0),
            in_flight: AHashMap::new(),
            peer_acks: AckBitset::new(Seq(0)),
            recv_acks: AckBitset::new(Seq(0)),
            pending_ack: false,
            reorder_buf: AHashMap::new(),
            ready: VecDeque::new(),
        }
    }

    /// Number of messages sent but not yet acknowledged.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    fn apply_ack(&mut self, body: &mut Bytes) {
        let Ok(decoded) = AckBitset::decode(body) else {
            return;
        };
        self.peer_acks.advance_to(decoded.window_start());
        for seq in decoded.iter_acked() {
            self.peer_acks.ack(seq);
        }
        self.in_flight.retain(|seq, _| !self.peer_acks.is_acked(*seq));
        let advanced = self.peer_acks.advance_contiguous();
        self.send_window_start = self.send_window_start + Seq(advanced);
    }

    fn accept_incoming(&mut self, seq: Seq, fragment: Option<FragmentInfo>, payload: &[u8]) {
        let offset = self.recv_acks.window_start().dist_to(seq);
        if offset < 0 {
            // Already slid past: the sender will learn this via our next
            // ACK's windowStart even though we don't re-track the bit.
            self.pending_ack = true;
            return;
        }
        if usize::try_from(offset).is_ok_and(|idx| idx >= WINDOW_SIZE) {
            return;
        }

        let already = self.recv_acks.is_acked(seq);
        self.recv_acks.ack(seq);
        self.pending_ack = true;
        if already {
            return;
        }

        if self.ordered {
            self.reorder_buf.insert(seq, (fragment, Bytes::copy_from_slice(payload)));
            let before = self.recv_acks.window_start();
            let advanced = self.recv_acks.advance_contiguous();
            for i in 0..advanced {
                if let Some(ready) = self.reorder_buf.remove(&(before + Seq(i))) {
                    self.ready.push_back(ready);
                }
            }
        } else {
            self.ready.push_back((fragment, Bytes::copy_from_slice(payload)));
        }
    }
}

impl Channel for ReliableChannel {
    fn add_to_queue(&mut self, fragment: Option<FragmentInfo>, payload: Bytes) {
        self.unsent.push_back((fragment, payload));
    }

    fn send_next_packets(
        &mut self,
        pool: &mut PacketPool,
        channel: u8,
        _mtu: usize,
        avg_rtt: Duration,
        now: Instant,
        out: &mut Vec<Packet>,
    ) {
        while !self.unsent.is_empty() {
            let in_window = self.send_window_start.dist_to(self.next_seq) < i16::try_from(WINDOW_SIZE).unwrap_or(i16::MAX);
            if !in_window {
                break;
            }
            let (fragment, payload) = self.unsent.pop_front().expect("checked non-empty");
            let seq = self.next_seq;
            self.next_seq = self.next_seq + Seq(1);
            out.push(Packet::build(pool, self.property, channel, seq, fragment, &payload));
            self.in_flight.insert(
                seq,
                InFlight {
                    fragment,
                    payload,
                    last_sent: now,
                },
            );
        }

        let resend_delay = (avg_rtt.saturating_mul(2)).max(MIN_RESEND_DELAY);
        for (seq, entry) in &mut self.in_flight {
            if now.saturating_duration_since(entry.last_sent) >= resend_delay {
                out.push(Packet::build(pool, self.property, channel, *seq, entry.fragment, &entry.payload));
                entry.last_sent = now;
            }
        }

        if self.pending_ack {
            let mut body = BytesMut::new();
            self.recv_acks.encode(&mut body);
            out.push(Packet::build(
                pool,
                PacketProperty::Ack,
                channel,
                self.recv_acks.window_start(),
                None,
                &body,
            ));
            self.pending_ack = false;
        }
    }

    fn process_packet(&mut self, packet: &Packet, _now: Instant) -> bool {
        if packet.property() == PacketProperty::Ack {
            let mut body = Bytes::copy_from_slice(packet.payload());
            self.apply_ack(&mut body);
            return false;
        }
        self.accept_incoming(packet.sequence(), packet.fragment(), packet.payload());
        false
    }

    fn poll_incoming(&mut self) -> Option<(Option<FragmentInfo>, Bytes)> {
        self.ready.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain_sends(chan: &mut ReliableChannel, pool: &mut PacketPool, now: Instant) -> Vec<Packet> {
        let mut out = Vec::new();
        chan.send_next_packets(pool, 0, 1200, Duration::from_millis(20), now, &mut out);
        out
    }

    #[test]
    fn send_then_ack_frees_window() {
        let mut pool = PacketPool::with_limit(64);
        let mut sender = ReliableChannel::new(false);
        sender.add_to_queue(None, Bytes::from_static(b"hello"));
        let now = Instant::now();
        let sent = drain_sends(&mut sender, &mut pool, now);
        assert_eq!(1, sent.len());
        assert_eq!(1, sender.in_flight_count());

        let mut receiver = ReliableChannel::new(false);
        assert!(!receiver.process_packet(&sent[0], now));
        assert_eq!(Some((None, Bytes::from_static(b"hello"))), receiver.poll_incoming());

        let ack = drain_sends(&mut receiver, &mut pool, now);
        assert_eq!(1, ack.len());
        assert_eq!(PacketProperty::Ack, ack[0].property());

        assert!(!sender.process_packet(&ack[0], now));
        assert_eq!(0, sender.in_flight_count());
    }

    #[test]
    fn unordered_surfaces_in_arrival_order() {
        let mut pool = PacketPool::with_limit(64);
        let mut sender = ReliableChannel::new(false);
        sender.add_to_queue(None, Bytes::from_static(b"a"));
        sender.add_to_queue(None, Bytes::from_static(b"b"));
        let now = Instant::now();
        let sent = drain_sends(&mut sender, &mut pool, now);

        let mut receiver = ReliableChannel::new(false);
        // deliver out of order
        receiver.process_packet(&sent[1], now);
        receiver.process_packet(&sent[0], now);
        assert_eq!(Some((None, Bytes::from_static(b"b"))), receiver.poll_incoming());
        assert_eq!(Some((None, Bytes::from_static(b"a"))), receiver.poll_incoming());
    }

    #[test]
    fn ordered_buffers_out_of_order_arrivals() {
        let mut pool = PacketPool::with_limit(64);
        let mut sender = ReliableChannel::new(true);
        sender.add_to_queue(None, Bytes::from_static(b"a"));
        sender.add_to_queue(None, Bytes::from_static(b"b"));
        let now = Instant::now();
        let sent = drain_sends(&mut sender, &mut pool, now);

        let mut receiver = ReliableChannel::new(true);
        receiver.process_packet(&sent[1], now);
        assert_eq!(None, receiver.poll_incoming());
        receiver.process_packet(&sent[0], now);
        assert_eq!(Some((None, Bytes::from_static(b"a"))), receiver.poll_incoming());
        assert_eq!(Some((None, Bytes::from_static(b"b"))), receiver.poll_incoming());
    }

    #[test]
    fn duplicate_is_acked_but_not_resurfaced() {
        let mut pool = PacketPool::with_limit(64);
        let mut sender = ReliableChannel::new(true);
        sender.add_to_queue(None, Bytes::from_static(b"a"));
        let now = Instant::now();
        let sent = drain_sends(&mut sender, &mut pool, now);

        let mut receiver = ReliableChannel::new(true);
        receiver.process_packet(&sent[0], now);
        assert_eq!(Some((None, Bytes::from_static(b"a"))), receiver.poll_incoming());
        receiver.process_packet(&sent[0], now);
        assert_eq!(None, receiver.poll_incoming());
    }

    #[test]
    fn retransmits_after_resend_delay() {
        let mut pool = PacketPool::with_limit(64);
        let mut sender = ReliableChannel::new(false);
        sender.add_to_queue(None, Bytes::from_static(b"a"));
        let t0 = Instant::now();
        let first = drain_sends(&mut sender, &mut pool, t0);
        assert_eq!(1, first.len());

        let t1 = t0 + Duration::from_millis(10);
        let still_nothing = drain_sends(&mut sender, &mut pool, t1);
        assert!(still_nothing.is_empty());

        let t2 = t0 + MIN_RESEND_DELAY + Duration::from_millis(1);
        let resent = drain_sends(&mut sender, &mut pool, t2);
        assert_eq!(1, resent.len());
        assert_eq!(first[0].sequence(), resent[0].sequence());
    }
}
