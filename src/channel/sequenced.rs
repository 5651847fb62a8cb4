//! See [`SequencedChannel`].

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use octs::Bytes;

use super::Channel;
use crate::{
    packet::{FragmentInfo, Packet, PacketPool, PacketProperty},
    seq::Seq,
};

/// The `Sequenced` channel: unreliable, but stale-dropping (`spec.md`
/// §4.3.2). Outgoing messages are stamped with a monotonically increasing
/// sequence; incoming messages older than the last accepted one are
/// dropped, with no retransmission either way.
#[derive(Debug)]
pub struct SequencedChannel {
    outgoing: VecDeque<(Option<FragmentInfo>, Bytes)>,
    next_seq: Seq,
    last_seen: Option<Seq>,
    ready: VecDeque<(Option<FragmentInfo>, Bytes)>,
}

impl Default for SequencedChannel {
    fn default() -> Self {
        Self {
            outgoing: VecDeque::new(),
            next_seq: Seq(0),
            last_seen: None,
            ready: VecDeque::new(),
        }
    }
}

impl Channel for SequencedChannel {
    fn add_to_queue(&mut self, fragment: Option<FragmentInfo>, payload: Bytes) {
        self.outgoing.push_back((fragment, payload));
    }

    fn send_next_packets(
        &mut self,
        pool: &mut PacketPool,
        channel: u8,
        _mtu: usize,
        _avg_rtt: Duration,
        _now: Instant,
        out: &mut Vec<Packet>,
    ) {
        while let Some((fragment, payload)) = self.outgoing.pop_front() {
            let seq = self.next_seq;
            self.next_seq = self.next_seq + Seq(1);
            out.push(Packet::build(
                pool,
                PacketProperty::Sequenced,
                channel,
                seq,
                fragment,
                &payload,
            ));
        }
    }

    fn process_packet(&mut self, packet: &Packet, _now: Instant) -> bool {
        let seq = packet.sequence();
        let is_new = match self.last_seen {
            None => true,
            Some(last) => seq.is_newer_than(last),
        };
        if !is_new {
            return false;
        }
        self.last_seen = Some(seq);
        self.ready
            .push_back((packet.fragment(), Bytes::copy_from_slice(packet.payload())));
        false
    }

    fn poll_incoming(&mut self) -> Option<(Option<FragmentInfo>, Bytes)> {
        self.ready.pop_front()
    }
}
