//! See [`SimpleChannel`].

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

/// The `Simple` channel: no sequencing, no ACK (`spec.md` §4.3.1).
///
/// `processPacket` always surfaces. `sendNext` drains the outgoing queue
/// in full every tick. Fragmented payloads surface directly too - the peer
/// reassembles straight off the raw incoming packet rather than through
/// [`Channel::poll_incoming`], since this channel never buffers.
#[derive(Debug, Default)]
pub struct SimpleChannel {
    outgoing: VecDeque<(Option<FragmentInfo>, Bytes)>,
}

impl Channel for SimpleChannel {
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
            out.push(Packet::build(
                pool,
                PacketProperty::Unreliable,
                channel,
                Seq(0),
                fragment,
                &payload,
            ));
        }
    }

    fn process_packet(&mut self, _packet: &Packet, _now: Instant) -> bool {
        true
    }

    fn poll_incoming(&mut self) -> Option<(Option<FragmentInfo>, Bytes)> {
        None
    }
}
