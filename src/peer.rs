//! See [`Peer`].

use std::{net::SocketAddr, time::{Duration, Instant}};

use octs::{Bytes, BytesMut};

use crate::{
    channel::{Channel, DeliveryMethod, ReliableChannel, SequencedChannel, SimpleChannel},
    config::ManagerConfig,
    error::ErrorCode,
    event::{DisconnectReason, Event},
    frag::{fragment_payload, FragmentIdCounter, FragmentReceiver},
    packet::{header_size, FragmentInfo, Packet, PacketPool, PacketProperty},
    seq::Seq,
};

/// Stable handle to a [`Peer`] inside a [`PeerTable`](crate::peer_table::PeerTable).
///
/// An index into the table's arena rather than the peer's address, per the
/// redesign notes' guidance on avoiding Peer ↔ Manager ↔ Channel cyclic
/// references: the table is the sole owner, everything else holds this
/// plain index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub u64);

/// Where a [`Peer`] is in its handshake/teardown lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake in progress; either a `ConnectRequest` or its
    /// `ConnectAccept` is outstanding.
    InProgress,
    /// Handshake complete, channels active.
    Connected,
    /// A `Disconnect` has been sent or received; waiting for `ShutdownOk` or
    /// for teardown to complete.
    ShutdownRequested,
    /// Torn down; the manager will remove this peer from the table.
    Disconnected,
}

/// Builds one independent channel instance per `config.max_channels` slot,
/// or an all-`None` vec of the same length if `enabled` is `false`.
fn channel_slots<T>(max_channels: u8, enabled: bool, mut make: impl FnMut() -> T) -> Vec<Option<T>> {
    (0..max_channels.max(1)).map(|_| enabled.then(&mut make)).collect()
}

/// Rolling average-RTT window size (`spec.md` §4.5, "window 6").
const RTT_WINDOW: u32 = 6;

#[derive(Debug)]
struct MtuProbe {
    candidate_idx: usize,
    sent_at: Instant,
    retries: u32,
}

/// Maximum `MtuCheck` retries before giving up on the next candidate
/// (`spec.md` §4.5 "bounded retry count").
const MAX_MTU_RETRIES: u32 = 3;

/// One remote connection: handshake state, the four optional channels, RTT,
/// MTU discovery, and the merge buffer (`spec.md` §3, §4.5).
#[derive(Debug)]
pub struct Peer {
    id: PeerId,
    remote_addr: SocketAddr,
    connection_id: u64,
    is_initiator: bool,
    state: ConnectionState,

    /// One slot per `config.max_channels` channel number; `None` in every
    /// slot if the delivery method is disabled (`spec.md` §3 `channel
    /// (0..MaxChannels-1)`).
    reliable_ordered: Vec<Option<ReliableChannel>>,
    reliable_unordered: Vec<Option<ReliableChannel>>,
    sequenced: Vec<Option<SequencedChannel>>,
    simple: Vec<Option<SimpleChannel>>,

    mtu_idx: i32,
    mtu_negotiated: u16,
    mtu_probe: Option<MtuProbe>,
    mtu_probing_done: bool,

    rtt: Duration,
    rtt_count: u32,
    avg_rtt: Duration,
    last_ping_sent: Option<Instant>,
    ping_stamp: Option<Instant>,

    last_packet_recv_at: Instant,
    connect_attempts: u32,
    last_connect_sent: Option<Instant>,

    fragment_ids: FragmentIdCounter,
    fragments: FragmentReceiver,

    merge_buf: Vec<u8>,
    control_out: Vec<(PacketProperty, Bytes)>,

    disconnect_payload: Bytes,
    shutdown_retries: u32,
}

impl Peer {
    pub(crate) fn new(
        id: PeerId,
        remote_addr: SocketAddr,
        connection_id: u64,
        is_initiator: bool,
        now: Instant,
        config: &ManagerConfig,
    ) -> Self {
        Self {
            id,
            remote_addr,
            connection_id,
            is_initiator,
            state: ConnectionState::InProgress,
            reliable_ordered: channel_slots(config.max_channels, config.enable_reliable_ordered, || {
                ReliableChannel::new(true)
            }),
            reliable_unordered: channel_slots(config.max_channels, config.enable_reliable_unordered, || {
                ReliableChannel::new(false)
            }),
            sequenced: channel_slots(config.max_channels, config.enable_sequenced, SequencedChannel::default),
            simple: channel_slots(config.max_channels, config.enable_simple, SimpleChannel::default),
            mtu_idx: config.mtu_start_idx,
            mtu_negotiated: if config.mtu_start_idx < 0 {
                ManagerConfig::MTU_CANDIDATES[1]
            } else {
                ManagerConfig::MTU_CANDIDATES[0]
            },
            mtu_probe: None,
            mtu_probing_done: config.mtu_start_idx < 0,
            rtt: Duration::ZERO,
            rtt_count: 0,
            avg_rtt: Duration::ZERO,
            last_ping_sent: None,
            ping_stamp: None,
            last_packet_recv_at: now,
            connect_attempts: 0,
            last_connect_sent: None,
            fragment_ids: FragmentIdCounter::default(),
            fragments: FragmentReceiver::new(),
            merge_buf: Vec::new(),
            control_out: Vec::new(),
            disconnect_payload: Bytes::new(),
            shutdown_retries: 0,
        }
    }

    /// This peer's stable handle.
    #[must_use]
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// The socket address this peer is reachable at.
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Locally generated connection id exchanged during the handshake.
    #[must_use]
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Current handshake/teardown state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Exponential moving average RTT.
    #[must_use]
    pub fn avg_rtt(&self) -> Duration {
        self.avg_rtt
    }

    /// Most recently measured single-sample RTT.
    #[must_use]
    pub fn rtt(&self) -> Duration {
        self.rtt
    }

    /// Number of RTT samples folded into [`Self::avg_rtt`] so far, capped at
    /// the EMA window size.
    #[must_use]
    pub fn rtt_count(&self) -> u32 {
        self.rtt_count
    }

    /// Currently negotiated MTU (UDP payload size).
    #[must_use]
    pub fn mtu_negotiated(&self) -> u16 {
        self.mtu_negotiated
    }

    pub(crate) fn last_packet_recv_at(&self) -> Instant {
        self.last_packet_recv_at
    }

    /// Queues `payload` for sending via `delivery` on `channel`, fragmenting
    /// it first if needed.
    ///
    /// `spec.md` §4.4: `payloadMtu = mtuNegotiated − headerFor(property) −
    /// fragmentHeader(6 bytes)`.
    pub fn send(&mut self, payload: &[u8], delivery: DeliveryMethod, channel: u8) {
        let property = delivery.packet_property();
        let header_len = header_size(property, false);
        let payload_mtu = usize::from(self.mtu_negotiated)
            .saturating_sub(header_len)
            .saturating_sub(6)
            .max(1);

        if payload.len() <= payload_mtu {
            self.enqueue(delivery, channel, None, Bytes::copy_from_slice(payload));
            return;
        }

        let fragment_id = self.fragment_ids.next();
        // Fragments are queued as independent payloads; the channel assigns
        // each its own sequence number, and FragmentInfo travels alongside it
        // so the receiving peer can key reassembly off the same chunk.
        for (info, chunk) in fragment_payload(fragment_id, payload, payload_mtu) {
            self.enqueue(delivery, channel, Some(info), Bytes::copy_from_slice(chunk));
        }
    }

    fn enqueue(&mut self, delivery: DeliveryMethod, channel: u8, fragment: Option<FragmentInfo>, payload: Bytes) {
        let idx = usize::from(channel);
        match delivery {
            DeliveryMethod::ReliableOrdered => {
                if let Some(Some(chan)) = self.reliable_ordered.get_mut(idx) {
                    chan.add_to_queue(fragment, payload);
                }
            }
            DeliveryMethod::ReliableUnordered => {
                if let Some(Some(chan)) = self.reliable_unordered.get_mut(idx) {
                    chan.add_to_queue(fragment, payload);
                }
            }
            DeliveryMethod::Sequenced => {
                if let Some(Some(chan)) = self.sequenced.get_mut(idx) {
                    chan.add_to_queue(fragment, payload);
                }
            }
            DeliveryMethod::Simple => {
                if let Some(Some(chan)) = self.simple.get_mut(idx) {
                    chan.add_to_queue(fragment, payload);
                }
            }
        }
    }

    /// Pops every channel's due packets, merging small ones per
    /// `MergeEnabled` (`spec.md` §4.5 "Merge").
    pub(crate) fn flush(&mut self, pool: &mut PacketPool, config: &ManagerConfig, now: Instant, out: &mut Vec<Packet>) {
        let mtu = usize::from(self.mtu_negotiated);
        let mut due = Vec::new();
        for (idx, slot) in self.reliable_ordered.iter_mut().enumerate() {
            if let Some(chan) = slot {
                chan.send_next_packets(pool, idx as u8, mtu, self.avg_rtt, now, &mut due);
            }
        }
        for (idx, slot) in self.reliable_unordered.iter_mut().enumerate() {
            if let Some(chan) = slot {
                chan.send_next_packets(pool, idx as u8, mtu, self.avg_rtt, now, &mut due);
            }
        }
        for (idx, slot) in self.sequenced.iter_mut().enumerate() {
            if let Some(chan) = slot {
                chan.send_next_packets(pool, idx as u8, mtu, self.avg_rtt, now, &mut due);
            }
        }
        for (idx, slot) in self.simple.iter_mut().enumerate() {
            if let Some(chan) = slot {
                chan.send_next_packets(pool, idx as u8, mtu, self.avg_rtt, now, &mut due);
            }
        }
        for (property, payload) in self.control_out.drain(..) {
            due.push(Packet::build(pool, property, 0, Seq(0), None, &payload));
        }
        if let Some(probe) = &mut self.mtu_probe {
            let due_to_send = probe.retries == 0 || now.saturating_duration_since(probe.sent_at) >= config.reconnect_delay;
            if due_to_send {
                if probe.retries >= MAX_MTU_RETRIES {
                    self.mtu_probe = None;
                    self.mtu_probing_done = true;
                } else {
                    probe.retries += 1;
                    probe.sent_at = now;
                    let size = usize::from(ManagerConfig::MTU_CANDIDATES[probe.candidate_idx]);
                    due.push(Packet::build(pool, PacketProperty::MtuCheck, 0, Seq(0), None, &vec![0u8; size]));
                }
            }
        }

        if !config.merge_enabled {
            out.extend(due);
            return;
        }

        let merge_threshold = mtu / 2;
        for packet in due {
            if packet.size() >= merge_threshold {
                out.push(packet);
                continue;
            }
            if self.merge_buf.len() + 2 + packet.size() > mtu {
                self.flush_merge(pool, out);
            }
            self.merge_buf.extend_from_slice(&u16::try_from(packet.size()).unwrap_or(u16::MAX).to_le_bytes());
            self.merge_buf.extend_from_slice(packet.wire_bytes());
            pool.recycle(packet);
        }
        self.flush_merge(pool, out);
    }

    fn flush_merge(&mut self, pool: &mut PacketPool, out: &mut Vec<Packet>) {
        if self.merge_buf.is_empty() {
            return;
        }
        let packet = Packet::build(pool, PacketProperty::Merged, 0, Seq(0), None, &self.merge_buf);
        out.push(packet);
        self.merge_buf.clear();
    }

    /// Processes one incoming packet, routing it to the matching channel and
    /// emitting any resulting events through `events`.
    pub(crate) fn process_packet(&mut self, packet: Packet, now: Instant, events: &mut Vec<Event>) {
        self.last_packet_recv_at = now;

        match packet.property() {
            PacketProperty::Merged => {
                // The Manager splits `Merged` datagrams via `split_merged` and
                // feeds each sub-packet back through `process_packet` before
                // one would ever reach here.
            }
            PacketProperty::Ping => {
                self.control_out.push((PacketProperty::Pong, Bytes::new()));
            }
            PacketProperty::Pong => {
                if let Some(stamp) = self.ping_stamp.take() {
                    let rtt = now.saturating_duration_since(stamp);
                    self.record_rtt(rtt, events);
                }
            }
            PacketProperty::MtuCheck => {
                self.control_out.push((PacketProperty::MtuOk, Bytes::new()));
            }
            PacketProperty::MtuOk => {
                self.on_mtu_ok(now);
            }
            PacketProperty::ReliableOrdered
            | PacketProperty::ReliableUnordered
            | PacketProperty::Sequenced
            | PacketProperty::Ack => {
                self.route_to_channel(packet, now, events);
            }
            PacketProperty::Unreliable => {
                let channel = packet.channel();
                let surfaced = self
                    .simple
                    .get_mut(usize::from(channel))
                    .and_then(|slot| slot.as_mut())
                    .map(|chan| chan.process_packet(&packet, now))
                    == Some(true);
                if surfaced {
                    let fragment = packet.fragment();
                    let payload = Bytes::copy_from_slice(packet.payload());
                    self.surface_payload(DeliveryMethod::Simple, channel, fragment, payload, now, events);
                }
            }
            PacketProperty::Disconnect => {
                self.disconnect_payload = Bytes::copy_from_slice(packet.payload());
                self.state = ConnectionState::Disconnected;
            }
            PacketProperty::ShutdownOk => {
                self.state = ConnectionState::Disconnected;
            }
            PacketProperty::ConnectAccept => {
                if self.state == ConnectionState::InProgress
                    && decode_connect_accept(packet.payload()) == Some(self.connection_id)
                {
                    self.state = ConnectionState::Connected;
                    events.push(Event::Connect { peer: self.id });
                }
            }
            PacketProperty::ConnectRequest
            | PacketProperty::UnconnectedMessage
            | PacketProperty::DiscoveryRequest
            | PacketProperty::DiscoveryResponse
            | PacketProperty::NatIntroduction
            | PacketProperty::NatIntroductionRequest
            | PacketProperty::NatPunchMessage => {
                // Handled by the Manager before packets ever reach a Peer.
            }
        }
    }

    fn route_to_channel(&mut self, packet: Packet, now: Instant, events: &mut Vec<Event>) {
        let channel = packet.channel();
        let idx = usize::from(channel);
        if packet.property() == PacketProperty::Ack {
            // An Ack doesn't carry a bit saying which of the two reliable
            // delivery methods sent the packets it covers; each channel
            // instance's own send window ignores an Ack that doesn't belong
            // to it, so offering it to both is safe.
            if let Some(Some(chan)) = self.reliable_ordered.get_mut(idx) {
                chan.process_packet(&packet, now);
            }
            if let Some(Some(chan)) = self.reliable_unordered.get_mut(idx) {
                chan.process_packet(&packet, now);
            }
            self.poll_ready_channel(DeliveryMethod::ReliableOrdered, channel, now, events);
            self.poll_ready_channel(DeliveryMethod::ReliableUnordered, channel, now, events);
            return;
        }

        let delivery = match packet.property() {
            PacketProperty::ReliableOrdered => DeliveryMethod::ReliableOrdered,
            PacketProperty::ReliableUnordered => DeliveryMethod::ReliableUnordered,
            _ => DeliveryMethod::Sequenced,
        };

        let surfaced_directly = match delivery {
            DeliveryMethod::ReliableOrdered => self
                .reliable_ordered
                .get_mut(idx)
                .and_then(|slot| slot.as_mut())
                .map(|c| c.process_packet(&packet, now)),
            DeliveryMethod::ReliableUnordered => self
                .reliable_unordered
                .get_mut(idx)
                .and_then(|slot| slot.as_mut())
                .map(|c| c.process_packet(&packet, now)),
            DeliveryMethod::Sequenced => self
                .sequenced
                .get_mut(idx)
                .and_then(|slot| slot.as_mut())
                .map(|c| c.process_packet(&packet, now)),
            DeliveryMethod::Simple => None,
        };

        if surfaced_directly == Some(true) {
            let fragment = packet.fragment();
            let payload = Bytes::copy_from_slice(packet.payload());
            self.surface_payload(delivery, channel, fragment, payload, now, events);
        }

        self.poll_ready_channel(delivery, channel, now, events);
    }

    fn poll_ready_channel(&mut self, delivery: DeliveryMethod, channel: u8, now: Instant, events: &mut Vec<Event>) {
        let idx = usize::from(channel);
        let mut ready = Vec::new();
        {
            let chan: &mut dyn Channel = match delivery {
                DeliveryMethod::ReliableOrdered => match self.reliable_ordered.get_mut(idx).and_then(|s| s.as_mut()) {
                    Some(c) => c,
                    None => return,
                },
                DeliveryMethod::ReliableUnordered => {
                    match self.reliable_unordered.get_mut(idx).and_then(|s| s.as_mut()) {
                        Some(c) => c,
                        None => return,
                    }
                }
                DeliveryMethod::Sequenced => match self.sequenced.get_mut(idx).and_then(|s| s.as_mut()) {
                    Some(c) => c,
                    None => return,
                },
                DeliveryMethod::Simple => return,
            };
            while let Some(item) = chan.poll_incoming() {
                ready.push(item);
            }
        }
        for (fragment, payload) in ready {
            self.surface_payload(delivery, channel, fragment, payload, now, events);
        }
    }

    /// Computes the `payloadMtu` a message sent via `property` must respect,
    /// given the currently negotiated MTU (`spec.md` §4.4). Only used on the
    /// send side: the receive side reassembles fragments without reference
    /// to the local MTU (see [`FragmentBuffer`](crate::frag::FragmentBuffer)),
    /// since each peer negotiates `mtuNegotiated` independently and the
    /// sender's and receiver's values may legitimately differ.
    fn payload_mtu_for(&self, property: PacketProperty) -> usize {
        let header_len = header_size(property, false);
        usize::from(self.mtu_negotiated)
            .saturating_sub(header_len)
            .saturating_sub(6)
            .max(1)
    }

    /// Surfaces a payload that has cleared its channel's ordering/ACK logic.
    ///
    /// Un-fragmented payloads are emitted immediately; fragments are fed
    /// into the reassembly table and only emitted once the last fragment for
    /// their message arrives. A rejected fragment (duplicate or malformed
    /// length) is dropped silently rather than torn down as a protocol
    /// error, since a retransmitted duplicate is expected, ordinary traffic.
    fn surface_payload(
        &mut self,
        delivery: DeliveryMethod,
        channel: u8,
        fragment: Option<FragmentInfo>,
        payload: Bytes,
        now: Instant,
        events: &mut Vec<Event>,
    ) {
        let Some(info) = fragment else {
            events.push(Event::Receive { peer: self.id, payload, delivery, channel });
            return;
        };

        if let Ok(Some(complete)) = self.fragments.reassemble(channel, info, &payload, now) {
            events.push(Event::Receive {
                peer: self.id,
                payload: Bytes::from(complete),
                delivery,
                channel,
            });
        }
    }

    fn record_rtt(&mut self, rtt: Duration, events: &mut Vec<Event>) {
        self.rtt = rtt;
        self.rtt_count = (self.rtt_count + 1).min(RTT_WINDOW);
        if self.rtt_count <= 1 {
            self.avg_rtt = rtt;
        } else {
            // EMA with window 6: alpha = 2 / (N + 1).
            let alpha_num: u32 = 2;
            let alpha_den: u32 = RTT_WINDOW + 1;
            let prev = self.avg_rtt.as_nanos() as u64;
            let cur = rtt.as_nanos() as u64;
            let next = (cur * u64::from(alpha_num) + prev * u64::from(alpha_den - alpha_num)) / u64::from(alpha_den);
            self.avg_rtt = Duration::from_nanos(next);
        }
        events.push(Event::ConnectionLatencyUpdated {
            peer: self.id,
            avg_rtt_ms: u32::try_from(self.avg_rtt.as_millis()).unwrap_or(u32::MAX),
        });
    }

    fn on_mtu_ok(&mut self, now: Instant) {
        if let Some(probe) = self.mtu_probe.take() {
            self.mtu_idx = i32::try_from(probe.candidate_idx).unwrap_or(i32::MAX);
            self.mtu_negotiated = ManagerConfig::MTU_CANDIDATES[probe.candidate_idx];
            let next_idx = probe.candidate_idx + 1;
            if next_idx < ManagerConfig::MTU_CANDIDATES.len() {
                self.mtu_probe = Some(MtuProbe {
                    candidate_idx: next_idx,
                    sent_at: now,
                    retries: 0,
                });
            } else {
                self.mtu_probing_done = true;
            }
        }
    }

    /// Advances handshake retransmission, ping scheduling, MTU probing, and
    /// the timeout check. Returns `true` if the peer should be dropped.
    pub(crate) fn update(&mut self, config: &ManagerConfig, now: Instant, events: &mut Vec<Event>) -> bool {
        if now.saturating_duration_since(self.last_packet_recv_at) > config.disconnect_timeout {
            events.push(Event::Disconnect {
                peer: self.id,
                reason: DisconnectReason::Timeout,
                payload: Bytes::new(),
            });
            return true;
        }

        if self.state == ConnectionState::InProgress && self.is_initiator {
            let should_send = self
                .last_connect_sent
                .map_or(true, |t| now.saturating_duration_since(t) >= config.reconnect_delay);
            if should_send {
                if self.connect_attempts >= config.max_connect_attempts {
                    events.push(Event::Disconnect {
                        peer: self.id,
                        reason: DisconnectReason::ConnectionFailed,
                        payload: Bytes::new(),
                    });
                    return true;
                }
                self.connect_attempts += 1;
                self.last_connect_sent = Some(now);
                self.control_out.push((
                    PacketProperty::ConnectRequest,
                    encode_connect_request(config.protocol_id, self.connection_id, &config.passcode_key),
                ));
            }
        }

        if self.state == ConnectionState::ShutdownRequested && !self.is_initiator {
            // Waiting on the peer to ack our Disconnect; nothing to retransmit
            // from the accepting side beyond what `begin_shutdown` already queued.
        } else if self.state == ConnectionState::ShutdownRequested {
            let should_resend = self
                .last_connect_sent
                .map_or(true, |t| now.saturating_duration_since(t) >= config.reconnect_delay);
            if should_resend {
                self.last_connect_sent = Some(now);
                self.shutdown_retries += 1;
                self.control_out.push((PacketProperty::Disconnect, self.disconnect_payload.clone()));
            }
        }

        if self.state == ConnectionState::Connected {
            let should_ping = self
                .last_ping_sent
                .map_or(true, |t| now.saturating_duration_since(t) >= config.ping_interval);
            if should_ping {
                self.last_ping_sent = Some(now);
                self.ping_stamp = Some(now);
                self.control_out.push((PacketProperty::Ping, Bytes::new()));
            }

            if self.mtu_probe.is_none() && !self.mtu_probing_done {
                let idx = usize::try_from(self.mtu_idx).unwrap_or(0) + 1;
                if idx < ManagerConfig::MTU_CANDIDATES.len() {
                    self.mtu_probe = Some(MtuProbe {
                        candidate_idx: idx,
                        sent_at: now,
                        retries: 0,
                    });
                }
            }
        }

        false
    }

    pub(crate) fn begin_shutdown(&mut self, payload: Bytes) {
        self.state = ConnectionState::ShutdownRequested;
        self.disconnect_payload = payload;
        self.shutdown_retries = 0;
    }

    pub(crate) fn disconnect_payload(&self) -> Bytes {
        self.disconnect_payload.clone()
    }

    pub(crate) fn fragments_mut(&mut self) -> &mut FragmentReceiver {
        &mut self.fragments
    }

    pub(crate) fn sweep_fragments(&mut self, now: Instant, timeout: Duration) {
        self.fragments.sweep(now, timeout);
    }

    /// Queues a raw control packet (not associated with any channel) to go
    /// out on the next [`Self::flush`].
    pub(crate) fn queue_control(&mut self, property: PacketProperty, payload: Bytes) {
        self.control_out.push((property, payload));
    }

    /// Marks an accepted inbound peer `Connected` immediately, skipping
    /// `InProgress`: by the time the `Manager` decides to accept a
    /// `ConnectRequest`, the request itself is proof enough of the
    /// handshake's first half; only the client waits on a `ConnectAccept`.
    pub(crate) fn mark_connected(&mut self) {
        self.state = ConnectionState::Connected;
    }
}

/// Encodes a `ConnectRequest` payload: `protocolId u32 | connectionId u64 |
/// key bytes` (`spec.md` §4.5).
pub(crate) fn encode_connect_request(protocol_id: u32, connection_id: u64, key: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(12 + key.len());
    buf.extend_from_slice(&protocol_id.to_le_bytes());
    buf.extend_from_slice(&connection_id.to_le_bytes());
    buf.extend_from_slice(key);
    buf.freeze()
}

/// Decodes a `ConnectRequest` payload. Returns `None` if it is shorter than
/// the fixed `protocolId | connectionId` prefix.
pub(crate) fn decode_connect_request(payload: &[u8]) -> Option<(u32, u64, &[u8])> {
    if payload.len() < 12 {
        return None;
    }
    let protocol_id = u32::from_le_bytes(payload[0..4].try_into().ok()?);
    let connection_id = u64::from_le_bytes(payload[4..12].try_into().ok()?);
    Some((protocol_id, connection_id, &payload[12..]))
}

/// Encodes a `ConnectAccept` payload: the client's `connectionId` echoed
/// back verbatim (`spec.md` §4.5).
pub(crate) fn encode_connect_accept(connection_id: u64) -> Bytes {
    Bytes::copy_from_slice(&connection_id.to_le_bytes())
}

/// Decodes a `ConnectAccept` payload. Returns `None` if shorter than 8 bytes.
pub(crate) fn decode_connect_accept(payload: &[u8]) -> Option<u64> {
    Some(u64::from_le_bytes(payload.get(0..8)?.try_into().ok()?))
}

/// Splits a `Merged` packet's payload into its constituent sub-packet byte
/// ranges: repeated `(len u16 | bytes)` (`spec.md` §6 "Merged body").
pub(crate) fn split_merged(payload: &[u8]) -> Vec<Bytes> {
    let mut out = Vec::new();
    let mut rest = payload;
    while rest.len() >= 2 {
        let len = usize::from(u16::from_le_bytes([rest[0], rest[1]]));
        if rest.len() < 2 + len {
            break;
        }
        out.push(Bytes::copy_from_slice(&rest[2..2 + len]));
        rest = &rest[2 + len..];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9000)
    }

    #[test]
    fn fragments_large_payload() {
        let config = ManagerConfig { mtu_start_idx: -1, ..ManagerConfig::default() };
        let mut peer = Peer::new(PeerId(0), addr(), 1, true, Instant::now(), &config);
        peer.mtu_negotiated = 20;
        let payload = vec![1u8; 100];
        peer.send(&payload, DeliveryMethod::ReliableOrdered, 0);
        let chan = peer.reliable_ordered[0].as_ref().unwrap();
        // payload_mtu = 20 - 4 - 6 = 10, so ceil(100/10) = 10 fragments queued.
        assert_eq!(0, chan.in_flight_count());
    }

    #[test]
    fn small_payload_is_single_message() {
        let config = ManagerConfig::default();
        let mut peer = Peer::new(PeerId(0), addr(), 1, true, Instant::now(), &config);
        peer.send(b"hi", DeliveryMethod::ReliableOrdered, 0);
        let mut pool = PacketPool::with_limit(8);
        let mut out = Vec::new();
        peer.flush(&mut pool, &config, Instant::now(), &mut out);
        assert_eq!(1, out.len());
    }

    #[test]
    fn rtt_ema_converges_toward_samples() {
        let config = ManagerConfig::default();
        let mut peer = Peer::new(PeerId(0), addr(), 1, true, Instant::now(), &config);
        let mut events = Vec::new();
        for _ in 0..20 {
            peer.record_rtt(Duration::from_millis(100), &mut events);
        }
        assert!(peer.avg_rtt().as_millis().abs_diff(100) <= 1);
    }
}
