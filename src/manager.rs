//! Socket pump, dispatch, and event multiplexer. See [`Manager`].

use std::{
    cell::Cell,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    rc::Rc,
    thread,
    time::{Duration, Instant},
};

use octs::Bytes;

use crate::{
    channel::DeliveryMethod,
    config::ManagerConfig,
    error::{BindError, ErrorCode},
    event::{ConnectionRequest, DisconnectReason, Event, EventQueue, UnconnectedKind},
    nat::{NatIntroduction, NatIntroductionRequest, NatPunchListener, NatPunchMessage, NullNatPunchListener},
    packet::{Packet, PacketPool, PacketProperty},
    peer::{decode_connect_request, encode_connect_accept, split_merged, Peer, PeerId},
    peer_table::PeerTable,
    rng::ConnectionRng,
    socket::{DatagramSocket, UdpTransport},
};

/// Maximum nesting depth when unpacking `Merged` containers, guarding against
/// a datagram that names itself as its own sub-packet.
const MAX_MERGE_DEPTH: u8 = 4;

struct PendingConnection {
    from: SocketAddr,
    connection_id: u64,
    key: Bytes,
    decision: Rc<Cell<Option<bool>>>,
    requested_at: Instant,
}

struct DelayedDatagram {
    ready_at: Instant,
    from: SocketAddr,
    bytes: Vec<u8>,
}

/// Owns the socket, the [`PeerTable`], and the [`EventQueue`]; drives one
/// cooperative tick per [`Self::run`] call (`spec.md` §4.6, §5).
pub struct Manager<S: DatagramSocket = UdpTransport> {
    config: ManagerConfig,
    socket: S,
    pool: PacketPool,
    peers: PeerTable,
    events: EventQueue,
    rng: ConnectionRng,
    nat_listener: Box<dyn NatPunchListener>,
    pending_connections: Vec<PendingConnection>,
    delayed: Vec<DelayedDatagram>,
    recv_buf: Vec<u8>,
}

impl Manager<UdpTransport> {
    /// Binds a dual-stack [`UdpTransport`] per `config` and returns a
    /// ready-to-run manager.
    ///
    /// `spec.md` §4.6 names `AlreadyRunning` among `start`'s failure modes;
    /// this API has no separate "unstarted" state to be already-running
    /// from; `start` both binds and returns the running manager in one step
    /// (see `DESIGN.md`), so only [`BindError::Bind`] and
    /// [`BindError::NoAddressFamilyEnabled`] are reachable here.
    ///
    /// # Errors
    ///
    /// Returns [`BindError`] if neither address family is enabled or the
    /// bind itself fails.
    pub fn start(port: u16, config: ManagerConfig) -> Result<Self, BindError> {
        let socket = UdpTransport::bind(port, &config).map_err(|err| {
            if !config.enable_ipv4 && !config.enable_ipv6 {
                tracing::warn!("no address family enabled in config");
                BindError::NoAddressFamilyEnabled
            } else {
                tracing::warn!(port, %err, "failed to bind socket");
                BindError::Bind(err)
            }
        })?;
        tracing::debug!(port, "manager bound");
        Ok(Self::with_socket(socket, config))
    }

    /// The bound IPv4 address, if `enable_ipv4` was set. Useful when
    /// `start` was called with port `0` and the OS assigned one.
    ///
    /// # Errors
    ///
    /// Returns [`std::io::Error`] if the underlying `local_addr` call fails.
    pub fn local_addr_v4(&self) -> std::io::Result<Option<SocketAddr>> {
        self.socket.local_addr_v4()
    }

    /// The bound IPv6 address, if `enable_ipv6` was set.
    ///
    /// # Errors
    ///
    /// Returns [`std::io::Error`] if the underlying `local_addr` call fails.
    pub fn local_addr_v6(&self) -> std::io::Result<Option<SocketAddr>> {
        self.socket.local_addr_v6()
    }
}

impl<S: DatagramSocket> Manager<S> {
    /// Builds a manager around an already-constructed socket. Used directly
    /// by tests that substitute a [`DatagramSocket`] double; production
    /// callers should prefer [`Manager::start`].
    pub fn with_socket(socket: S, config: ManagerConfig) -> Self {
        let pool = PacketPool::new(config.max_connections);
        let peers = PeerTable::new(config.max_connections);
        Self {
            recv_buf: vec![0u8; PacketPool::MAX_PACKET_SIZE],
            config,
            socket,
            pool,
            peers,
            events: EventQueue::new(),
            rng: ConnectionRng::default(),
            nat_listener: Box::new(NullNatPunchListener),
            pending_connections: Vec::new(),
            delayed: Vec::new(),
        }
    }

    /// Installs the hook for NAT hole-punch callbacks (`spec.md` §1, §9).
    pub fn set_nat_listener(&mut self, listener: impl NatPunchListener + 'static) {
        self.nat_listener = Box::new(listener);
    }

    /// Number of peers currently in the table, connected or connecting.
    #[must_use]
    pub fn peers_count(&self) -> usize {
        self.peers.len()
    }

    /// Looks up a peer by id.
    #[must_use]
    pub fn peer(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(id)
    }

    /// Every peer id currently in the table.
    #[must_use]
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.ids()
    }

    /// The event queue; drain it after each [`Self::run`] call.
    pub fn events(&mut self) -> &mut EventQueue {
        &mut self.events
    }

    /// Initiates an outbound connection, or returns the existing peer if
    /// `endpoint` is already in the table (`spec.md` §4.6).
    ///
    /// Returns `None` if the table is already at `max_connections`. The
    /// `ConnectRequest` itself isn't sent here; [`Peer::update`] queues it
    /// (echoing `config.passcode_key`) on the first [`Self::run`] tick, so a
    /// caller that never calls `run` never leaks a packet onto the wire.
    pub fn connect(&mut self, endpoint: SocketAddr) -> Option<PeerId> {
        if let Some(existing) = self.peers.id_for_addr(endpoint) {
            return Some(existing);
        }
        let connection_id = self.rng.connection_id();
        let now = Instant::now();
        let config = &self.config;
        self.peers.insert_with(|id| Peer::new(id, endpoint, connection_id, true, now, config))
    }

    /// Queues `payload` for `peer` via `delivery` on `channel`. No-op if
    /// `peer` is absent or not yet `Connected` (`spec.md` §4.4
    /// `Peer.send(payload, deliveryMethod, channel)`).
    pub fn send(&mut self, peer: PeerId, payload: &[u8], delivery: DeliveryMethod, channel: u8) {
        if let Some(peer) = self.peers.get_mut(peer) {
            if peer.state() == crate::peer::ConnectionState::Connected {
                peer.send(payload, delivery, channel);
            }
        }
    }

    /// Sends `payload` to every `Connected` peer except `exclude`, via
    /// `delivery` on `channel` (`spec.md` §4.6
    /// `sendToAll(bytes, delivery, channel, excludePeer?)`).
    pub fn send_to_all(&mut self, payload: &[u8], delivery: DeliveryMethod, channel: u8, exclude: Option<PeerId>) {
        for peer in self.peers.iter_mut() {
            if Some(peer.id()) == exclude {
                continue;
            }
            if peer.state() == crate::peer::ConnectionState::Connected {
                peer.send(payload, delivery, channel);
            }
        }
    }

    /// Begins a graceful shutdown of `peer`, optionally attaching `payload`
    /// to the `Disconnect` the remote side will see.
    pub fn disconnect_peer(&mut self, peer: PeerId, payload: &[u8]) {
        if let Some(peer) = self.peers.get_mut(peer) {
            peer.begin_shutdown(Bytes::copy_from_slice(payload));
        }
    }

    /// Begins a graceful shutdown of every peer in the table.
    pub fn disconnect_all(&mut self, payload: &[u8]) {
        for id in self.peers.ids() {
            self.disconnect_peer(id, payload);
        }
    }

    /// Broadcasts a `DiscoveryRequest` to `port` on the local IPv4 subnet
    /// (`spec.md` §4.6, §6). No-op if `discovery_enabled` is unset.
    pub fn send_discovery_request(&mut self, port: u16, payload: &[u8]) {
        if !self.config.discovery_enabled {
            return;
        }
        let packet = self.pool.get_with_data(PacketProperty::DiscoveryRequest, 0, payload);
        let target = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), port);
        let _ = self.socket.send_to(packet.wire_bytes(), target);
        self.pool.recycle(packet);
    }

    /// Unicasts a `DiscoveryResponse` back to a host that broadcast a
    /// `DiscoveryRequest` (`spec.md` §4.6).
    pub fn send_discovery_response(&mut self, to: SocketAddr, payload: &[u8]) {
        let packet = self.pool.get_with_data(PacketProperty::DiscoveryResponse, 0, payload);
        let _ = self.socket.send_to(packet.wire_bytes(), to);
        self.pool.recycle(packet);
    }

    /// Sends a raw payload to `to` without establishing a connection
    /// (`spec.md` §1, §6). No-op if `unconnected_messages_enabled` is unset.
    pub fn send_unconnected_message(&mut self, to: SocketAddr, payload: &[u8]) {
        if !self.config.unconnected_messages_enabled {
            return;
        }
        let packet = self.pool.get_with_data(PacketProperty::UnconnectedMessage, 0, payload);
        let _ = self.socket.send_to(packet.wire_bytes(), to);
        self.pool.recycle(packet);
    }

    /// Asks `introducer` to introduce this endpoint to `target`
    /// (`spec.md` §1, §9). No-op if `nat_punch_enabled` is unset.
    pub fn send_nat_introduction_request(&mut self, introducer: SocketAddr, target: SocketAddr) {
        if !self.config.nat_punch_enabled {
            return;
        }
        let mut body = octs::BytesMut::new();
        NatIntroductionRequest { target }.encode(&mut body);
        let packet = self.pool.get_with_data(PacketProperty::NatIntroductionRequest, 0, &body);
        let _ = self.socket.send_to(packet.wire_bytes(), introducer);
        self.pool.recycle(packet);
    }

    /// Relays `introduction` to `to`, telling it about a candidate punch
    /// target (`spec.md` §1, §9). No-op if `nat_punch_enabled` is unset.
    pub fn send_nat_introduction(&mut self, to: SocketAddr, introduction: NatIntroduction) {
        if !self.config.nat_punch_enabled {
            return;
        }
        let mut body = octs::BytesMut::new();
        introduction.encode(&mut body);
        let packet = self.pool.get_with_data(PacketProperty::NatIntroduction, 0, &body);
        let _ = self.socket.send_to(packet.wire_bytes(), to);
        self.pool.recycle(packet);
    }

    /// Sends a direct punch probe to `to` (`spec.md` §1, §9). No-op if
    /// `nat_punch_enabled` is unset.
    pub fn send_nat_punch(&mut self, to: SocketAddr, message: NatPunchMessage) {
        if !self.config.nat_punch_enabled {
            return;
        }
        let mut body = octs::BytesMut::new();
        message.encode(&mut body);
        let packet = self.pool.get_with_data(PacketProperty::NatPunchMessage, 0, &body);
        let _ = self.socket.send_to(packet.wire_bytes(), to);
        self.pool.recycle(packet);
    }

    /// Runs one tick: drains incoming datagrams within `budget`, advances
    /// every peer's handshake/ping/MTU/timeout state, flushes outgoing
    /// packets, removes peers that became `Disconnected`, and sleeps any
    /// remaining budget (`spec.md` §4.6, §5).
    pub fn run(&mut self, budget: Duration) {
        let tick_deadline = Instant::now() + budget;
        self.receive_phase(tick_deadline);

        let now = Instant::now();
        self.resolve_pending_connections(now);
        self.update_peers(now);
        self.flush_peers(now);
        self.remove_disconnected();

        let remaining = tick_deadline.saturating_duration_since(Instant::now());
        if !remaining.is_zero() {
            thread::sleep(remaining);
        }
    }

    fn receive_phase(&mut self, deadline: Instant) {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.socket.recv_from(&mut self.recv_buf, remaining) {
                Ok((n, from)) => {
                    let bytes = self.recv_buf[..n].to_vec();
                    self.on_datagram(from, Instant::now(), &bytes);
                }
                Err(err)
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut => {}
                Err(_) => break,
            }
        }
        self.drain_delayed(Instant::now());
    }

    fn on_datagram(&mut self, from: SocketAddr, now: Instant, bytes: &[u8]) {
        if self.config.simulate_packet_loss && self.rng.roll_drop(self.config.simulation_packet_loss_chance) {
            return;
        }
        if self.config.simulate_latency {
            let delay = self
                .rng
                .roll_latency(self.config.simulation_min_latency, self.config.simulation_max_latency);
            self.delayed.push(DelayedDatagram {
                ready_at: now + delay,
                from,
                bytes: bytes.to_vec(),
            });
            return;
        }
        self.dispatch_datagram(from, now, bytes, 0);
    }

    fn drain_delayed(&mut self, now: Instant) {
        let mut i = 0;
        while i < self.delayed.len() {
            if self.delayed[i].ready_at <= now {
                let entry = self.delayed.remove(i);
                self.dispatch_datagram(entry.from, now, &entry.bytes, 0);
            } else {
                i += 1;
            }
        }
    }

    fn dispatch_datagram(&mut self, from: SocketAddr, now: Instant, bytes: &[u8], depth: u8) {
        if depth > MAX_MERGE_DEPTH {
            return;
        }
        // Malformed header: `spec.md` §7 says drop silently (but still log,
        // since a flood of these usually means a version mismatch).
        let Some(packet) = self.pool.get_and_read(bytes) else {
            tracing::trace!(%from, len = bytes.len(), "dropping malformed datagram");
            return;
        };

        match packet.property() {
            PacketProperty::Merged => {
                let parts = split_merged(packet.payload());
                self.pool.recycle(packet);
                for part in parts {
                    self.dispatch_datagram(from, now, &part, depth + 1);
                }
            }
            PacketProperty::ConnectRequest => self.handle_connect_request(from, now, &packet),
            PacketProperty::DiscoveryRequest => {
                if self.config.discovery_enabled {
                    self.events.push(Event::ReceiveUnconnected {
                        from,
                        payload: Bytes::copy_from_slice(packet.payload()),
                        kind: UnconnectedKind::DiscoveryRequest,
                    });
                }
            }
            PacketProperty::DiscoveryResponse => {
                if self.config.discovery_enabled {
                    self.events.push(Event::ReceiveUnconnected {
                        from,
                        payload: Bytes::copy_from_slice(packet.payload()),
                        kind: UnconnectedKind::Message,
                    });
                }
            }
            PacketProperty::UnconnectedMessage => {
                if self.config.unconnected_messages_enabled {
                    self.events.push(Event::ReceiveUnconnected {
                        from,
                        payload: Bytes::copy_from_slice(packet.payload()),
                        kind: UnconnectedKind::Message,
                    });
                }
            }
            PacketProperty::NatIntroductionRequest => {
                if self.config.nat_punch_enabled {
                    if let Ok(req) = NatIntroductionRequest::decode(&mut Bytes::copy_from_slice(packet.payload())) {
                        self.nat_listener.on_introduction_request(from, req);
                    }
                }
            }
            PacketProperty::NatIntroduction => {
                if self.config.nat_punch_enabled {
                    if let Ok(intro) = NatIntroduction::decode(&mut Bytes::copy_from_slice(packet.payload())) {
                        self.nat_listener.on_introduction(intro);
                    }
                }
            }
            PacketProperty::NatPunchMessage => {
                if self.config.nat_punch_enabled {
                    if let Ok(msg) = NatPunchMessage::decode(&mut Bytes::copy_from_slice(packet.payload())) {
                        self.nat_listener.on_punch_message(from, msg);
                    }
                }
            }
            PacketProperty::Disconnect if self.peers.id_for_addr(from).is_none() => {
                // Unknown-peer Disconnect: reply without creating any state.
                self.reply_shutdown_ok(from);
            }
            _ => self.route_to_peer(from, now, packet),
        }
    }

    fn route_to_peer(&mut self, from: SocketAddr, now: Instant, packet: Packet) {
        let Some(id) = self.peers.id_for_addr(from) else {
            return;
        };
        let property = packet.property();
        let mut events = Vec::new();
        let was_live;
        {
            let Some(peer) = self.peers.get_mut(id) else { return };
            was_live = peer.state() != crate::peer::ConnectionState::Disconnected;
            peer.process_packet(packet, now, &mut events);
        }
        self.push_events(events);

        let Some(peer) = self.peers.get(id) else { return };
        if was_live && peer.state() == crate::peer::ConnectionState::Disconnected {
            // A `Disconnect` packet means the remote side closed on us; any
            // other route to `Disconnected` here is our own `ShutdownOk`
            // reply acking a local `disconnect_peer`/`disconnect_all` call.
            let reason = if property == PacketProperty::Disconnect {
                self.reply_shutdown_ok(from);
                DisconnectReason::RemoteConnectionClose
            } else {
                DisconnectReason::DisconnectPeerCalled
            };
            let payload = peer.disconnect_payload();
            self.events.push(Event::Disconnect { peer: id, reason, payload });
        }
    }

    fn reply_shutdown_ok(&mut self, to: SocketAddr) {
        let packet = self.pool.get_with_data(PacketProperty::ShutdownOk, 0, &[]);
        let _ = self.socket.send_to(packet.wire_bytes(), to);
        self.pool.recycle(packet);
    }

    fn handle_connect_request(&mut self, from: SocketAddr, now: Instant, packet: &Packet) {
        let Some((protocol_id, connection_id, key)) = decode_connect_request(packet.payload()) else {
            return;
        };
        if protocol_id != self.config.protocol_id {
            // Wrong protocol id: dropped without a response (`spec.md` §7).
            return;
        }

        if let Some(existing) = self.peers.id_for_addr(from) {
            // A retransmitted ConnectRequest for a peer we already accepted;
            // the client may simply have missed our first ConnectAccept.
            if let Some(peer) = self.peers.get(existing) {
                if peer.state() == crate::peer::ConnectionState::Connected {
                    let reply = encode_connect_accept(peer.connection_id());
                    if let Some(peer) = self.peers.get_mut(existing) {
                        peer.queue_control(PacketProperty::ConnectAccept, reply);
                    }
                }
            }
            return;
        }

        if !self.config.passcode_key.is_empty() {
            if key == self.config.passcode_key.as_slice() {
                self.accept_connection(from, connection_id, now);
            }
            // Mismatched key: auto-rejected, no response.
            return;
        }

        self.pending_connections.push(PendingConnection {
            from,
            connection_id,
            key: Bytes::copy_from_slice(key),
            decision: Rc::new(Cell::new(None)),
            requested_at: now,
        });
        let decision = self.pending_connections.last().expect("just pushed").decision.clone();
        self.events.push(Event::ConnectionRequest(ConnectionRequest {
            from,
            connection_id,
            payload: Bytes::copy_from_slice(key),
            decision,
        }));
    }

    fn resolve_pending_connections(&mut self, now: Instant) {
        let mut i = 0;
        while i < self.pending_connections.len() {
            let decision = self.pending_connections[i].decision.get();
            let stale = now.saturating_duration_since(self.pending_connections[i].requested_at)
                > self.config.disconnect_timeout;
            match decision {
                Some(true) => {
                    let pending = self.pending_connections.remove(i);
                    self.accept_connection(pending.from, pending.connection_id, now);
                }
                Some(false) => {
                    self.pending_connections.remove(i);
                }
                None if stale => {
                    self.pending_connections.remove(i);
                }
                None => i += 1,
            }
        }
    }

    fn accept_connection(&mut self, from: SocketAddr, connection_id: u64, now: Instant) {
        if !self.peers.has_capacity() {
            return;
        }
        let config = &self.config;
        let Some(id) = self.peers.insert_with(|id| {
            let mut peer = Peer::new(id, from, connection_id, false, now, config);
            peer.mark_connected();
            peer
        }) else {
            return;
        };
        tracing::debug!(peer = id.0, %from, "accepted inbound connection");
        self.events.push(Event::Connect { peer: id });
        if let Some(peer) = self.peers.get_mut(id) {
            peer.queue_control(PacketProperty::ConnectAccept, encode_connect_accept(connection_id));
        }
    }

    fn update_peers(&mut self, now: Instant) {
        let config = &self.config;
        let mut events = Vec::new();
        let mut expired = Vec::new();
        for peer in self.peers.iter_mut() {
            if peer.update(config, now, &mut events) {
                expired.push(peer.id());
            }
        }
        self.push_events(events);
        for id in expired {
            tracing::debug!(peer = id.0, "dropping peer");
            self.peers.remove(id);
        }

        let timeout = config.disconnect_timeout;
        for peer in self.peers.iter_mut() {
            peer.sweep_fragments(now, timeout);
        }
    }

    fn push_events(&mut self, events: Vec<Event>) {
        for event in events {
            self.events.push(event);
        }
    }

    fn flush_peers(&mut self, now: Instant) {
        for peer in self.peers.iter_mut() {
            let mut out = Vec::new();
            peer.flush(&mut self.pool, &self.config, now, &mut out);
            for packet in out {
                match self.socket.send_to(packet.wire_bytes(), peer.remote_addr()) {
                    Ok(_) => {}
                    Err(err) => {
                        let code = classify_send_error(&err);
                        if let Some(code) = code {
                            tracing::warn!(peer = peer.id().0, %err, "send failed");
                            self.events.push(Event::Error {
                                peer: Some(peer.id()),
                                code,
                            });
                        }
                    }
                }
                self.pool.recycle(packet);
            }
        }
    }

    fn remove_disconnected(&mut self) {
        for id in self.peers.ids() {
            let disconnected = self
                .peers
                .get(id)
                .is_some_and(|peer| peer.state() == crate::peer::ConnectionState::Disconnected);
            if disconnected {
                self.peers.remove(id);
            }
        }
    }
}

/// Maps a `sendto` failure onto `spec.md` §7's taxonomy. Returns `None` for
/// the two codes treated as silent drops (message too long, no route to
/// host); any other code surfaces as [`ErrorCode::SocketSendError`].
fn classify_send_error(err: &std::io::Error) -> Option<ErrorCode> {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::InvalidInput | ErrorKind::Unsupported => Some(ErrorCode::MessageTooLong),
        ErrorKind::AddrNotAvailable | ErrorKind::NotFound => None,
        _ => Some(ErrorCode::SocketSendError),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::test_support::LoopbackSocket;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn connect_beyond_capacity_returns_none() {
        let config = ManagerConfig { max_connections: 1, ..ManagerConfig::default() };
        let socket = LoopbackSocket::new(addr(9000));
        let mut manager = Manager::with_socket(socket, config);
        assert!(manager.connect(addr(1)).is_some());
        assert!(manager.connect(addr(2)).is_none());
    }

    #[test]
    fn connect_is_idempotent_for_known_endpoint() {
        let config = ManagerConfig::default();
        let socket = LoopbackSocket::new(addr(9000));
        let mut manager = Manager::with_socket(socket, config);
        let first = manager.connect(addr(1)).unwrap();
        let second = manager.connect(addr(1)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn discovery_request_disabled_by_default() {
        let config = ManagerConfig::default();
        let socket = LoopbackSocket::new(addr(9000));
        let mut manager = Manager::with_socket(socket, config);
        manager.send_discovery_request(9050, b"hi");
        // No assertion beyond "doesn't panic": LoopbackSocket::send_to is
        // unimplemented, so reaching it would have aborted the test; the
        // disabled-by-default early return means it never does.
    }

    #[test]
    fn malformed_datagram_is_dropped_silently() {
        let config = ManagerConfig::default();
        let socket = LoopbackSocket::new(addr(9000));
        let mut manager = Manager::with_socket(socket, config);
        manager.dispatch_datagram(addr(1), Instant::now(), &[31], 0);
        assert_eq!(0, manager.events.len());
    }

    #[test]
    fn connection_request_accept_creates_peer_on_next_resolve() {
        let config = ManagerConfig { protocol_id: 7, ..ManagerConfig::default() };
        let socket = LoopbackSocket::new(addr(9000));
        let mut manager = Manager::with_socket(socket, config);

        let body = crate::peer::encode_connect_request(7, 42, b"key");
        manager.dispatch_datagram(addr(1), Instant::now(), &body_as_packet(PacketProperty::ConnectRequest, &body), 0);

        let Some(Event::ConnectionRequest(mut req)) = manager.events.pop() else {
            panic!("expected a ConnectionRequest event");
        };
        assert_eq!(b"key", req.payload());
        req.accept();

        manager.resolve_pending_connections(Instant::now());
        assert_eq!(1, manager.peers_count());
        assert!(matches!(manager.events.pop(), Some(Event::Connect { .. })));
    }

    fn body_as_packet(property: PacketProperty, body: &[u8]) -> Vec<u8> {
        let mut pool = PacketPool::with_limit(8);
        let packet = pool.get_with_data(property, 0, body);
        packet.wire_bytes().to_vec()
    }
}
