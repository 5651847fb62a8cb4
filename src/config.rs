//! See [`ManagerConfig`].

use std::time::Duration;

/// Every recognised configuration option for a [`Manager`] and its effect,
/// per `spec.md` §6.
///
/// Configuration is frozen at [`Manager::start`]: only the simulation knobs
/// (`simulate_packet_loss` and friends) are documented as runtime-mutable,
/// per the design notes' guidance on "global defaults/config mutation on a
/// live manager".
///
/// [`Manager`]: crate::manager::Manager
/// [`Manager::start`]: crate::manager::Manager::start
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    /// Per-tick time budget passed to [`Manager::run`].
    ///
    /// [`Manager::run`]: crate::manager::Manager::run
    pub update_time: Duration,
    /// How often a connected peer sends a `Ping`.
    pub ping_interval: Duration,
    /// How long a peer may go without receiving any packet before it is
    /// disconnected with reason `Timeout`.
    pub disconnect_timeout: Duration,
    /// Delay between retransmitted `ConnectRequest`/`Disconnect` packets.
    pub reconnect_delay: Duration,
    /// Maximum number of `ConnectRequest` retransmissions before a pending
    /// connection attempt is abandoned with reason `ConnectionFailed`.
    pub max_connect_attempts: u32,
    /// Whether small outgoing packets are merged into one `Merged` datagram.
    pub merge_enabled: bool,
    /// Whether the unconnected discovery side-channel is enabled.
    pub discovery_enabled: bool,
    /// Whether unconnected user messages are accepted/sent.
    pub unconnected_messages_enabled: bool,
    /// Whether the NAT hole-punching side channel is enabled.
    pub nat_punch_enabled: bool,
    /// Enables the `ReliableOrdered` channel on every peer.
    pub enable_reliable_ordered: bool,
    /// Enables the `ReliableUnordered` channel on every peer.
    pub enable_reliable_unordered: bool,
    /// Enables the `Sequenced` channel on every peer.
    pub enable_sequenced: bool,
    /// Enables the `Simple` (unreliable) channel on every peer.
    pub enable_simple: bool,
    /// Number of numbered logical sub-streams (`spec.md` §3 `channel
    /// (0..MaxChannels-1)`) each enabled delivery method carries. Every
    /// peer gets its own independent ACK/sequence state per channel number
    /// per delivery method.
    pub max_channels: u8,
    /// Bind an IPv4 socket.
    pub enable_ipv4: bool,
    /// Bind an IPv6 socket.
    pub enable_ipv6: bool,
    /// Set `SO_REUSEADDR` (or platform equivalent) on bind.
    pub reuse_address: bool,
    /// Starting index into the MTU candidate table, or `-1` to auto-detect
    /// starting from index 0.
    pub mtu_start_idx: i32,
    /// Compile-time-ish protocol id; connect requests with a mismatched id
    /// are rejected with no response.
    pub protocol_id: u32,
    /// Maximum number of simultaneously connected peers.
    pub max_connections: usize,
    /// If non-empty, [`ConnectionRequest`] events are auto-accepted when the
    /// request's key matches and auto-rejected otherwise.
    ///
    /// [`ConnectionRequest`]: crate::event::Event::ConnectionRequest
    pub passcode_key: Vec<u8>,
    /// Debug-only: randomly drop a fraction of incoming packets.
    pub simulate_packet_loss: bool,
    /// Chance in `[0.0, 1.0]` that an incoming packet is dropped when
    /// `simulate_packet_loss` is set.
    pub simulation_packet_loss_chance: f32,
    /// Debug-only: delay incoming packet processing by a random duration.
    pub simulate_latency: bool,
    /// Minimum simulated latency when `simulate_latency` is set.
    pub simulation_min_latency: Duration,
    /// Maximum simulated latency when `simulate_latency` is set.
    pub simulation_max_latency: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            update_time: Duration::from_millis(100),
            ping_interval: Duration::from_millis(1000),
            disconnect_timeout: Duration::from_millis(5000),
            reconnect_delay: Duration::from_millis(500),
            max_connect_attempts: 10,
            merge_enabled: true,
            discovery_enabled: false,
            unconnected_messages_enabled: false,
            nat_punch_enabled: false,
            enable_reliable_ordered: true,
            enable_reliable_unordered: false,
            enable_sequenced: true,
            enable_simple: false,
            max_channels: 1,
            enable_ipv4: true,
            enable_ipv6: false,
            reuse_address: false,
            mtu_start_idx: -1,
            protocol_id: 0,
            max_connections: 64,
            passcode_key: Vec::new(),
            simulate_packet_loss: false,
            simulation_packet_loss_chance: 0.0,
            simulate_latency: false,
            simulation_min_latency: Duration::from_millis(0),
            simulation_max_latency: Duration::from_millis(0),
        }
    }
}

impl ManagerConfig {
    /// Candidate MTU values (UDP payload size, i.e. already minus the
    /// 68-byte IP/UDP overhead budget from `spec.md` §3).
    pub const MTU_CANDIDATES: [u16; 6] = [
        576 - 68,
        1492 - 68,
        1500 - 68,
        4352 - 68,
        4464 - 68,
        7981 - 68,
    ];
}
