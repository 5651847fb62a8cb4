#![cfg_attr(any(nightly, docsrs), feature(doc_cfg, doc_auto_cfg))]
//! A reliable-UDP transport for latency-sensitive peer-to-peer and
//! client/server traffic: packet pooling, fragmentation, four delivery
//! guarantees (unreliable, sequenced, reliable unordered, reliable ordered),
//! MTU discovery, and connection lifecycle management, all driven by a
//! single-threaded, cooperatively-ticked [`Manager`](manager::Manager).
//!
//! Nothing here spawns a thread or registers with an async runtime - call
//! [`Manager::run`](manager::Manager::run) on whatever cadence your
//! application already ticks at.

pub mod ack;
pub mod channel;
pub mod config;
pub mod error;
pub mod event;
pub mod frag;
pub mod manager;
pub mod nat;
pub mod packet;
pub mod peer;
pub mod peer_table;
pub mod rng;
pub mod seq;
pub mod socket;

pub use config::ManagerConfig;
pub use error::{BindError, DecodeError, ErrorCode};
pub use event::{ConnectionRequest, DisconnectReason, Event, EventQueue, UnconnectedKind};
pub use manager::Manager;
pub use peer::{ConnectionState, Peer, PeerId};
