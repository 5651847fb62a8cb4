//! Error types surfaced by this crate.

use std::{convert::Infallible, io};

use octs::BufTooShortOr;
use thiserror::Error;

/// Failure to [`Manager::start`](crate::manager::Manager::start) the socket.
#[derive(Debug, Error)]
pub enum BindError {
    /// The manager is already running.
    #[error("manager already running")]
    AlreadyRunning,
    /// The underlying socket failed to bind.
    #[error("failed to bind socket")]
    Bind(#[source] io::Error),
    /// Neither IPv4 nor IPv6 was enabled in the configuration.
    #[error("neither EnableIPv4 nor EnableIPv6 set")]
    NoAddressFamilyEnabled,
}

/// Failure while decoding a [`Packet`](crate::packet::Packet) header from the
/// wire.
///
/// Every caller of [`Packet::decode`](crate::packet::Packet::decode) treats
/// this as "drop the datagram silently", per `spec.md` §7 ("malformed
/// incoming packet dropped silently") - it is surfaced as a typed error only
/// so that unit tests can assert on *why* a decode failed.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The property byte did not map to a known [`PacketProperty`](crate::packet::PacketProperty).
    #[error("unknown packet property {0:#04x}")]
    UnknownProperty(u8),
    /// The declared fragment part is `>=` the declared fragment total.
    #[error("fragment part {part} >= fragments total {total}")]
    InvalidFragmentIndex {
        /// Declared fragment part.
        part: u16,
        /// Declared fragment total.
        total: u16,
    },
    /// The buffer ended before the header was fully read.
    #[error("buffer too short to contain a valid header")]
    BufferTooShort,
}

impl From<BufTooShortOr<Infallible>> for DecodeError {
    fn from(_: BufTooShortOr<Infallible>) -> Self {
        Self::BufferTooShort
    }
}

/// Error code surfaced on an [`Event::Error`](crate::event::Event::Error).
///
/// These map to `spec.md` §7's error taxonomy; they are informational only
/// and never change control flow beyond what the taxonomy already dictates
/// (drop, disconnect, or log-and-continue).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorCode {
    /// `sendto` failed with a code other than "message too long" or "no
    /// route to host".
    #[error("socket send failed")]
    SocketSendError,
    /// A datagram larger than the platform allows was dropped.
    #[error("message too long, packet dropped")]
    MessageTooLong,
}
