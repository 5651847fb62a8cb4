//! NAT hole-punching message shapes. See `spec.md` §1 ("the optional NAT
//! hole-punching module" is an external collaborator) and §9's
//! cyclic-reference redesign note.
//!
//! This module only specifies the three wire payloads the protocol
//! enumerates (`NatIntroduction`, `NatIntroductionRequest`,
//! `NatPunchMessage`) and a listener hook a host application can implement;
//! it does not implement punch-timing heuristics (retry cadence, simultaneous
//! open race handling), which `spec.md` treats as out of scope for the core.

use std::net::SocketAddr;

use octs::{Bytes, BytesMut, Read, Write};

use crate::error::DecodeError;

/// A request, relayed through a third peer (the introducer), asking it to
/// tell `target` about `requester`'s public endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NatIntroductionRequest {
    /// The endpoint that should learn about `requester`.
    pub target: SocketAddr,
}

/// Sent by the introducer to both sides, each carrying the other's public
/// endpoint, to open simultaneous punch attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NatIntroduction {
    /// The peer's address as seen by the introducer.
    pub peer_addr: SocketAddr,
    /// Shared token both sides echo in their [`NatPunchMessage`]s, so a
    /// listener can correlate a punch attempt with its introduction.
    pub token: u64,
}

/// A direct punch probe sent to the address an introduction named.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NatPunchMessage {
    /// Echoes [`NatIntroduction::token`].
    pub token: u64,
}

fn write_addr(dst: &mut BytesMut, addr: SocketAddr) {
    match addr {
        SocketAddr::V4(v4) => {
            dst.write(&0u8).expect("buffer should not overflow");
            dst.write(&v4.ip().octets()).expect("buffer should not overflow");
            dst.write(&v4.port()).expect("buffer should not overflow");
        }
        SocketAddr::V6(v6) => {
            dst.write(&1u8).expect("buffer should not overflow");
            dst.write(&v6.ip().octets()).expect("buffer should not overflow");
            dst.write(&v6.port()).expect("buffer should not overflow");
        }
    }
}

fn read_addr(src: &mut Bytes) -> Result<SocketAddr, DecodeError> {
    let tag: u8 = src.read().map_err(|_| DecodeError::BufferTooShort)?;
    match tag {
        0 => {
            let octets: [u8; 4] = src.read().map_err(|_| DecodeError::BufferTooShort)?;
            let port: u16 = src.read().map_err(|_| DecodeError::BufferTooShort)?;
            Ok(SocketAddr::from((octets, port)))
        }
        1 => {
            let octets: [u8; 16] = src.read().map_err(|_| DecodeError::BufferTooShort)?;
            let port: u16 = src.read().map_err(|_| DecodeError::BufferTooShort)?;
            Ok(SocketAddr::from((octets, port)))
        }
        _ => Err(DecodeError::UnknownProperty(tag)),
    }
}

impl NatIntroductionRequest {
    /// Encodes this request's body.
    pub fn encode(&self, dst: &mut BytesMut) {
        write_addr(dst, self.target);
    }

    /// Decodes a request body.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if `src` is truncated or names an unknown
    /// address family.
    pub fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(Self {
            target: read_addr(src)?,
        })
    }
}

impl NatIntroduction {
    /// Encodes this introduction's body.
    pub fn encode(&self, dst: &mut BytesMut) {
        write_addr(dst, self.peer_addr);
        dst.write(&self.token).expect("buffer should not overflow");
    }

    /// Decodes an introduction body.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if `src` is truncated or names an unknown
    /// address family.
    pub fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        let peer_addr = read_addr(src)?;
        let token = src.read().map_err(|_| DecodeError::BufferTooShort)?;
        Ok(Self { peer_addr, token })
    }
}

impl NatPunchMessage {
    /// Encodes this probe's body.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.write(&self.token).expect("buffer should not overflow");
    }

    /// Decodes a probe body.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if `src` is shorter than one `u64`.
    pub fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        let token = src.read().map_err(|_| DecodeError::BufferTooShort)?;
        Ok(Self { token })
    }
}

/// Hook an embedding application implements to react to NAT traffic the
/// manager relays but does not itself act on.
///
/// `spec.md` names the NAT module an external collaborator; this trait is
/// the seam the core needs, not a punch-timing implementation.
pub trait NatPunchListener {
    /// An introducer asked this peer to introduce `request.target` to
    /// `from`.
    fn on_introduction_request(&mut self, from: SocketAddr, request: NatIntroductionRequest) {
        let _ = (from, request);
    }

    /// The introducer told this peer about a candidate endpoint to punch.
    fn on_introduction(&mut self, introduction: NatIntroduction) {
        let _ = introduction;
    }

    /// A direct punch probe arrived from `from`.
    fn on_punch_message(&mut self, from: SocketAddr, message: NatPunchMessage) {
        let _ = (from, message);
    }
}

/// A [`NatPunchListener`] that ignores every callback, used when
/// `nat_punch_enabled` is set but the application registered no listener.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNatPunchListener;

impl NatPunchListener for NullNatPunchListener {}
