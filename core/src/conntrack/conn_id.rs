//! Bidirectional connection identifiers.
//!
//! Provides an endpoint-specific identifier (distinguishes originator and
//! responder) and a generic order-independent identifier for TCP
//! connections.

use crate::segment::TcpSegment;

use std::cmp;
use std::fmt;
use std::net::SocketAddr;

use serde::Serialize;

/// Connection endpoints.
///
/// The sender of the first observed packet in the connection becomes the
/// originator `orig`, and the recipient becomes the responder `resp`.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Serialize)]
pub struct FiveTuple {
    /// The originator connection endpoint.
    pub orig: SocketAddr,
    /// The responder connection endpoint.
    pub resp: SocketAddr,
}

impl FiveTuple {
    /// Creates a 5-tuple from the first segment of a connection.
    pub fn from_segment(segment: &TcpSegment) -> Self {
        FiveTuple {
            orig: segment.src(),
            resp: segment.dst(),
        }
    }

    /// Converts a 5-tuple to a non-directional connection identifier.
    pub fn conn_id(&self) -> ConnId {
        ConnId::new(self.orig, self.resp)
    }
}

impl fmt::Display for FiveTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.orig, self.resp)
    }
}

/// A generic connection identifier.
///
/// Identifies a connection independent of the source and destination socket
/// address order. Does not distinguish between the originator and responder
/// of the connection.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct ConnId(SocketAddr, SocketAddr);

impl ConnId {
    /// Returns the connection ID of a packet with `src` and `dst` IP/port
    /// pairs.
    pub fn new(src: SocketAddr, dst: SocketAddr) -> Self {
        ConnId(cmp::max(src, dst), cmp::min(src, dst))
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <> {}", self.0, self.1)
    }
}
