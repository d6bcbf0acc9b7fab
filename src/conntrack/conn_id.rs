//! Connection identifiers.
//!
//! A TCP conversation gets a freshly generated opaque [`ConnectionId`] when
//! its first packet is observed. The ID identifies the pair of
//! uni-directional flows as one specific interaction between two hosts at a
//! particular time; IP/port tuples are deliberately not used because they may
//! be reused across conversations.

use std::cmp;
use std::fmt;
use std::net::SocketAddr;

use serde::Serialize;
use uuid::Uuid;

/// Opaque 128-bit identifier for one TCP conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Allocates a fresh identifier.
    pub fn new() -> ConnectionId {
        ConnectionId(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> ConnectionId {
        ConnectionId::new()
    }
}

/// Connection 5-tuple.
///
/// The sender of the first observed packet becomes the originator `orig`,
/// and the recipient becomes the responder `resp`.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize)]
pub struct FiveTuple {
    /// The originator connection endpoint.
    pub orig: SocketAddr,
    /// The responder connection endpoint.
    pub resp: SocketAddr,
    /// The layer-4 protocol.
    pub proto: u8,
}

impl FiveTuple {
    /// Converts the 5-tuple to a direction-independent table key.
    pub fn conn_key(&self) -> ConnKey {
        ConnKey::new(self.orig, self.resp, self.proto)
    }
}

impl fmt::Display for FiveTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} protocol {}", self.orig, self.resp, self.proto)
    }
}

/// A direction-independent connection table key.
///
/// Identifies a connection regardless of which endpoint appears as the
/// source of a given packet.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct ConnKey(SocketAddr, SocketAddr, u8);

impl ConnKey {
    /// Returns the key for a packet with `src` and `dst` IP/port pairs.
    pub(crate) fn new(src: SocketAddr, dst: SocketAddr, proto: u8) -> ConnKey {
        ConnKey(cmp::max(src, dst), cmp::min(src, dst), proto)
    }
}

impl fmt::Display for ConnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <> {} protocol {}", self.0, self.1, self.2)
    }
}
