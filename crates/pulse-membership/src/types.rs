//! Core membership types: node addresses, entries, and protocol states.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Unix timestamp in seconds, as read from a [`crate::Clock`].
pub type Timestamp = u64;

/// Identity of a process in the cluster.
///
/// The `id` carries the four IPv4 octets of the node's address and the
/// `port` its UDP port, so two processes on one host stay distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddress {
    pub id: u32,
    pub port: u16,
}

impl NodeAddress {
    pub const fn new(id: u32, port: u16) -> Self {
        Self { id, port }
    }

    pub fn ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.id)
    }

    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.ip(), self.port)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip(), self.port)
    }
}

impl From<SocketAddrV4> for NodeAddress {
    fn from(addr: SocketAddrV4) -> Self {
        Self::new(u32::from(*addr.ip()), addr.port())
    }
}

impl FromStr for NodeAddress {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<SocketAddrV4>().map(Self::from)
    }
}

/// Liveness of a table entry as judged by the local failure detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberState {
    Alive,
    /// Stale beyond `t_fail`; kept, but not gossiped to and not counted.
    Suspect,
    /// Purged; only ever seen on rejoin tombstones.
    Removed,
}

/// One row of the membership table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberEntry {
    pub address: NodeAddress,
    pub heartbeat: u64,
    /// Local time of the last heartbeat increase.
    pub last_update: Timestamp,
    pub state: MemberState,
}

impl MemberEntry {
    /// A freshly observed, alive entry.
    pub fn alive(address: NodeAddress, heartbeat: u64, now: Timestamp) -> Self {
        Self {
            address,
            heartbeat,
            last_update: now,
            state: MemberState::Alive,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.state == MemberState::Alive
    }

    /// Seconds since the heartbeat last advanced.
    pub fn staleness(&self, now: Timestamp) -> u64 {
        now.saturating_sub(self.last_update)
    }
}

/// Join handshake progress of the local node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    Bootstrapping,
    Joining,
    Member,
    /// Shut down by the runtime; entry points are ignored.
    Stopped,
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProtocolState::Bootstrapping => "bootstrapping",
            ProtocolState::Joining => "joining",
            ProtocolState::Member => "member",
            ProtocolState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}
