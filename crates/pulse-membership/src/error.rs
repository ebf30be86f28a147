//! Error types for the membership core.

use thiserror::Error;

use crate::types::NodeAddress;

/// Result type alias for membership operations.
pub type MembershipResult<T> = Result<T, MembershipError>;

/// Errors surfaced by the protocol engine to its runtime.
///
/// Recoverable conditions (malformed input, lost sends, stale rejoins)
/// never appear here; they are absorbed by the engine.
#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("no join reply from introducer {introducer} after {waited_secs}s")]
    JoinTimeout {
        introducer: NodeAddress,
        waited_secs: u64,
    },

    #[error("node {0} has been shut down")]
    Stopped(NodeAddress),

    #[error("local invariant violated: {0}")]
    Invariant(String),
}

/// Rejected configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("t_fail must be at least one second, got {0:?}")]
    FailTimeoutTooShort(std::time::Duration),

    #[error("t_remove ({t_remove:?}) must exceed t_fail ({t_fail:?}) by at least one round ({round:?})")]
    RemoveTimeoutTooShort {
        t_fail: std::time::Duration,
        t_remove: std::time::Duration,
        round: std::time::Duration,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("initial_heartbeat {0} exceeds the signed 64-bit wire range")]
    HeartbeatOutOfRange(u64),

    #[error("invalid duration {0:?} (expected e.g. \"5s\" or \"500ms\")")]
    Duration(String),
}

/// Why an inbound payload was rejected before touching the table.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload is not a valid message: {0}")]
    Malformed(String),

    #[error("unknown message tag {0}")]
    UnknownTag(u8),

    #[error("join request must carry exactly one entry, got {0}")]
    JoinRequestShape(usize),
}
