//! pulse-membership — gossip heartbeat membership for Pulse.
//!
//! Each node keeps its own membership table and converges with its peers
//! by pushing heartbeat digests to a few random members every round. No
//! node coordinates the others; the introducer is only a well-known first
//! contact for joiners.
//!
//! # Architecture
//!
//! ```text
//! MembershipEngine (one per node)
//!   ├── on_tick()          ← timer, once per round
//!   │   ├── FailureDetector → suspect stale peers, purge expired ones
//!   │   └── GossipDisseminator → bump heartbeat, push digest to ≤ fanout peers
//!   ├── on_message(bytes)  ← transport, per datagram
//!   │   ├── Message::decode (JSON envelope, tag + snapshot)
//!   │   └── MembershipTable::merge (max-heartbeat rule)
//!   └── collaborators
//!       ├── Transport      → fire-and-forget send
//!       ├── Clock          → epoch seconds
//!       └── MembershipEvents (optional) → add/remove notifications
//! ```
//!
//! The runtime serializes calls to both entry points. Merges are
//! idempotent and commutative, so arrival order does not matter.

pub mod clock;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod events;
pub mod gossip;
pub mod message;
pub mod table;
pub mod transport;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{MembershipConfig, parse_duration};
pub use engine::{Delivery, DropReason, MembershipEngine, RoundReport, TickOutcome};
pub use error::{ConfigError, DecodeError, MembershipError, MembershipResult};
pub use events::{EventSink, MembershipEvents, TracingEvents};
pub use message::{MAX_WIRE_VALUE, Message, SnapshotEntry};
pub use table::{MembershipTable, MergeOutcome};
pub use transport::Transport;
pub use types::*;
