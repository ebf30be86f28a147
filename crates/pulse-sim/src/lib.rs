//! Deterministic in-process cluster simulation.
//!
//! Drives many membership engines over an emulated lossy network with a
//! shared manual clock, so convergence and failure detection can be
//! exercised without sockets or real time.
//!
//! # Architecture
//!
//! ```text
//! Simulation
//!   ├── ManualClock (shared by every engine)
//!   ├── EmulatedNetwork (mailbox per address, seeded loss)
//!   ├── MembershipEngine × N (node 1 = introducer)
//!   └── RecordingEvents (add/remove log for assertions)
//! ```

pub mod harness;
pub mod network;

pub use harness::{MemberEvent, RecordingEvents, Simulation, SimulationConfig};
pub use network::{EmulatedNetwork, TrafficStats};
