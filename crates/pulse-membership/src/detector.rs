//! Failure detector — demotes stale peers and purges expired ones.
//!
//! Runs once per round, before gossip. Staleness is measured against the
//! local timestamp of each entry's last heartbeat increase.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::MembershipConfig;
use crate::table::MembershipTable;
use crate::types::{NodeAddress, Timestamp};

/// Outcome of one detection pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DetectionReport {
    /// Peers that crossed `t_fail` this round.
    pub suspected: Vec<NodeAddress>,
    /// Peers that crossed `t_remove` and were purged.
    pub removed: Vec<NodeAddress>,
}

/// Timeout-based failure detector.
#[derive(Debug, Clone)]
pub struct FailureDetector {
    t_fail: u64,
    t_remove: u64,
    rejoin_window: Duration,
}

impl FailureDetector {
    pub fn new(config: &MembershipConfig) -> Self {
        Self {
            t_fail: config.t_fail.as_secs(),
            t_remove: config.t_remove.as_secs(),
            rejoin_window: config.rejoin_window(),
        }
    }

    /// Scan every peer once. The local entry is never touched.
    pub fn run(&self, table: &mut MembershipTable, now: Timestamp) -> DetectionReport {
        let mut report = DetectionReport::default();
        let mut newly_suspect = Vec::new();

        for entry in table.peers() {
            let stale = entry.staleness(now);
            if stale > self.t_remove {
                report.removed.push(entry.address);
            } else if stale > self.t_fail && entry.is_alive() {
                newly_suspect.push(entry.address);
            }
        }

        for address in newly_suspect {
            if table.suspect(&address) {
                info!(node = %address, t_fail = self.t_fail, "member suspected");
                report.suspected.push(address);
            }
        }

        for address in &report.removed {
            if let Some(entry) = table.remove(address, now) {
                warn!(
                    node = %address,
                    heartbeat = entry.heartbeat,
                    stale_secs = entry.staleness(now),
                    "purged failed member"
                );
            }
        }

        let expired = table.expire_tombstones(now, self.rejoin_window);
        if expired > 0 {
            debug!(expired, "tombstones expired");
        }

        report
    }
}
