//! Gossip disseminator — heartbeat advance and randomized digest push.
//!
//! Each round the local heartbeat is bumped, then the full digest is
//! sent to at most `fanout` alive peers chosen uniformly at random
//! without replacement. Per-round cost stays `O(fanout)` whatever the
//! cluster size.

use rand::Rng;
use rand::seq::IteratorRandom;
use tracing::{debug, error};

use crate::config::MembershipConfig;
use crate::message::Message;
use crate::table::MembershipTable;
use crate::transport::Transport;
use crate::types::{NodeAddress, Timestamp};

/// Result of one dissemination round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GossipRound {
    /// Local heartbeat after the advance.
    pub heartbeat: u64,
    /// Peers the digest was sent to; empty on non-gossip rounds.
    pub targets: Vec<NodeAddress>,
}

/// Push-gossip of the membership digest.
#[derive(Debug, Clone)]
pub struct GossipDisseminator {
    fanout: usize,
    every_rounds: u64,
}

impl GossipDisseminator {
    pub fn new(config: &MembershipConfig) -> Self {
        Self {
            fanout: config.fanout,
            every_rounds: config.gossip_every_rounds.max(1),
        }
    }

    /// Whether round number `round` pushes a digest.
    pub fn is_gossip_round(&self, round: u64) -> bool {
        round % self.every_rounds == 0
    }

    /// Pick up to `fanout` distinct alive peers at random.
    ///
    /// Yields `min(fanout, alive_count - 1)` addresses, none of them local.
    pub fn select_targets<R: Rng + ?Sized>(
        &self,
        table: &MembershipTable,
        rng: &mut R,
    ) -> Vec<NodeAddress> {
        table
            .alive_peers()
            .map(|e| e.address)
            .choose_multiple(rng, self.fanout)
    }

    /// Advance the local heartbeat and, on gossip rounds, push the digest.
    pub fn run<R: Rng + ?Sized>(
        &self,
        table: &mut MembershipTable,
        round: u64,
        now: Timestamp,
        rng: &mut R,
        transport: &dyn Transport,
    ) -> GossipRound {
        let heartbeat = table.advance_local(now);

        if !self.is_gossip_round(round) {
            return GossipRound {
                heartbeat,
                targets: Vec::new(),
            };
        }

        let targets = self.select_targets(table, rng);
        if targets.is_empty() {
            return GossipRound { heartbeat, targets };
        }

        let digest = Message::Gossip {
            snapshot: table.snapshot(),
        };
        let payload = match digest.encode() {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "failed to encode gossip digest");
                return GossipRound {
                    heartbeat,
                    targets: Vec::new(),
                };
            }
        };

        let local = table.local_address();
        for target in &targets {
            transport.send(local, *target, payload.clone());
        }
        debug!(
            node = %local,
            heartbeat,
            fanout = targets.len(),
            entries = table.len(),
            "gossip pushed"
        );

        GossipRound { heartbeat, targets }
    }
}
