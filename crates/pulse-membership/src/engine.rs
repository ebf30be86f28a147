//! Protocol engine — join handshake, message dispatch, and round driving.
//!
//! The engine owns one node's membership table and exposes two entry
//! points to its runtime: [`MembershipEngine::on_tick`] for a protocol
//! round and [`MembershipEngine::on_message`] for an inbound payload.
//! Neither blocks. The runtime must serialize calls to both; the engine
//! does no locking of its own.
//!
//! ```text
//! Bootstrapping ──(self == introducer)──────────────► Member
//!       │                                                ▲
//!       └──send JoinRequest──► Joining ──JoinReply───────┘
//! ```

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::MembershipConfig;
use crate::detector::FailureDetector;
use crate::error::{DecodeError, MembershipError, MembershipResult};
use crate::events::EventSink;
use crate::gossip::GossipDisseminator;
use crate::message::{Message, SnapshotEntry};
use crate::table::{MembershipTable, MergeOutcome};
use crate::transport::Transport;
use crate::types::{MemberEntry, NodeAddress, ProtocolState, Timestamp};

/// What one call to [`MembershipEngine::on_tick`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Still waiting for a join reply.
    Joining,
    /// A full round ran.
    Round(RoundReport),
    /// The engine has been shut down; nothing happened.
    Stopped,
}

/// Summary of a completed protocol round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundReport {
    pub round: u64,
    pub heartbeat: u64,
    pub suspected: Vec<NodeAddress>,
    pub removed: Vec<NodeAddress>,
    pub gossip_targets: Vec<NodeAddress>,
}

/// What one call to [`MembershipEngine::on_message`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The message was merged into the table.
    Applied {
        kind: &'static str,
        new_members: usize,
    },
    /// The message was discarded without touching the table.
    Dropped(DropReason),
}

/// Why an inbound message was discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    Malformed(DecodeError),
    Unexpected {
        state: ProtocolState,
        kind: &'static str,
    },
    Stopped,
}

/// Gossip-style membership engine for one node.
pub struct MembershipEngine {
    config: MembershipConfig,
    table: MembershipTable,
    state: ProtocolState,
    round: u64,
    join_sent_at: Option<Timestamp>,
    detector: FailureDetector,
    gossip: GossipDisseminator,
    transport: Box<dyn Transport>,
    clock: Box<dyn Clock>,
    events: Option<EventSink>,
    rng: StdRng,
}

impl MembershipEngine {
    /// Create an engine for `address`. The table starts with the local entry only.
    pub fn new(
        address: NodeAddress,
        config: MembershipConfig,
        transport: impl Transport + 'static,
        clock: impl Clock + 'static,
    ) -> MembershipResult<Self> {
        config.validate()?;
        let now = clock.now();
        Ok(Self {
            table: MembershipTable::new(address, config.initial_heartbeat, now),
            state: ProtocolState::Bootstrapping,
            round: 0,
            join_sent_at: None,
            detector: FailureDetector::new(&config),
            gossip: GossipDisseminator::new(&config),
            transport: Box::new(transport),
            clock: Box::new(clock),
            events: None,
            rng: StdRng::from_entropy(),
            config,
        })
    }

    /// Attach a sink for member add/remove notifications.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = Some(events);
        self
    }

    /// Use a fixed seed for peer selection (reproducible runs).
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Run the bootstrap step.
    ///
    /// The introducer becomes a member on its own; everyone else sends a
    /// join request to the introducer and waits. Calling this again after
    /// bootstrap is a no-op.
    pub fn start(&mut self) -> MembershipResult<ProtocolState> {
        match self.state {
            ProtocolState::Bootstrapping => {}
            ProtocolState::Stopped => return Err(MembershipError::Stopped(self.address())),
            state => return Ok(state),
        }

        let address = self.address();
        if address == self.config.introducer {
            info!(node = %address, heartbeat = self.self_heartbeat(), "starting up group as introducer");
            self.state = ProtocolState::Member;
        } else {
            self.send_join_request();
            self.state = ProtocolState::Joining;
        }
        Ok(self.state)
    }

    /// Resend the join request and restart the join timer.
    ///
    /// The retry policy (how often, how many times) belongs to the caller.
    pub fn retry_join(&mut self) -> MembershipResult<()> {
        match self.state {
            ProtocolState::Joining => {
                self.send_join_request();
                Ok(())
            }
            ProtocolState::Stopped => Err(MembershipError::Stopped(self.address())),
            state => Err(MembershipError::Invariant(format!(
                "retry_join called while {state}"
            ))),
        }
    }

    /// One protocol round: failure detection, then dissemination.
    ///
    /// While joining, surfaces [`MembershipError::JoinTimeout`] once the
    /// introducer has been silent for `join_timeout`.
    pub fn on_tick(&mut self) -> MembershipResult<TickOutcome> {
        match self.state {
            ProtocolState::Stopped => return Ok(TickOutcome::Stopped),
            ProtocolState::Bootstrapping => {
                if self.start()? == ProtocolState::Joining {
                    return Ok(TickOutcome::Joining);
                }
            }
            ProtocolState::Joining => return self.check_join_timeout(),
            ProtocolState::Member => {}
        }

        let now = self.clock.now();
        let observer = self.address();

        let detection = self.detector.run(&mut self.table, now);
        if let Some(events) = &self.events {
            for removed in &detection.removed {
                events.member_removed(observer, *removed);
            }
        }

        self.round += 1;
        let gossip = self.gossip.run(
            &mut self.table,
            self.round,
            now,
            &mut self.rng,
            self.transport.as_ref(),
        );

        Ok(TickOutcome::Round(RoundReport {
            round: self.round,
            heartbeat: gossip.heartbeat,
            suspected: detection.suspected,
            removed: detection.removed,
            gossip_targets: gossip.targets,
        }))
    }

    /// Handle one inbound payload.
    ///
    /// Malformed or out-of-state messages are dropped without touching
    /// the table; this never fails.
    pub fn on_message(&mut self, payload: &[u8]) -> Delivery {
        if self.state == ProtocolState::Stopped {
            return Delivery::Dropped(DropReason::Stopped);
        }

        let message = match Message::decode(payload) {
            Ok(m) => m,
            Err(e) => {
                debug!(node = %self.address(), error = %e, bytes = payload.len(), "dropping malformed message");
                return Delivery::Dropped(DropReason::Malformed(e));
            }
        };
        let kind = message.kind();

        match (self.state, message) {
            (ProtocolState::Joining, Message::JoinReply { snapshot }) => {
                let new_members = self.merge_snapshot(&snapshot);
                self.state = ProtocolState::Member;
                self.join_sent_at = None;
                info!(
                    node = %self.address(),
                    members = self.table.len(),
                    heartbeat = self.self_heartbeat(),
                    "joined group"
                );
                Delivery::Applied { kind, new_members }
            }
            (ProtocolState::Member, Message::JoinRequest { sender }) => {
                let new_members = self.accept_join(sender);
                Delivery::Applied { kind, new_members }
            }
            // A late reply to a retried join carries a valid digest.
            (ProtocolState::Member, Message::Gossip { snapshot })
            | (ProtocolState::Member, Message::JoinReply { snapshot }) => {
                let new_members = self.merge_snapshot(&snapshot);
                debug!(node = %self.address(), kind, entries = snapshot.len(), new_members, "merged digest");
                Delivery::Applied { kind, new_members }
            }
            (state, _) => {
                debug!(node = %self.address(), %state, kind, "dropping unexpected message");
                Delivery::Dropped(DropReason::Unexpected { state, kind })
            }
        }
    }

    /// Stop the node: entry points become no-ops and peers are forgotten.
    pub fn shutdown(&mut self) {
        if self.state == ProtocolState::Stopped {
            return;
        }
        self.state = ProtocolState::Stopped;
        self.join_sent_at = None;
        self.table.clear_peers();
        info!(node = %self.address(), round = self.round, "membership engine stopped");
    }

    pub fn address(&self) -> NodeAddress {
        self.table.local_address()
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn self_heartbeat(&self) -> u64 {
        self.table.local_entry().heartbeat
    }

    pub fn config(&self) -> &MembershipConfig {
        &self.config
    }

    pub fn table(&self) -> &MembershipTable {
        &self.table
    }

    /// Every entry currently in the table, local node included.
    pub fn members(&self) -> Vec<MemberEntry> {
        self.table.entries().cloned().collect()
    }

    /// Alive peers, local node excluded.
    pub fn alive_members(&self) -> Vec<NodeAddress> {
        self.table.alive_peers().map(|e| e.address).collect()
    }

    /// Alive entries, local node included.
    pub fn alive_count(&self) -> usize {
        self.table.alive_count()
    }

    fn send_join_request(&mut self) {
        let now = self.clock.now();
        let address = self.address();
        let introducer = self.config.introducer;
        let request = Message::JoinRequest {
            sender: SnapshotEntry::from(self.table.local_entry()),
        };
        self.join_sent_at = Some(now);
        match request.encode() {
            Ok(payload) => {
                self.transport.send(address, introducer, payload);
                info!(node = %address, %introducer, "trying to join");
            }
            Err(e) => warn!(node = %address, error = %e, "failed to encode join request"),
        }
    }

    fn check_join_timeout(&self) -> MembershipResult<TickOutcome> {
        let now = self.clock.now();
        let sent_at = self.join_sent_at.unwrap_or(now);
        let waited = now.saturating_sub(sent_at);
        if waited > self.config.join_timeout.as_secs() {
            warn!(node = %self.address(), introducer = %self.config.introducer, waited, "join timed out");
            return Err(MembershipError::JoinTimeout {
                introducer: self.config.introducer,
                waited_secs: waited,
            });
        }
        Ok(TickOutcome::Joining)
    }

    fn accept_join(&mut self, sender: SnapshotEntry) -> usize {
        let now = self.clock.now();
        let joiner = sender.address();
        let outcome = self.table.admit(joiner, sender.heartbeat, now);
        let new_members = self.note_outcome(joiner, outcome);

        let reply = Message::JoinReply {
            snapshot: self.table.snapshot(),
        };
        match reply.encode() {
            Ok(payload) => {
                self.transport.send(self.address(), joiner, payload);
                debug!(node = %self.address(), %joiner, members = self.table.len(), "sent join reply");
            }
            Err(e) => warn!(node = %self.address(), error = %e, "failed to encode join reply"),
        }
        new_members
    }

    fn merge_snapshot(&mut self, snapshot: &[SnapshotEntry]) -> usize {
        let now = self.clock.now();
        let mut new_members = 0;
        for entry in snapshot {
            let outcome = self.table.merge(entry, now);
            new_members += self.note_outcome(entry.address(), outcome);
        }
        new_members
    }

    /// Log a merge outcome and emit notifications. Returns 1 for a new member.
    fn note_outcome(&self, member: NodeAddress, outcome: MergeOutcome) -> usize {
        let observer = self.address();
        match outcome {
            MergeOutcome::Inserted | MergeOutcome::Rejoined => {
                if outcome == MergeOutcome::Rejoined {
                    info!(%observer, %member, "removed member rejoined");
                }
                if let Some(events) = &self.events {
                    events.member_added(observer, member);
                }
            }
            MergeOutcome::SelfAdvanced => {
                debug!(node = %observer, heartbeat = self.self_heartbeat(), "adopted higher self heartbeat from peer");
            }
            MergeOutcome::StaleTombstone => {
                debug!(%observer, %member, "ignoring stale mention of removed member");
            }
            MergeOutcome::Refreshed | MergeOutcome::Unchanged => {}
        }
        usize::from(outcome.is_new_member())
    }
}

impl std::fmt::Debug for MembershipEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MembershipEngine")
            .field("address", &self.address())
            .field("state", &self.state)
            .field("round", &self.round)
            .field("members", &self.table.len())
            .finish()
    }
}
