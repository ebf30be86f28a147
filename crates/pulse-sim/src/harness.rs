//! Multi-node round driver.
//!
//! Runs N membership engines on one [`EmulatedNetwork`] and one shared
//! [`ManualClock`]. Each step delivers pending messages to every live
//! node, ticks every live node, then advances the clock by one round.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use pulse_membership::{
    EventSink, ManualClock, MembershipConfig, MembershipEngine, MembershipError,
    MembershipEvents, MembershipResult, NodeAddress, ProtocolState, RoundReport, TickOutcome,
    Timestamp,
};
use tracing::{debug, info};

use crate::network::EmulatedNetwork;

/// A membership change as seen by one observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberEvent {
    Added {
        observer: NodeAddress,
        member: NodeAddress,
    },
    Removed {
        observer: NodeAddress,
        member: NodeAddress,
    },
}

/// Event sink that keeps everything in memory.
#[derive(Debug, Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<MemberEvent>>,
}

impl RecordingEvents {
    pub fn snapshot(&self) -> Vec<MemberEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Observers that reported `member` as removed.
    pub fn removed_by(&self, member: NodeAddress) -> BTreeSet<NodeAddress> {
        self.snapshot()
            .into_iter()
            .filter_map(|e| match e {
                MemberEvent::Removed { observer, member: m } if m == member => Some(observer),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: MemberEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl MembershipEvents for RecordingEvents {
    fn member_added(&self, observer: NodeAddress, member: NodeAddress) {
        self.push(MemberEvent::Added { observer, member });
    }

    fn member_removed(&self, observer: NodeAddress, member: NodeAddress) {
        self.push(MemberEvent::Removed { observer, member });
    }
}

/// Parameters for a simulated cluster.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Number of nodes; node ids run 1..=nodes and node 1 is the introducer.
    pub nodes: u32,
    pub membership: MembershipConfig,
    /// Probability that any single message is lost.
    pub drop_rate: f64,
    /// Seed for message loss and every node's peer selection.
    pub seed: u64,
    /// Clock value at the first step.
    pub start_time: Timestamp,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            nodes: 10,
            membership: MembershipConfig::new(NodeAddress::new(1, 0)),
            drop_rate: 0.0,
            seed: 0,
            start_time: 1_000,
        }
    }
}

struct SimNode {
    engine: MembershipEngine,
    failed: bool,
}

/// A simulated cluster.
pub struct Simulation {
    config: SimulationConfig,
    clock: ManualClock,
    network: EmulatedNetwork,
    events: Arc<RecordingEvents>,
    nodes: BTreeMap<NodeAddress, SimNode>,
    step: u64,
}

impl Simulation {
    /// Build every node and run its bootstrap step, introducer first.
    pub fn new(config: SimulationConfig) -> MembershipResult<Self> {
        let clock = ManualClock::new(config.start_time);
        let network = EmulatedNetwork::new(config.drop_rate, config.seed);
        let events = Arc::new(RecordingEvents::default());

        let mut sim = Self {
            config,
            clock,
            network,
            events,
            nodes: BTreeMap::new(),
            step: 0,
        };
        for id in 1..=sim.config.nodes {
            let address = NodeAddress::new(id, 0);
            let engine = sim.build_engine(address)?;
            sim.nodes.insert(
                address,
                SimNode {
                    engine,
                    failed: false,
                },
            );
        }
        for node in sim.nodes.values_mut() {
            node.engine.start()?;
        }
        info!(nodes = sim.nodes.len(), drop_rate = sim.config.drop_rate, "simulation started");
        Ok(sim)
    }

    /// One round for the whole cluster. Returns the reports of nodes that ran a full round.
    pub fn step(&mut self) -> MembershipResult<Vec<(NodeAddress, RoundReport)>> {
        for (address, node) in self.nodes.iter_mut().filter(|(_, n)| !n.failed) {
            for payload in self.network.drain(*address) {
                node.engine.on_message(&payload);
            }
        }

        let mut reports = Vec::new();
        for (address, node) in self.nodes.iter_mut().filter(|(_, n)| !n.failed) {
            match node.engine.on_tick() {
                Ok(TickOutcome::Round(report)) => reports.push((*address, report)),
                Ok(_) => {}
                Err(MembershipError::JoinTimeout { waited_secs, .. }) => {
                    debug!(node = %address, waited_secs, "join timed out, retrying");
                    node.engine.retry_join()?;
                }
                Err(e) => return Err(e),
            }
        }

        self.clock.advance(self.round_step());
        self.step += 1;
        Ok(reports)
    }

    /// Run `rounds` steps.
    pub fn run(&mut self, rounds: u64) -> MembershipResult<()> {
        for _ in 0..rounds {
            self.step()?;
        }
        Ok(())
    }

    /// Run until every live node agrees, or give up after `max_rounds`.
    /// Returns the number of steps taken when convergence was reached.
    pub fn run_until_converged(&mut self, max_rounds: u64) -> MembershipResult<Option<u64>> {
        for taken in 0..max_rounds {
            if self.converged() {
                return Ok(Some(taken));
            }
            self.step()?;
        }
        Ok(self.converged().then_some(max_rounds))
    }

    /// Crash a node: it stops ticking and receiving.
    pub fn fail_node(&mut self, address: NodeAddress) {
        if let Some(node) = self.nodes.get_mut(&address) {
            node.failed = true;
            node.engine.shutdown();
            self.network.detach(address);
            info!(node = %address, step = self.step, "node failed");
        }
    }

    /// Bring a failed node back with a fresh engine that joins again.
    pub fn restart_node(&mut self, address: NodeAddress) -> MembershipResult<()> {
        let mut engine = self.build_engine(address)?;
        self.network.attach(address);
        engine.start()?;
        self.nodes.insert(
            address,
            SimNode {
                engine,
                failed: false,
            },
        );
        info!(node = %address, step = self.step, "node restarted");
        Ok(())
    }

    /// Every live node is a member and sees exactly the other live nodes alive.
    pub fn converged(&self) -> bool {
        let live: BTreeSet<NodeAddress> = self.live_nodes().collect();
        self.nodes.values().filter(|n| !n.failed).all(|n| {
            let mut expected = live.clone();
            expected.remove(&n.engine.address());
            let seen: BTreeSet<NodeAddress> = n.engine.alive_members().into_iter().collect();
            n.engine.state() == ProtocolState::Member && seen == expected
        })
    }

    pub fn live_nodes(&self) -> impl Iterator<Item = NodeAddress> + '_ {
        self.nodes
            .iter()
            .filter(|(_, n)| !n.failed)
            .map(|(a, _)| *a)
    }

    pub fn node(&self, address: NodeAddress) -> Option<&MembershipEngine> {
        self.nodes.get(&address).map(|n| &n.engine)
    }

    pub fn network(&self) -> &EmulatedNetwork {
        &self.network
    }

    pub fn events(&self) -> &RecordingEvents {
        &self.events
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    pub fn steps(&self) -> u64 {
        self.step
    }

    /// Simulated time moves in whole seconds; sub-second rounds count as one.
    fn round_step(&self) -> Duration {
        self.config
            .membership
            .round_interval
            .max(Duration::from_secs(1))
    }

    fn build_engine(&self, address: NodeAddress) -> MembershipResult<MembershipEngine> {
        let sink: EventSink = self.events.clone();
        Ok(MembershipEngine::new(
            address,
            self.config.membership.clone(),
            self.network.clone(),
            self.clock.clone(),
        )?
        .with_events(sink)
        .with_rng_seed(self.config.seed ^ u64::from(address.id)))
    }
}
