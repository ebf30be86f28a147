//! Cluster-level behavior of the membership protocol.
//!
//! Every scenario runs in-process on the emulated network with a manual
//! clock and fixed seeds, so results are reproducible.

use std::time::Duration;

use pulse_membership::{MemberState, MembershipConfig, NodeAddress, ProtocolState};
use pulse_sim::{MemberEvent, Simulation, SimulationConfig};

const INTRODUCER: NodeAddress = NodeAddress::new(1, 0);

fn addr(id: u32) -> NodeAddress {
    NodeAddress::new(id, 0)
}

fn sim_config(nodes: u32, drop_rate: f64, t_fail: u64, t_remove: u64) -> SimulationConfig {
    SimulationConfig {
        nodes,
        membership: MembershipConfig::new(INTRODUCER)
            .with_timeouts(Duration::from_secs(t_fail), Duration::from_secs(t_remove))
            .with_fanout(3)
            .with_join_timeout(Duration::from_secs(3)),
        drop_rate,
        seed: 0x5eed,
        start_time: 1_000,
    }
}

// ── Formation ──────────────────────────────────────────────────

#[test]
fn introducer_alone_stays_member() {
    let mut sim = Simulation::new(sim_config(1, 0.0, 5, 10)).unwrap();
    sim.run(50).unwrap();

    let intro = sim.node(INTRODUCER).unwrap();
    assert_eq!(intro.state(), ProtocolState::Member);
    assert_eq!(intro.members().len(), 1);
    assert!(intro.self_heartbeat() >= 50);
    assert_eq!(sim.network().total_stats().sent, 0);
}

#[test]
fn lossless_cluster_converges() {
    let mut sim = Simulation::new(sim_config(10, 0.0, 5, 10)).unwrap();
    let rounds = sim.run_until_converged(20).unwrap();
    assert!(rounds.is_some(), "did not converge in 20 rounds");

    for id in 1..=10 {
        let node = sim.node(addr(id)).unwrap();
        assert_eq!(node.members().len(), 10);
        assert_eq!(node.alive_count(), 10);
    }
}

#[test]
fn lossy_cluster_converges() {
    let mut sim = Simulation::new(sim_config(12, 0.1, 5, 10)).unwrap();
    let rounds = sim.run_until_converged(80).unwrap();
    assert!(rounds.is_some(), "did not converge under 10% loss");
    assert!(sim.network().total_stats().dropped > 0);
}

#[test]
fn every_join_is_reported() {
    let mut sim = Simulation::new(sim_config(4, 0.0, 5, 10)).unwrap();
    sim.run_until_converged(20).unwrap();

    let added = sim
        .events()
        .snapshot()
        .into_iter()
        .filter(|e| matches!(e, MemberEvent::Added { .. }))
        .count();
    // Each of 4 observers learns about 3 others exactly once.
    assert_eq!(added, 12);
}

// ── Failure detection ──────────────────────────────────────────

#[test]
fn failed_node_is_purged_everywhere() {
    let mut sim = Simulation::new(sim_config(8, 0.0, 5, 10)).unwrap();
    assert!(sim.run_until_converged(20).unwrap().is_some());

    let victim = addr(5);
    sim.fail_node(victim);
    sim.run(20).unwrap();

    let live: Vec<NodeAddress> = sim.live_nodes().collect();
    assert_eq!(live.len(), 7);
    for observer in &live {
        let node = sim.node(*observer).unwrap();
        assert!(node.table().lookup(&victim).is_none(), "{observer} still has {victim}");
    }
    assert_eq!(sim.events().removed_by(victim).len(), 7);
    assert!(sim.converged());
}

#[test]
fn failed_node_is_suspect_before_purge() {
    let mut sim = Simulation::new(sim_config(8, 0.0, 10, 30)).unwrap();
    assert!(sim.run_until_converged(20).unwrap().is_some());

    let victim = addr(3);
    sim.fail_node(victim);
    sim.run(16).unwrap();

    for observer in sim.live_nodes() {
        let node = sim.node(observer).unwrap();
        let entry = node.table().lookup(&victim).expect("suspect entry retained");
        assert_eq!(entry.state, MemberState::Suspect);
        assert!(!node.alive_members().contains(&victim));
        assert_eq!(node.alive_count(), 7);
    }
}

#[test]
fn suspects_receive_no_gossip() {
    let mut sim = Simulation::new(sim_config(6, 0.0, 10, 30)).unwrap();
    assert!(sim.run_until_converged(20).unwrap().is_some());

    let victim = addr(6);
    sim.fail_node(victim);
    sim.run(16).unwrap();

    let dropped_before = sim.network().stats(victim).dropped;
    let reports = sim.step().unwrap();
    for (_, report) in &reports {
        assert!(!report.gossip_targets.contains(&victim));
    }
    assert_eq!(sim.network().stats(victim).dropped, dropped_before);
}

#[test]
fn introducer_failure_does_not_stop_gossip() {
    let mut sim = Simulation::new(sim_config(6, 0.0, 5, 10)).unwrap();
    assert!(sim.run_until_converged(20).unwrap().is_some());

    sim.fail_node(INTRODUCER);
    sim.run(20).unwrap();
    assert!(sim.converged());
    for observer in sim.live_nodes() {
        assert_eq!(sim.node(observer).unwrap().alive_count(), 5);
    }
}

#[test]
fn restarted_node_rejoins() {
    let mut sim = Simulation::new(sim_config(6, 0.0, 5, 10)).unwrap();
    assert!(sim.run_until_converged(20).unwrap().is_some());

    let victim = addr(4);
    sim.fail_node(victim);
    sim.run(15).unwrap();
    assert!(
        sim.live_nodes()
            .all(|o| sim.node(o).unwrap().table().lookup(&victim).is_none())
    );

    sim.restart_node(victim).unwrap();
    let rounds = sim.run_until_converged(40).unwrap();
    assert!(rounds.is_some(), "restarted node never rejoined");
    assert_eq!(sim.node(victim).unwrap().alive_count(), 6);
}

// ── Per-round bounds ───────────────────────────────────────────

#[test]
fn fanout_never_exceeds_bound() {
    let mut sim = Simulation::new(sim_config(15, 0.05, 5, 10)).unwrap();
    for _ in 0..40 {
        for (address, report) in sim.step().unwrap() {
            let node = sim.node(address).unwrap();
            assert!(report.gossip_targets.len() <= 3);
            assert!(report.gossip_targets.len() <= node.alive_count().saturating_sub(1));
            assert!(!report.gossip_targets.contains(&address));
        }
    }
}

#[test]
fn heartbeats_only_grow() {
    let mut sim = Simulation::new(sim_config(6, 0.2, 5, 10)).unwrap();
    let mut last_seen = std::collections::HashMap::new();

    for _ in 0..40 {
        sim.step().unwrap();
        for observer in sim.live_nodes().collect::<Vec<_>>() {
            for entry in sim.node(observer).unwrap().members() {
                let key = (observer, entry.address);
                let prev = last_seen.insert(key, entry.heartbeat).unwrap_or(0);
                assert!(entry.heartbeat >= prev, "{key:?} went from {prev} to {}", entry.heartbeat);
            }
        }
    }
}

#[test]
fn no_node_purges_itself() {
    let mut sim = Simulation::new(sim_config(3, 1.0, 5, 10)).unwrap();
    sim.run(60).unwrap();

    for id in 1..=3 {
        let node = sim.node(addr(id)).unwrap();
        assert!(node.table().lookup(&addr(id)).is_some());
    }
    // With every message lost, joiners never leave the joining state.
    assert_eq!(sim.node(addr(2)).unwrap().state(), ProtocolState::Joining);
    assert_eq!(sim.node(INTRODUCER).unwrap().state(), ProtocolState::Member);
}
