//! `pulsed simulate` — run an in-process cluster and print what each node sees.

use std::time::Duration;

use pulse_membership::{MembershipConfig, NodeAddress};
use pulse_sim::{MemberEvent, Simulation, SimulationConfig};
use tracing::info;

/// Options for one simulated run.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    pub nodes: u32,
    pub rounds: u64,
    pub drop_rate: f64,
    /// Node ids crashed halfway through the run.
    pub fail: Vec<u32>,
    pub seed: u64,
    pub t_fail: Duration,
    pub t_remove: Duration,
    pub fanout: usize,
}

/// Outcome of a simulated run.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulateSummary {
    pub converged_at: Option<u64>,
    pub converged: bool,
    pub added: usize,
    pub removed: usize,
    pub sent: u64,
    pub dropped: u64,
}

pub fn run_simulation(opts: &SimulateOptions) -> anyhow::Result<SimulateSummary> {
    if opts.nodes == 0 {
        anyhow::bail!("--nodes must be at least 1");
    }
    if !(0.0..=1.0).contains(&opts.drop_rate) {
        anyhow::bail!("--drop-rate must be within [0, 1], got {}", opts.drop_rate);
    }
    if let Some(id) = opts.fail.iter().find(|id| **id == 0 || **id > opts.nodes) {
        anyhow::bail!("--fail {id} is not a node id in 1..={}", opts.nodes);
    }

    let config = SimulationConfig {
        nodes: opts.nodes,
        membership: MembershipConfig::new(NodeAddress::new(1, 0))
            .with_timeouts(opts.t_fail, opts.t_remove)
            .with_fanout(opts.fanout),
        drop_rate: opts.drop_rate,
        seed: opts.seed,
        ..SimulationConfig::default()
    };
    config.membership.validate()?;

    let mut sim = Simulation::new(config)?;
    let fail_at = opts.rounds / 2;
    let mut converged_at = None;

    for step in 0..opts.rounds {
        if step == fail_at {
            for id in &opts.fail {
                sim.fail_node(NodeAddress::new(*id, 0));
            }
        }
        sim.step()?;
        if converged_at.is_none() && sim.converged() {
            converged_at = Some(sim.steps());
            info!(step = sim.steps(), "cluster converged");
        }
    }

    let events = sim.events().snapshot();
    let stats = sim.network().total_stats();
    let summary = SimulateSummary {
        converged_at,
        converged: sim.converged(),
        added: events
            .iter()
            .filter(|e| matches!(e, MemberEvent::Added { .. }))
            .count(),
        removed: events
            .iter()
            .filter(|e| matches!(e, MemberEvent::Removed { .. }))
            .count(),
        sent: stats.sent,
        dropped: stats.dropped,
    };

    print_report(&sim, &summary);
    Ok(summary)
}

fn print_report(sim: &Simulation, summary: &SimulateSummary) {
    println!(
        "{:<12} {:<10} {:>10} {:>6} {:>8}",
        "NODE", "STATE", "HEARTBEAT", "ALIVE", "MEMBERS"
    );
    for address in sim.live_nodes() {
        if let Some(node) = sim.node(address) {
            println!(
                "{:<12} {:<10} {:>10} {:>6} {:>8}",
                address.to_string(),
                node.state().to_string(),
                node.self_heartbeat(),
                node.alive_count(),
                node.members().len()
            );
        }
    }
    println!();
    match summary.converged_at {
        Some(step) => println!("first converged after {step} rounds"),
        None => println!("never converged"),
    }
    println!(
        "converged at end: {}  joins: {}  removals: {}  messages: {} sent, {} dropped",
        summary.converged, summary.added, summary.removed, summary.sent, summary.dropped
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> SimulateOptions {
        SimulateOptions {
            nodes: 5,
            rounds: 40,
            drop_rate: 0.0,
            fail: Vec::new(),
            seed: 7,
            t_fail: Duration::from_secs(5),
            t_remove: Duration::from_secs(10),
            fanout: 3,
        }
    }

    #[test]
    fn healthy_cluster_converges() {
        let summary = run_simulation(&opts()).unwrap();
        assert!(summary.converged);
        assert!(summary.converged_at.is_some());
        assert_eq!(summary.added, 20);
        assert_eq!(summary.removed, 0);
        assert_eq!(summary.dropped, 0);
    }

    #[test]
    fn failed_node_is_removed_by_survivors() {
        let summary = run_simulation(&SimulateOptions {
            fail: vec![3],
            ..opts()
        })
        .unwrap();
        assert!(summary.converged);
        assert_eq!(summary.removed, 4);
    }

    #[test]
    fn bad_options_rejected() {
        assert!(
            run_simulation(&SimulateOptions {
                nodes: 0,
                ..opts()
            })
            .is_err()
        );
        assert!(
            run_simulation(&SimulateOptions {
                drop_rate: 1.5,
                ..opts()
            })
            .is_err()
        );
        assert!(
            run_simulation(&SimulateOptions {
                fail: vec![9],
                ..opts()
            })
            .is_err()
        );
        assert!(
            run_simulation(&SimulateOptions {
                t_remove: Duration::from_secs(5),
                ..opts()
            })
            .is_err()
        );
    }
}
