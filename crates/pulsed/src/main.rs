//! pulsed — the Pulse membership daemon.
//!
//! Runs one gossip membership node over UDP, or a whole simulated
//! cluster in-process.
//!
//! # Usage
//!
//! ```text
//! pulsed run --config pulse.toml
//! pulsed run --bind 127.0.0.1:7001 --introducer 127.0.0.1:7000
//! pulsed simulate --nodes 10 --rounds 60 --drop-rate 0.1 --fail 4
//! ```

mod config;
mod node;
mod simulate;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use pulse_membership::parse_duration;
use tokio::sync::watch;
use tracing::info;

use crate::config::PulseConfig;
use crate::node::Node;
use crate::simulate::{SimulateOptions, run_simulation};

#[derive(Parser)]
#[command(name = "pulsed", about = "Pulse gossip membership daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a membership node.
    Run {
        /// Path to pulse.toml.
        #[arg(long)]
        config: Option<PathBuf>,

        /// UDP address to bind (overrides the config file).
        #[arg(long)]
        bind: Option<String>,

        /// Introducer address. Omit to act as the introducer.
        #[arg(long)]
        introducer: Option<String>,

        /// Address advertised to peers.
        #[arg(long)]
        advertise: Option<String>,
    },
    /// Simulate a cluster in-process and print the final views.
    Simulate {
        #[arg(long, default_value = "10")]
        nodes: u32,

        #[arg(long, default_value = "60")]
        rounds: u64,

        /// Probability that any message is lost.
        #[arg(long, default_value = "0.0")]
        drop_rate: f64,

        /// Node ids to crash halfway through.
        #[arg(long)]
        fail: Vec<u32>,

        #[arg(long, default_value = "0")]
        seed: u64,

        #[arg(long, default_value = "5s")]
        t_fail: String,

        #[arg(long, default_value = "10s")]
        t_remove: String,

        #[arg(long, default_value = "3")]
        fanout: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Command::Run {
            config,
            bind,
            introducer,
            advertise,
        } => {
            let mut file = match config {
                Some(path) => PulseConfig::from_file(&path)?,
                None => PulseConfig::default(),
            };
            if let Some(bind) = bind {
                file.node.bind = bind;
            }
            if introducer.is_some() {
                file.node.introducer = introducer;
            }
            if advertise.is_some() {
                file.node.advertise = advertise;
            }
            run_node(file).await
        }
        Command::Simulate {
            nodes,
            rounds,
            drop_rate,
            fail,
            seed,
            t_fail,
            t_remove,
            fanout,
        } => {
            let opts = SimulateOptions {
                nodes,
                rounds,
                drop_rate,
                fail,
                seed,
                t_fail: parse_duration(&t_fail).context("--t-fail")?,
                t_remove: parse_duration(&t_remove).context("--t-remove")?,
                fanout,
            };
            run_simulation(&opts)?;
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("info,pulsed=debug,pulse_membership=debug,pulse_sim=debug")
    });
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run_node(config: PulseConfig) -> anyhow::Result<()> {
    let settings = config.settings()?;
    let node = Node::bind(settings).await?;
    info!(address = %node.address(), "pulse node starting");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
        }
        let _ = shutdown_tx.send(true);
    });

    let summary = node.run(shutdown_rx).await?;
    info!(
        address = %summary.address,
        state = %summary.state,
        heartbeat = summary.heartbeat,
        rounds = summary.rounds,
        members = summary.members.len(),
        "pulse node stopped"
    );
    for member in &summary.members {
        info!(
            member = %member.address,
            heartbeat = member.heartbeat,
            last_update = member.last_update,
            state = ?member.state,
            "final view"
        );
    }
    Ok(())
}
