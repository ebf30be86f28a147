//! Drives one membership engine over UDP.
//!
//! A single task owns the engine and `select!`s over the round timer,
//! inbound datagrams, and the shutdown signal, so `on_tick` and
//! `on_message` never run concurrently.

use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use pulse_membership::{
    MemberEntry, MembershipEngine, MembershipError, NodeAddress, ProtocolState, SystemClock,
    TickOutcome, TracingEvents, Transport,
};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{JoinPolicy, NodeSettings};

/// Largest UDP payload over IPv4, in either direction.
const MAX_DATAGRAM: usize = 65_507;

/// Fire-and-forget UDP sends. Failures are logged and otherwise ignored.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self { socket }
    }
}

impl Transport for UdpTransport {
    fn send(&self, from: NodeAddress, to: NodeAddress, payload: Vec<u8>) {
        if payload.len() > MAX_DATAGRAM {
            warn!(
                %from,
                %to,
                bytes = payload.len(),
                limit = MAX_DATAGRAM,
                "message exceeds datagram limit, not sent"
            );
            return;
        }
        let target = SocketAddr::V4(to.socket_addr());
        if let Err(e) = self.socket.try_send_to(&payload, target) {
            debug!(%from, %to, error = %e, "udp send failed");
        }
    }
}

/// Exponential backoff between join attempts.
#[derive(Debug)]
pub struct JoinBackoff {
    attempts: u32,
    max_attempts: u32,
    current: Duration,
    max: Duration,
    retry_at: Option<Instant>,
}

impl JoinBackoff {
    pub fn new(policy: JoinPolicy) -> Self {
        Self {
            // The initial request counts as the first attempt.
            attempts: 1,
            max_attempts: policy.max_attempts,
            current: policy.backoff,
            max: policy.max_backoff,
            retry_at: None,
        }
    }

    /// Record a join timeout. Returns false once attempts are exhausted.
    pub fn on_timeout(&mut self, now: Instant) -> bool {
        if self.retry_at.is_some() {
            return true;
        }
        if self.attempts >= self.max_attempts {
            return false;
        }
        self.retry_at = Some(now + self.current);
        self.current = (self.current * 2).min(self.max);
        true
    }

    /// Whether a scheduled retry is due. Consumes the schedule when it is.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.retry_at {
            Some(at) if now >= at => {
                self.retry_at = None;
                self.attempts += 1;
                true
            }
            _ => false,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Final view of a node, captured just before it stops.
#[derive(Debug, Clone)]
pub struct NodeSummary {
    pub address: NodeAddress,
    pub state: ProtocolState,
    pub heartbeat: u64,
    pub rounds: u64,
    pub members: Vec<MemberEntry>,
}

/// A bound, not yet running node.
pub struct Node {
    socket: Arc<UdpSocket>,
    engine: MembershipEngine,
    round_interval: Duration,
    join: JoinPolicy,
}

impl Node {
    /// Bind the UDP socket and build the engine.
    ///
    /// The node's identity is the advertised address, or the bound one.
    /// Without a configured introducer, the node introduces itself.
    pub async fn bind(settings: NodeSettings) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::V4(settings.bind))
            .await
            .with_context(|| format!("binding {}", settings.bind))?;
        let local = match socket.local_addr()? {
            SocketAddr::V4(v4) => v4,
            other => anyhow::bail!("expected an IPv4 socket, got {other}"),
        };
        let address = settings
            .advertise
            .unwrap_or_else(|| NodeAddress::from(resolve_unspecified(local)));

        let mut membership = settings.membership;
        membership.introducer = settings.introducer.unwrap_or(address);
        let round_interval = membership.round_interval;

        let socket = Arc::new(socket);
        let engine = MembershipEngine::new(
            address,
            membership,
            UdpTransport::new(socket.clone()),
            SystemClock,
        )?
        .with_events(Arc::new(TracingEvents));

        info!(%address, bind = %local, introducer = %engine.config().introducer, "node bound");
        Ok(Self {
            socket,
            engine,
            round_interval,
            join: settings.join,
        })
    }

    pub fn address(&self) -> NodeAddress {
        self.engine.address()
    }

    /// Run until `shutdown` flips or joining fails for good.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<NodeSummary> {
        let address = self.address();
        let mut backoff = JoinBackoff::new(self.join);
        let mut interval = tokio::time::interval(self.round_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let socket = self.socket.clone();

        // Engine sends are non-blocking; the first one is lost unless the
        // socket has been registered as writable.
        socket
            .writable()
            .await
            .context("waiting for socket to become writable")?;
        self.engine.start()?;
        info!(%address, state = %self.engine.state(), interval = ?self.round_interval, "node loop started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.handle_tick(&mut backoff)?;
                }
                recv = socket.recv_from(&mut buf) => match recv {
                    Ok((len, src)) => {
                        let delivery = self.engine.on_message(&buf[..len]);
                        debug!(%address, %src, ?delivery, "datagram handled");
                    }
                    Err(e) => warn!(%address, error = %e, "udp receive failed"),
                },
                _ = shutdown.changed() => {
                    info!(%address, "node loop shutting down");
                    break;
                }
            }
        }

        let summary = NodeSummary {
            address,
            state: self.engine.state(),
            heartbeat: self.engine.self_heartbeat(),
            rounds: self.engine.round(),
            members: self.engine.members(),
        };
        self.engine.shutdown();
        Ok(summary)
    }

    fn handle_tick(&mut self, backoff: &mut JoinBackoff) -> anyhow::Result<()> {
        let now = Instant::now();
        if backoff.take_due(now) {
            info!(node = %self.address(), attempt = backoff.attempts(), "retrying join");
            self.engine.retry_join()?;
            return Ok(());
        }

        match self.engine.on_tick() {
            Ok(TickOutcome::Round(report)) => {
                debug!(
                    node = %self.address(),
                    round = report.round,
                    heartbeat = report.heartbeat,
                    fanout = report.gossip_targets.len(),
                    alive = self.engine.alive_count(),
                    "round complete"
                );
                Ok(())
            }
            Ok(TickOutcome::Joining) | Ok(TickOutcome::Stopped) => Ok(()),
            Err(e @ MembershipError::JoinTimeout { .. }) => {
                if backoff.on_timeout(now) {
                    Ok(())
                } else {
                    Err(anyhow::Error::new(e).context(format!(
                        "giving up after {} join attempts",
                        backoff.attempts()
                    )))
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// An unspecified bind IP can't identify a node; fall back to loopback.
fn resolve_unspecified(addr: SocketAddrV4) -> SocketAddrV4 {
    if addr.ip().is_unspecified() {
        SocketAddrV4::new(std::net::Ipv4Addr::LOCALHOST, addr.port())
    } else {
        addr
    }
}
