//! pulse.toml configuration parser.
//!
//! Every section is optional; missing values fall back to the library
//! defaults. Durations are written as strings ("5s", "500ms").

use std::net::SocketAddrV4;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use pulse_membership::{MembershipConfig, NodeAddress, parse_duration};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PulseConfig {
    pub node: NodeSection,
    pub membership: MembershipSection,
    pub join: JoinSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeSection {
    /// UDP address to listen on.
    pub bind: String,
    /// Address other nodes know this node by. Defaults to the bound address.
    pub advertise: Option<String>,
    /// Introducer address. Unset means this node is the introducer.
    pub introducer: Option<String>,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7946".to_string(),
            advertise: None,
            introducer: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MembershipSection {
    pub t_fail: String,
    pub t_remove: String,
    pub fanout: usize,
    pub initial_heartbeat: u64,
    pub round_interval: String,
    pub gossip_every_rounds: u64,
    pub join_timeout: String,
    pub rejoin_window: Option<String>,
}

impl Default for MembershipSection {
    fn default() -> Self {
        Self {
            t_fail: "5s".to_string(),
            t_remove: "10s".to_string(),
            fanout: 3,
            initial_heartbeat: 0,
            round_interval: "1s".to_string(),
            gossip_every_rounds: 1,
            join_timeout: "5s".to_string(),
            rejoin_window: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JoinSection {
    /// Join requests sent before giving up (the first one included).
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per attempt.
    pub backoff: String,
    pub max_backoff: String,
}

impl Default for JoinSection {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: "1s".to_string(),
            max_backoff: "30s".to_string(),
        }
    }
}

/// Typed join retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub max_backoff: Duration,
}

/// Everything a node needs to bind and run.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub bind: SocketAddrV4,
    pub advertise: Option<NodeAddress>,
    /// `None` makes this node the introducer.
    pub introducer: Option<NodeAddress>,
    pub membership: MembershipConfig,
    pub join: JoinPolicy,
}

impl PulseConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: PulseConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Resolve strings into typed settings and validate them.
    pub fn settings(&self) -> anyhow::Result<NodeSettings> {
        let bind: SocketAddrV4 = self
            .node
            .bind
            .parse()
            .with_context(|| format!("invalid bind address {:?}", self.node.bind))?;
        let advertise = parse_address(self.node.advertise.as_deref(), "advertise")?;
        let introducer = parse_address(self.node.introducer.as_deref(), "introducer")?;

        let m = &self.membership;
        let mut membership = MembershipConfig::default()
            .with_timeouts(parse_duration(&m.t_fail)?, parse_duration(&m.t_remove)?)
            .with_fanout(m.fanout)
            .with_initial_heartbeat(m.initial_heartbeat)
            .with_round_interval(parse_duration(&m.round_interval)?)
            .with_gossip_every_rounds(m.gossip_every_rounds)
            .with_join_timeout(parse_duration(&m.join_timeout)?);
        if let Some(window) = &m.rejoin_window {
            membership = membership.with_rejoin_window(parse_duration(window)?);
        }
        if let Some(introducer) = introducer {
            membership.introducer = introducer;
        }
        membership.validate()?;

        if self.join.max_attempts == 0 {
            anyhow::bail!("join.max_attempts must be at least 1");
        }
        let join = JoinPolicy {
            max_attempts: self.join.max_attempts,
            backoff: parse_duration(&self.join.backoff)?,
            max_backoff: parse_duration(&self.join.max_backoff)?,
        };

        Ok(NodeSettings {
            bind,
            advertise,
            introducer,
            membership,
            join,
        })
    }
}

fn parse_address(value: Option<&str>, field: &str) -> anyhow::Result<Option<NodeAddress>> {
    value
        .map(|s| {
            s.parse::<NodeAddress>()
                .with_context(|| format!("invalid {field} address {s:?}"))
        })
        .transpose()
}
