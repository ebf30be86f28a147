//! Protocol tuning knobs.
//!
//! Every timeout and count the engine uses comes from here; nothing is
//! hard-coded inside the protocol modules.

use std::time::Duration;

use crate::error::ConfigError;
use crate::message::MAX_WIRE_VALUE;
use crate::types::NodeAddress;

/// Configuration for a single membership engine.
#[derive(Debug, Clone, PartialEq)]
pub struct MembershipConfig {
    /// Well-known bootstrap node.
    pub introducer: NodeAddress,
    /// Staleness after which an entry becomes suspect.
    pub t_fail: Duration,
    /// Staleness after which an entry is purged.
    pub t_remove: Duration,
    /// Peers contacted per gossip round.
    pub fanout: usize,
    /// Heartbeat value the self entry starts from.
    pub initial_heartbeat: u64,
    /// Expected period between ticks (used for validation and by runtimes).
    pub round_interval: Duration,
    /// Push gossip every N rounds.
    pub gossip_every_rounds: u64,
    /// How long a joining node waits for a reply before surfacing a timeout.
    pub join_timeout: Duration,
    /// How long purged ids are remembered as tombstones. Defaults to `t_remove`.
    pub rejoin_window: Option<Duration>,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            introducer: NodeAddress::new(1, 0),
            t_fail: Duration::from_secs(5),
            t_remove: Duration::from_secs(10),
            fanout: 3,
            initial_heartbeat: 0,
            round_interval: Duration::from_secs(1),
            gossip_every_rounds: 1,
            join_timeout: Duration::from_secs(5),
            rejoin_window: None,
        }
    }
}

impl MembershipConfig {
    /// Create a config with defaults and the given introducer.
    pub fn new(introducer: NodeAddress) -> Self {
        Self {
            introducer,
            ..Self::default()
        }
    }

    /// Set the suspect and removal timeouts.
    pub fn with_timeouts(mut self, t_fail: Duration, t_remove: Duration) -> Self {
        self.t_fail = t_fail;
        self.t_remove = t_remove;
        self
    }

    pub fn with_fanout(mut self, fanout: usize) -> Self {
        self.fanout = fanout;
        self
    }

    pub fn with_initial_heartbeat(mut self, heartbeat: u64) -> Self {
        self.initial_heartbeat = heartbeat;
        self
    }

    pub fn with_round_interval(mut self, interval: Duration) -> Self {
        self.round_interval = interval;
        self
    }

    pub fn with_gossip_every_rounds(mut self, rounds: u64) -> Self {
        self.gossip_every_rounds = rounds;
        self
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub fn with_rejoin_window(mut self, window: Duration) -> Self {
        self.rejoin_window = Some(window);
        self
    }

    /// Effective tombstone lifetime.
    pub fn rejoin_window(&self) -> Duration {
        self.rejoin_window.unwrap_or(self.t_remove)
    }

    /// Check the relationships between timeouts and counts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.t_fail < Duration::from_secs(1) {
            return Err(ConfigError::FailTimeoutTooShort(self.t_fail));
        }
        if self.round_interval.is_zero() {
            return Err(ConfigError::Zero("round_interval"));
        }
        if self.t_remove < self.t_fail + self.round_interval {
            return Err(ConfigError::RemoveTimeoutTooShort {
                t_fail: self.t_fail,
                t_remove: self.t_remove,
                round: self.round_interval,
            });
        }
        if self.fanout == 0 {
            return Err(ConfigError::Zero("fanout"));
        }
        if self.gossip_every_rounds == 0 {
            return Err(ConfigError::Zero("gossip_every_rounds"));
        }
        if self.join_timeout.is_zero() {
            return Err(ConfigError::Zero("join_timeout"));
        }
        if self.initial_heartbeat > MAX_WIRE_VALUE {
            return Err(ConfigError::HeartbeatOutOfRange(self.initial_heartbeat));
        }
        Ok(())
    }
}

/// Parse a duration string like "5s", "500ms", "1m" or a bare number of seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let parsed = if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().and_then(|m| m.checked_mul(60)).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    };
    parsed.ok_or_else(|| ConfigError::Duration(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(MembershipConfig::default().validate().is_ok());
    }

    #[test]
    fn remove_must_trail_fail_by_a_round() {
        let config = MembershipConfig::default()
            .with_timeouts(Duration::from_secs(10), Duration::from_secs(10));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RemoveTimeoutTooShort { .. })
        ));

        let config = config.with_timeouts(Duration::from_secs(10), Duration::from_secs(11));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn sub_second_fail_timeout_rejected() {
        let config = MembershipConfig::default()
            .with_timeouts(Duration::from_millis(500), Duration::from_secs(5));
        assert_eq!(
            config.validate(),
            Err(ConfigError::FailTimeoutTooShort(Duration::from_millis(500)))
        );
    }

    #[test]
    fn zero_counts_rejected() {
        let config = MembershipConfig::default().with_fanout(0);
        assert_eq!(config.validate(), Err(ConfigError::Zero("fanout")));

        let config = MembershipConfig::default().with_gossip_every_rounds(0);
        assert_eq!(config.validate(), Err(ConfigError::Zero("gossip_every_rounds")));
    }

    #[test]
    fn oversized_initial_heartbeat_rejected() {
        let config = MembershipConfig::default().with_initial_heartbeat(u64::MAX);
        assert_eq!(
            config.validate(),
            Err(ConfigError::HeartbeatOutOfRange(u64::MAX))
        );
        let config = MembershipConfig::default().with_initial_heartbeat(MAX_WIRE_VALUE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejoin_window_defaults_to_remove_timeout() {
        let config = MembershipConfig::default();
        assert_eq!(config.rejoin_window(), config.t_remove);
        let config = config.with_rejoin_window(Duration::from_secs(42));
        assert_eq!(config.rejoin_window(), Duration::from_secs(42));
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration(" 7 ").unwrap(), Duration::from_secs(7));
        assert!(parse_duration("soon").is_err());
    }
}
