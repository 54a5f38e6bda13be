//! Adapter configuration and construction of the matching packet connection.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use clap::ValueEnum;

use crate::conn::PacketConn;
use crate::error::{Error, Result};
use crate::queue::QUEUE_SIZE;
use crate::redial::RedialPacketConn;
use crate::round_robin::RoundRobinPacketConn;
use crate::session::SessionId;
use crate::stream::Dialer;

/// How outgoing packets are spread over several streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SplitAlgorithm {
    /// Strict cyclic order: packet `i` goes to stream `i mod N`.
    #[default]
    RoundRobin,
    /// Each packet goes to a uniformly chosen stream.
    Random,
}

impl fmt::Display for SplitAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitAlgorithm::RoundRobin => f.write_str("round-robin"),
            SplitAlgorithm::Random => f.write_str("random"),
        }
    }
}

impl FromStr for SplitAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "round-robin" => Ok(SplitAlgorithm::RoundRobin),
            "random" => Ok(SplitAlgorithm::Random),
            other => Err(Error::InvalidConfig(format!(
                "unknown splitting algorithm {other:?}"
            ))),
        }
    }
}

/// Knobs shared by the packet connections.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Packets each queue holds before dropping.
    pub queue_capacity: usize,
    /// Pause between the end of one exchange cycle and the next dial.
    pub redial_delay: Duration,
    /// How long a silent peer keeps its outgoing queue (server side).
    pub idle_timeout: Duration,
    /// Splitting algorithm when there are several streams.
    pub split: SplitAlgorithm,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        AdapterConfig {
            queue_capacity: QUEUE_SIZE,
            redial_delay: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(60),
            split: SplitAlgorithm::default(),
        }
    }
}

impl AdapterConfig {
    /// Sets the queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the pause before redialing.
    pub fn with_redial_delay(mut self, delay: Duration) -> Self {
        self.redial_delay = delay;
        self
    }

    /// Sets the idle timeout for remote peers.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the splitting algorithm.
    pub fn with_split(mut self, split: SplitAlgorithm) -> Self {
        self.split = split;
        self
    }

    /// Rejects settings no connection can run with.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig("queue capacity must be positive".into()));
        }
        if self.idle_timeout.is_zero() {
            return Err(Error::InvalidConfig("idle timeout must be positive".into()));
        }
        Ok(())
    }
}

/// Builds the packet connection matching the number of dialers: a
/// [`RedialPacketConn`] for one, a [`RoundRobinPacketConn`] for several.
pub fn dial_packet_conn(
    config: &AdapterConfig,
    session_id: SessionId,
    mut dialers: Vec<Box<dyn Dialer>>,
) -> Result<Box<dyn PacketConn>> {
    config.validate()?;
    match dialers.len() {
        0 => Err(Error::InvalidConfig("at least one connection is required".into())),
        1 => {
            let dialer = dialers.remove(0);
            log::info!("Session {session_id}: single stream to {}", dialer.remote_addr());
            Ok(Box::new(RedialPacketConn::with_config(session_id, dialer, config)?))
        }
        n => {
            log::info!("Session {session_id}: splitting over {n} streams ({})", config.split);
            Ok(Box::new(RoundRobinPacketConn::with_config(session_id, dialers, config)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_names_round_trip() {
        for alg in [SplitAlgorithm::RoundRobin, SplitAlgorithm::Random] {
            assert_eq!(alg.to_string().parse::<SplitAlgorithm>().unwrap(), alg);
        }
        assert!(matches!(
            "weighted".parse::<SplitAlgorithm>(),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn clap_names_match_display() {
        let value = <SplitAlgorithm as ValueEnum>::from_str("round-robin", false).unwrap();
        assert_eq!(value, SplitAlgorithm::RoundRobin);
        let value = <SplitAlgorithm as ValueEnum>::from_str("random", false).unwrap();
        assert_eq!(value, SplitAlgorithm::Random);
    }

    #[test]
    fn defaults_are_valid() {
        let config = AdapterConfig::default();
        assert_eq!(config.queue_capacity, QUEUE_SIZE);
        assert_eq!(config.split, SplitAlgorithm::RoundRobin);
        assert!(config.validate().is_ok());
        assert!(config.clone().with_queue_capacity(0).validate().is_err());
        assert!(config.with_idle_timeout(Duration::ZERO).validate().is_err());
    }

    #[test]
    fn no_dialers_is_rejected() {
        let result = dial_packet_conn(&AdapterConfig::default(), SessionId::new(), Vec::new());
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
