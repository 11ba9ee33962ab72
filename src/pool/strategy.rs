//! Routing strategies of a [`super::MultiplexerPool`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::MultiplexerPool;
use crate::{message::Message, multiplexer::Multiplexer, MuxError};

/// How a pool picks the member for each call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Always the first usable member, in configuration order.
    #[default]
    PrimarySecondary,

    /// The next usable member in rotation.
    RoundRobin,

    /// The member a previous message of the same sequence went through, if the
    /// message type asks for it; otherwise round robin.
    RoundRobinWithOverride,

    /// The member at the value of a numeric field modulo the member count; otherwise
    /// round robin.
    SplitByDivisor,
}

impl Strategy {
    /// Every strategy, in declaration order.
    pub const ALL: [Self; 4] = [
        Self::PrimarySecondary,
        Self::RoundRobin,
        Self::RoundRobinWithOverride,
        Self::SplitByDivisor,
    ];

    /// The configuration name of the strategy.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrimarySecondary => "primary-secondary",
            Self::RoundRobin => "round-robin",
            Self::RoundRobinWithOverride => "round-robin-with-override",
            Self::SplitByDivisor => "split-by-divisor",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Strategy {
    type Err = MuxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| MuxError::InvalidConfig(format!("Unknown pool strategy '{s}'.")))
    }
}

/// A hook that picks a member ahead of the pool's own strategy.
///
/// Returning [`None`] leaves the choice to the configured [`Strategy`].
pub trait StrategyHandler<M: Message>: Send + Sync {
    fn select(
        &self,
        pool: &MultiplexerPool<M>,
        message: &M,
        deadline: tokio::time::Instant,
    ) -> Option<Arc<Multiplexer<M>>>;
}
