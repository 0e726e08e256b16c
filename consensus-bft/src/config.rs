//! BFT consensus configuration.
//!
//! Timing parameters, timeout growth policy, and buffering limits for the
//! round state machine. All durations are in milliseconds.

use crate::types::{ConsensusStep, Round};

/// How step timeouts grow with the round number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutGrowth {
    /// `base + delta_ms * round`.
    Linear { delta_ms: u64 },
    /// `base * multiplier^round`.
    Exponential { multiplier: u64 },
}

/// Configuration for the round state machine.
#[derive(Debug, Clone)]
pub struct BftConfig {
    /// Base timeout for receiving the round's proposal.
    /// Default: 3000.
    pub propose_timeout_base_ms: u64,

    /// Base timeout for collecting a prevote quorum.
    /// Default: 1000.
    pub prevote_timeout_base_ms: u64,

    /// Base timeout for collecting a precommit quorum.
    /// Default: 1000.
    pub precommit_timeout_base_ms: u64,

    /// Growth applied to every base timeout per round.
    /// Default: linear, +500 ms per round.
    pub timeout_growth: TimeoutGrowth,

    /// Upper bound on any single step timeout.
    /// Default: 60_000.
    pub timeout_cap_ms: u64,

    /// Rounds at one height after which the machine logs a warning.
    /// Progress continues regardless.
    /// Default: 5.
    pub max_rounds_per_height: u32,

    /// How many heights ahead of the current one inbound messages are
    /// buffered rather than rejected.
    /// Default: 1.
    pub future_height_window: u64,

    /// How many rounds ahead of the current one a proposal or vote may be.
    /// Later rounds are rejected. Messages for a buffered height count from
    /// round 0.
    /// Default: 1000.
    pub future_round_window: u32,

    /// Heights of double-sign evidence kept before pruning.
    /// Default: 100.
    pub evidence_retention_heights: u64,

    /// Largest framed wire message accepted or produced, in bytes.
    /// Default: 1 MiB.
    pub max_message_size: usize,

    /// Pause between a commit and the start of the next height, giving late
    /// precommits time to arrive.
    /// Default: 1000.
    pub commit_timeout_ms: u64,
}

impl Default for BftConfig {
    fn default() -> Self {
        Self {
            propose_timeout_base_ms: 3000,
            prevote_timeout_base_ms: 1000,
            precommit_timeout_base_ms: 1000,
            timeout_growth: TimeoutGrowth::Linear { delta_ms: 500 },
            timeout_cap_ms: 60_000,
            max_rounds_per_height: 5,
            future_height_window: 1,
            future_round_window: 1000,
            evidence_retention_heights: 100,
            max_message_size: 1024 * 1024,
            commit_timeout_ms: 1000,
        }
    }
}

impl BftConfig {
    /// Timeout for `step` at `round`, grown per [`TimeoutGrowth`] and capped
    /// at `timeout_cap_ms`. `Committed` never times out.
    pub fn timeout_ms(&self, step: ConsensusStep, round: Round) -> u64 {
        let base = match step {
            ConsensusStep::AwaitingProposal => self.propose_timeout_base_ms,
            ConsensusStep::Prevoting => self.prevote_timeout_base_ms,
            ConsensusStep::Precommitting => self.precommit_timeout_base_ms,
            ConsensusStep::Committed => return 0,
        };
        let grown = match self.timeout_growth {
            TimeoutGrowth::Linear { delta_ms } => {
                base.saturating_add(delta_ms.saturating_mul(u64::from(round)))
            }
            TimeoutGrowth::Exponential { multiplier } => {
                base.saturating_mul(multiplier.saturating_pow(round))
            }
        };
        grown.min(self.timeout_cap_ms)
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.propose_timeout_base_ms == 0
            || self.prevote_timeout_base_ms == 0
            || self.precommit_timeout_base_ms == 0
        {
            return Err(ConfigError::ZeroBaseTimeout);
        }
        match self.timeout_growth {
            TimeoutGrowth::Linear { delta_ms: 0 } => return Err(ConfigError::NoTimeoutGrowth),
            TimeoutGrowth::Exponential { multiplier } if multiplier < 2 => {
                return Err(ConfigError::InvalidMultiplier(multiplier))
            }
            _ => {}
        }
        let largest_base = self
            .propose_timeout_base_ms
            .max(self.prevote_timeout_base_ms)
            .max(self.precommit_timeout_base_ms);
        if self.timeout_cap_ms < largest_base {
            return Err(ConfigError::CapBelowBase {
                cap: self.timeout_cap_ms,
                base: largest_base,
            });
        }
        if self.max_rounds_per_height == 0 {
            return Err(ConfigError::InvalidMaxRounds);
        }
        if self.future_round_window == 0 {
            return Err(ConfigError::InvalidFutureRoundWindow);
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::InvalidMaxMessageSize);
        }
        Ok(())
    }
}

/// Errors in BFT configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("base timeouts must be > 0")]
    ZeroBaseTimeout,
    #[error("linear timeout growth must add a positive delta")]
    NoTimeoutGrowth,
    #[error("exponential timeout multiplier must be >= 2, got {0}")]
    InvalidMultiplier(u64),
    #[error("timeout_cap_ms ({cap}) is below the largest base timeout ({base})")]
    CapBelowBase { cap: u64, base: u64 },
    #[error("max_rounds_per_height must be > 0")]
    InvalidMaxRounds,
    #[error("future_round_window must be > 0")]
    InvalidFutureRoundWindow,
    #[error("max_message_size must be > 0")]
    InvalidMaxMessageSize,
}
