//! Error types for the consensus core.
//!
//! Every rejection is recoverable: the offending input is dropped and the
//! machine's state is unchanged, except that [`ConsensusError::ByzantineEvidence`]
//! also records the evidence.

use {
    crate::{
        config::ConfigError,
        evidence::DoubleSignEvidence,
        lock::LockError,
        quorum::CertificateError,
        types::{Height, Round},
    },
    solana_hash::Hash,
    solana_pubkey::Pubkey,
    thiserror::Error,
};

#[derive(Error, Debug)]
pub enum ConsensusError {
    /// A proposal or vote whose signature does not verify.
    #[error("invalid {kind} signature from {sender}")]
    InvalidSignature { kind: &'static str, sender: Pubkey },

    /// A message for a height that already finalized here.
    #[error("stale message for height {height} (current {current})")]
    StaleMessage { height: Height, current: Height },

    /// A message too far ahead to buffer.
    #[error("message for height {height} is beyond the buffer window (current {current})")]
    FutureHeight { height: Height, current: Height },

    /// A proposal or vote too many rounds ahead of the machine.
    #[error("message for round {round} is beyond the round window (current {current})")]
    FutureRound { round: Round, current: Round },

    /// A proposal from a validator that is not the round's proposer.
    #[error("{sender} is not the proposer for height {height} round {round}")]
    UnauthorizedProposer {
        height: Height,
        round: Round,
        sender: Pubkey,
    },

    /// A vote from a key outside the validator set.
    #[error("{0} is not in the validator set")]
    UnauthorizedVoter(Pubkey),

    #[error(transparent)]
    InvalidUnlock(#[from] LockError),

    /// A message conflicting with one already admitted from the same sender.
    #[error("double sign by {}: {}", .0.validator, .0.kind)]
    ByzantineEvidence(Box<DoubleSignEvidence>),

    /// A certified commit for a block other than the one already finalized
    /// at this height. More than a third of the stake signed both.
    #[error("conflicting commit at height {height}: finalized {committed}, received {received}")]
    ConflictingCommit {
        height: Height,
        committed: Hash,
        received: Hash,
    },

    #[error("invalid certificate: {0}")]
    InvalidCertificate(#[from] CertificateError),

    /// A proposal or commit whose block does not fit the height.
    #[error("invalid block at height {height}: {reason}")]
    InvalidBlock { height: Height, reason: &'static str },

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("message too large: {size} bytes (max {max} bytes)")]
    MessageTooLarge { size: usize, max: usize },

    /// A frame whose length prefix disagrees with its payload.
    #[error("malformed frame: header says {expected} bytes, got {actual}")]
    MalformedFrame { expected: usize, actual: usize },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl ConsensusError {
    /// Whether the error reports Byzantine behavior: double-sign evidence or
    /// a conflicting commit.
    pub fn is_byzantine(&self) -> bool {
        matches!(
            self,
            ConsensusError::ByzantineEvidence(_) | ConsensusError::ConflictingCommit { .. }
        )
    }
}

impl From<DoubleSignEvidence> for ConsensusError {
    fn from(evidence: DoubleSignEvidence) -> Self {
        ConsensusError::ByzantineEvidence(Box::new(evidence))
    }
}

/// Convenience result type for consensus operations.
pub type Result<T> = std::result::Result<T, ConsensusError>;
