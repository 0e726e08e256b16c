//! Tessera Tendermint-style BFT consensus core
//!
//! This crate implements the round state machine of a Tendermint-style
//! Byzantine Fault Tolerant protocol for a fixed, stake-weighted validator
//! set. Each height runs one or more rounds of three steps:
//!
//! 1. **Propose**: A stake-weighted round-robin proposer broadcasts a block.
//! 2. **Prevote**: Validators prevote the block, or nil if it is invalid,
//!    missing, or conflicts with their lock.
//! 3. **Precommit**: On 2/3+ prevotes for a block (a polka) validators lock
//!    on it and precommit it.
//! 4. **Commit**: On 2/3+ precommits for a block, the block is final.
//!
//! # Key Properties
//!
//! - **Safety**: no two blocks commit at the same height while less than
//!   1/3 of stake is Byzantine, even without synchrony.
//! - **Liveness**: after network stabilization, timeouts that grow with the
//!   round move honest replicas forward until a round commits.
//! - **Accountability**: conflicting signed messages become
//!   [`DoubleSignEvidence`].
//!
//! The state machine is pure: it consumes [`ConsensusEvent`]s and returns
//! [`EngineOutput`]s. Networking, timers and persistence belong to the
//! driver.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 StateMachine                 │
//! │  ┌─────────┐  ┌───────────┐  ┌────────────┐  │
//! │  │ Config  │  │ Validator │  │  Evidence  │  │
//! │  │         │  │    Set    │  │ Collector  │  │
//! │  └─────────┘  └───────────┘  └────────────┘  │
//! │  ┌───────────┐ ┌───────────┐ ┌────────────┐  │
//! │  │ VoteCache │ │  Quorum   │ │LockTracker │  │
//! │  └───────────┘ └───────────┘ └────────────┘  │
//! │  ┌──────────┐  ┌──────────────────────────┐  │
//! │  │ Proposer │  │ Application (validate /  │  │
//! │  │ Selection│  │ build blocks)            │  │
//! │  └──────────┘  └──────────────────────────┘  │
//! └──────────────────────────────────────────────┘
//!        ▲ ConsensusEvent          │ EngineOutput
//!        │                         ▼ (Action, Commit, ScheduledTimeout)
//! ```

pub mod action;
pub mod app;
pub mod config;
pub mod crypto;
pub mod error;
pub mod event;
pub mod evidence;
pub mod lock;
pub mod proposer;
pub mod quorum;
pub mod state_machine;
pub mod timeout;
pub mod types;
pub mod validator_set;
pub mod vote_cache;
pub mod wire;

// Re-exports for convenience
pub use action::Action;
pub use app::{Application, BlockBuilder, BlockValidator, EmptyBlocks};
pub use config::{BftConfig, TimeoutGrowth};
pub use crypto::{Ed25519Verifier, SignatureVerifier};
pub use error::{ConsensusError, Result};
pub use event::ConsensusEvent;
pub use evidence::{DoubleSignEvidence, EvidenceCollector, EvidenceKind};
pub use lock::{Lock, LockTracker};
pub use proposer::{is_proposer, proposer_for_round, ProposerSelector};
pub use quorum::{QuorumResult, VoteTally};
pub use state_machine::{EngineOutput, StateMachine};
pub use timeout::{ScheduledTimeout, TimeoutScheduler, TimeoutToken};
pub use types::{
    Block, Commit, ConsensusState, ConsensusStep, Height, PreCommit, PreVote, Propose, Round,
    SignedPreCommit, SignedPreVote, ValidValue, VoteCertificate, VoteType,
};
pub use validator_set::{ValidatorInfo, ValidatorSet};
