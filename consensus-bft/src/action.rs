//! Outbound protocol actions.
//!
//! The state machine reports everything it wants broadcast or persisted as
//! an [`Action`]. The set is closed; consumers match on it exhaustively.

use {
    crate::{
        error::Result,
        types::{Commit, Height, PreCommit, PreVote, Propose, Round, SignedPreCommit, SignedPreVote},
        wire,
    },
    serde::{Deserialize, Serialize},
};

/// A protocol message emitted by the state machine.
///
/// The state machine itself only emits `Propose`, `SignedPreVote`,
/// `SignedPreCommit` and `Commit`. The unsigned vote variants carry a vote
/// to an external signer, which answers with the signed form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Propose(Propose),
    PreVote(PreVote),
    SignedPreVote(SignedPreVote),
    PreCommit(PreCommit),
    SignedPreCommit(SignedPreCommit),
    Commit(Commit),
}

impl Action {
    /// Short tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Propose(_) => "propose",
            Action::PreVote(_) => "prevote",
            Action::SignedPreVote(_) => "signed_prevote",
            Action::PreCommit(_) => "precommit",
            Action::SignedPreCommit(_) => "signed_precommit",
            Action::Commit(_) => "commit",
        }
    }

    pub fn height(&self) -> Height {
        match self {
            Action::Propose(p) => p.height,
            Action::PreVote(v) => v.height,
            Action::SignedPreVote(v) => v.pre_vote.height,
            Action::PreCommit(v) => v.height,
            Action::SignedPreCommit(v) => v.pre_commit.height,
            Action::Commit(c) => c.height(),
        }
    }

    pub fn round(&self) -> Round {
        match self {
            Action::Propose(p) => p.round,
            Action::PreVote(v) => v.round,
            Action::SignedPreVote(v) => v.pre_vote.round,
            Action::PreCommit(v) => v.round,
            Action::SignedPreCommit(v) => v.pre_commit.round,
            Action::Commit(c) => c.round(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        wire::encode(self)
    }

    pub fn decode(bytes: &[u8], max_size: usize) -> Result<Self> {
        wire::decode(bytes, max_size)
    }
}

impl From<Propose> for Action {
    fn from(proposal: Propose) -> Self {
        Action::Propose(proposal)
    }
}

impl From<SignedPreVote> for Action {
    fn from(vote: SignedPreVote) -> Self {
        Action::SignedPreVote(vote)
    }
}

impl From<SignedPreCommit> for Action {
    fn from(vote: SignedPreCommit) -> Self {
        Action::SignedPreCommit(vote)
    }
}

impl From<Commit> for Action {
    fn from(commit: Commit) -> Self {
        Action::Commit(commit)
    }
}
