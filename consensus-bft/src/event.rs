//! Inbound events consumed by the state machine.

use {
    crate::{
        action::Action,
        timeout::TimeoutToken,
        types::{Commit, Height, Propose, SignedPreCommit, SignedPreVote},
    },
    serde::{Deserialize, Serialize},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusEvent {
    ReceivedProposal(Propose),
    ReceivedPreVote(SignedPreVote),
    ReceivedPreCommit(SignedPreCommit),
    /// A previously scheduled timeout expired.
    TimeoutFired(TimeoutToken),
    /// A commit learned from outside the round protocol, e.g. from a peer
    /// that finalized first.
    ExternalCommit(Commit),
}

impl ConsensusEvent {
    /// The event a peer sees when `action` is delivered to it. Unsigned
    /// votes are not deliverable.
    pub fn from_action(action: Action) -> Option<Self> {
        match action {
            Action::Propose(p) => Some(ConsensusEvent::ReceivedProposal(p)),
            Action::SignedPreVote(v) => Some(ConsensusEvent::ReceivedPreVote(v)),
            Action::SignedPreCommit(v) => Some(ConsensusEvent::ReceivedPreCommit(v)),
            Action::Commit(c) => Some(ConsensusEvent::ExternalCommit(c)),
            Action::PreVote(_) | Action::PreCommit(_) => None,
        }
    }

    pub fn height(&self) -> Height {
        match self {
            ConsensusEvent::ReceivedProposal(p) => p.height,
            ConsensusEvent::ReceivedPreVote(v) => v.pre_vote.height,
            ConsensusEvent::ReceivedPreCommit(v) => v.pre_commit.height,
            ConsensusEvent::TimeoutFired(t) => t.height,
            ConsensusEvent::ExternalCommit(c) => c.height(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ConsensusEvent::ReceivedProposal(_) => "proposal",
            ConsensusEvent::ReceivedPreVote(_) => "prevote",
            ConsensusEvent::ReceivedPreCommit(_) => "precommit",
            ConsensusEvent::TimeoutFired(_) => "timeout",
            ConsensusEvent::ExternalCommit(_) => "external_commit",
        }
    }
}
