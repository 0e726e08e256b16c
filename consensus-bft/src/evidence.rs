//! Double-sign evidence.
//!
//! A validator must not send two different proposals, prevotes or
//! precommits for the same (height, round). The vote cache detects the
//! conflict on admission; this module records it for later accountability.

use {
    crate::types::{Height, Propose, Round, SignedVote, VoteType},
    serde::{Deserialize, Serialize},
    solana_hash::Hash,
    solana_pubkey::Pubkey,
    solana_signature::Signature,
    std::collections::HashSet,
};

/// The type of double-sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvidenceKind {
    /// Two different proposals in the same round.
    ConflictingProposal,
    /// Two different prevotes in the same round.
    ConflictingPreVote,
    /// Two different precommits in the same round.
    ConflictingPreCommit,
}

impl std::fmt::Display for EvidenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvidenceKind::ConflictingProposal => write!(f, "ConflictingProposal"),
            EvidenceKind::ConflictingPreVote => write!(f, "ConflictingPreVote"),
            EvidenceKind::ConflictingPreCommit => write!(f, "ConflictingPreCommit"),
        }
    }
}

impl From<VoteType> for EvidenceKind {
    fn from(vote_type: VoteType) -> Self {
        match vote_type {
            VoteType::PreVote => EvidenceKind::ConflictingPreVote,
            VoteType::PreCommit => EvidenceKind::ConflictingPreCommit,
        }
    }
}

/// Two signed, conflicting messages from one validator at one
/// (height, round, kind).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoubleSignEvidence {
    /// The offending validator.
    pub validator: Pubkey,
    pub height: Height,
    pub round: Round,
    pub kind: EvidenceKind,
    /// First message seen: (value, signature).
    pub first: (Option<Hash>, Signature),
    /// Conflicting message: (value, signature).
    pub second: (Option<Hash>, Signature),
}

impl DoubleSignEvidence {
    /// Build evidence from the stored vote and the conflicting newcomer.
    pub fn from_votes<V: SignedVote>(first: &V, second: &V) -> Self {
        Self {
            validator: *first.voter(),
            height: first.height(),
            round: first.round(),
            kind: V::VOTE_TYPE.into(),
            first: (first.block_hash(), *first.signature()),
            second: (second.block_hash(), *second.signature()),
        }
    }

    /// Build evidence from the stored proposal and the conflicting newcomer.
    pub fn from_proposals(first: &Propose, second: &Propose) -> Self {
        Self {
            validator: first.proposer,
            height: first.height,
            round: first.round,
            kind: EvidenceKind::ConflictingProposal,
            first: (Some(first.block.hash()), first.signature),
            second: (Some(second.block.hash()), second.signature),
        }
    }

    fn key(&self) -> (Pubkey, Height, Round, EvidenceKind) {
        (self.validator, self.height, self.round, self.kind)
    }
}

/// Collects double-sign evidence, one record per
/// (validator, height, round, kind).
#[derive(Debug, Default)]
pub struct EvidenceCollector {
    seen: HashSet<(Pubkey, Height, Round, EvidenceKind)>,
    evidence: Vec<DoubleSignEvidence>,
}

impl EvidenceCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `evidence`. Returns `false` if the same offense was already
    /// recorded.
    pub fn record(&mut self, evidence: DoubleSignEvidence) -> bool {
        if !self.seen.insert(evidence.key()) {
            return false;
        }
        self.evidence.push(evidence);
        true
    }

    /// Forget evidence for heights below `min_height`, including evidence
    /// not yet drained.
    pub fn prune(&mut self, min_height: Height) {
        self.seen.retain(|(_, height, _, _)| *height >= min_height);
        self.evidence.retain(|e| e.height >= min_height);
    }

    /// Evidence recorded and not yet drained.
    pub fn evidence(&self) -> &[DoubleSignEvidence] {
        &self.evidence
    }

    /// Take all pending evidence. Already-drained offenses stay
    /// deduplicated until pruned.
    pub fn drain_evidence(&mut self) -> Vec<DoubleSignEvidence> {
        std::mem::take(&mut self.evidence)
    }

    pub fn has_evidence_against(&self, validator: &Pubkey) -> bool {
        self.seen.iter().any(|(v, _, _, _)| v == validator)
    }
}
