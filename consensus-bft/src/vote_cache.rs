//! Verified proposals and votes, grouped by height and round.
//!
//! Everything admitted here has already passed authorization and signature
//! checks. The cache keeps the first message per (round, sender) and reports
//! a later differing one as a conflict so the caller can record evidence.

use {
    crate::types::{
        Block, Height, Propose, Round, SignedPreCommit, SignedPreVote, SignedVote,
    },
    solana_hash::Hash,
    solana_pubkey::Pubkey,
    std::collections::{BTreeMap, BTreeSet},
};

/// Result of inserting a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission<T> {
    /// First message from this sender for this slot.
    Inserted,
    /// Same value as the stored message; nothing changed.
    Duplicate,
    /// Different value from the stored message, which is returned and kept.
    Conflicting(T),
}

/// Distinct validators that voted in a round, of either kind, and their
/// combined stake.
#[derive(Debug, Default, Clone)]
struct RoundVoters {
    voters: BTreeSet<Pubkey>,
    stake: u64,
}

/// Everything received for one height.
#[derive(Debug, Default, Clone)]
pub struct HeightVotes {
    proposals: BTreeMap<Round, Propose>,
    /// Round of the first proposal carrying each block.
    proposed_blocks: BTreeMap<Hash, Round>,
    prevotes: BTreeMap<Round, BTreeMap<Pubkey, SignedPreVote>>,
    precommits: BTreeMap<Round, BTreeMap<Pubkey, SignedPreCommit>>,
    voters: BTreeMap<Round, RoundVoters>,
}

fn insert_vote<V: SignedVote + Clone>(
    slots: &mut BTreeMap<Round, BTreeMap<Pubkey, V>>,
    voters: &mut BTreeMap<Round, RoundVoters>,
    vote: &V,
    stake: u64,
) -> Admission<V> {
    let by_voter = slots.entry(vote.round()).or_default();
    match by_voter.get(vote.voter()) {
        Some(existing) if existing.block_hash() == vote.block_hash() => Admission::Duplicate,
        Some(existing) => Admission::Conflicting(existing.clone()),
        None => {
            by_voter.insert(*vote.voter(), vote.clone());
            let round = voters.entry(vote.round()).or_default();
            if round.voters.insert(*vote.voter()) {
                round.stake = round.stake.saturating_add(stake);
            }
            Admission::Inserted
        }
    }
}

impl HeightVotes {
    /// Store the proposal for its round. One proposal per round; the
    /// proposer is checked by the caller.
    pub fn insert_proposal(&mut self, proposal: &Propose) -> Admission<Propose> {
        match self.proposals.get(&proposal.round) {
            Some(existing) if existing.block.hash() == proposal.block.hash() => Admission::Duplicate,
            Some(existing) => Admission::Conflicting(existing.clone()),
            None => {
                self.proposed_blocks
                    .entry(proposal.block.hash())
                    .or_insert(proposal.round);
                self.proposals.insert(proposal.round, proposal.clone());
                Admission::Inserted
            }
        }
    }

    /// Store a prevote from a validator holding `stake`.
    pub fn insert_prevote(&mut self, vote: &SignedPreVote, stake: u64) -> Admission<SignedPreVote> {
        insert_vote(&mut self.prevotes, &mut self.voters, vote, stake)
    }

    pub fn insert_precommit(&mut self, vote: &SignedPreCommit, stake: u64) -> Admission<SignedPreCommit> {
        insert_vote(&mut self.precommits, &mut self.voters, vote, stake)
    }

    pub fn proposal(&self, round: Round) -> Option<&Propose> {
        self.proposals.get(&round)
    }

    pub fn prevotes(&self, round: Round) -> impl Iterator<Item = &SignedPreVote> {
        self.prevotes.get(&round).into_iter().flat_map(|m| m.values())
    }

    pub fn precommits(&self, round: Round) -> impl Iterator<Item = &SignedPreCommit> {
        self.precommits.get(&round).into_iter().flat_map(|m| m.values())
    }

    /// Any proposed block with this hash, from any round.
    pub fn block_by_hash(&self, hash: &Hash) -> Option<&Block> {
        let round = self.proposed_blocks.get(hash)?;
        self.proposals.get(round).map(|p| &p.block)
    }

    /// Combined stake of the validators that sent a prevote or precommit at
    /// `round`, each counted once.
    pub fn round_weight(&self, round: Round) -> u64 {
        self.voters.get(&round).map_or(0, |r| r.stake)
    }

    /// Every stored message in a replayable order: proposals, then
    /// prevotes, then precommits, each by ascending round.
    pub fn into_messages(self) -> (Vec<Propose>, Vec<SignedPreVote>, Vec<SignedPreCommit>) {
        (
            self.proposals.into_values().collect(),
            self.prevotes.into_values().flat_map(|m| m.into_values()).collect(),
            self.precommits.into_values().flat_map(|m| m.into_values()).collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.proposals.is_empty() && self.prevotes.is_empty() && self.precommits.is_empty()
    }
}

/// [`HeightVotes`] for the current height and any buffered future heights.
#[derive(Debug, Default)]
pub struct VoteCache {
    heights: BTreeMap<Height, HeightVotes>,
}

impl VoteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn height(&self, height: Height) -> Option<&HeightVotes> {
        self.heights.get(&height)
    }

    pub fn height_mut(&mut self, height: Height) -> &mut HeightVotes {
        self.heights.entry(height).or_default()
    }

    /// Remove and return everything stored for `height`.
    pub fn take(&mut self, height: Height) -> Option<HeightVotes> {
        self.heights.remove(&height)
    }

    /// Drop all heights below `height`.
    pub fn prune_below(&mut self, height: Height) {
        self.heights = self.heights.split_off(&height);
    }

    pub fn heights(&self) -> impl Iterator<Item = Height> + '_ {
        self.heights.keys().copied()
    }
}
