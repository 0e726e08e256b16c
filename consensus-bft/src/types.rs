//! Core types for the BFT consensus protocol.
//!
//! Defines the block type, the signed protocol messages (proposal, prevote,
//! precommit), vote certificates and commits, and the per-height round state.

use {
    serde::{Deserialize, Serialize},
    solana_hash::Hash,
    solana_pubkey::Pubkey,
    solana_signature::Signature,
    solana_signer::Signer,
};

/// Sequential index of a consensus decision.
pub type Height = u64;

/// Retry counter within a height.
pub type Round = u32;

/// Domain tags prefixed to every signing preimage so a signature over one
/// message type can never be replayed as another.
const PROPOSAL_DOMAIN: u8 = 0;
const PREVOTE_DOMAIN: u8 = 1;
const PRECOMMIT_DOMAIN: u8 = 2;

// ---------------------------------------------------------------------------
// Blocks
// ---------------------------------------------------------------------------

/// A block as seen by the consensus core.
///
/// The payload is opaque; only the surrounding system interprets it. The
/// core identifies a block by [`Block::hash`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Hash of the parent (previously committed) block.
    pub parent_hash: Hash,
    /// Height this block is proposed for.
    pub height: Height,
    /// Unix timestamp in milliseconds when the block was built.
    pub timestamp: i64,
    /// Opaque block content.
    pub payload: Vec<u8>,
    /// Validator that built the block.
    pub proposer: Pubkey,
}

impl Block {
    /// Compute a deterministic content hash for this block.
    pub fn hash(&self) -> Hash {
        solana_sha256_hasher::hashv(&[
            self.parent_hash.as_ref(),
            &self.height.to_le_bytes(),
            &self.timestamp.to_le_bytes(),
            self.proposer.as_ref(),
            &self.payload,
        ])
    }
}

// ---------------------------------------------------------------------------
// Votes
// ---------------------------------------------------------------------------

/// The two voting phases of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VoteType {
    PreVote,
    PreCommit,
}

impl std::fmt::Display for VoteType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoteType::PreVote => write!(f, "PreVote"),
            VoteType::PreCommit => write!(f, "PreCommit"),
        }
    }
}

/// A prevote. `block_hash == None` is a nil prevote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreVote {
    pub height: Height,
    pub round: Round,
    pub block_hash: Option<Hash>,
    pub voter: Pubkey,
}

/// A precommit. `block_hash == None` is a nil precommit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreCommit {
    pub height: Height,
    pub round: Round,
    pub block_hash: Option<Hash>,
    pub voter: Pubkey,
}

/// A prevote together with the voter's signature over its signing bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPreVote {
    pub pre_vote: PreVote,
    pub signature: Signature,
}

/// A precommit together with the voter's signature over its signing bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPreCommit {
    pub pre_commit: PreCommit,
    pub signature: Signature,
}

/// Signing preimage shared by both vote types:
/// `[domain][height: u64-le][round: u32-le][0 | 1 ++ hash][voter]`, which is
/// the domain byte followed by the wire encoding of the unsigned vote.
fn vote_signing_bytes(
    domain: u8,
    height: Height,
    round: Round,
    block_hash: Option<&Hash>,
    voter: &Pubkey,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(78);
    buf.push(domain);
    buf.extend_from_slice(&height.to_le_bytes());
    buf.extend_from_slice(&round.to_le_bytes());
    match block_hash {
        Some(hash) => {
            buf.push(1);
            buf.extend_from_slice(hash.as_ref());
        }
        None => buf.push(0),
    }
    buf.extend_from_slice(voter.as_ref());
    buf
}

impl PreVote {
    /// Bytes covered by the voter's signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        vote_signing_bytes(
            PREVOTE_DOMAIN,
            self.height,
            self.round,
            self.block_hash.as_ref(),
            &self.voter,
        )
    }

    pub fn sign(self, signer: &dyn Signer) -> SignedPreVote {
        let signature = signer.sign_message(&self.signing_bytes());
        SignedPreVote {
            pre_vote: self,
            signature,
        }
    }
}

impl PreCommit {
    /// Bytes covered by the voter's signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        vote_signing_bytes(
            PRECOMMIT_DOMAIN,
            self.height,
            self.round,
            self.block_hash.as_ref(),
            &self.voter,
        )
    }

    pub fn sign(self, signer: &dyn Signer) -> SignedPreCommit {
        let signature = signer.sign_message(&self.signing_bytes());
        SignedPreCommit {
            pre_commit: self,
            signature,
        }
    }
}

/// Uniform read access over [`SignedPreVote`] and [`SignedPreCommit`], so the
/// quorum evaluator and vote cache can treat both phases alike.
pub trait SignedVote {
    const VOTE_TYPE: VoteType;

    fn height(&self) -> Height;
    fn round(&self) -> Round;
    fn block_hash(&self) -> Option<Hash>;
    fn voter(&self) -> &Pubkey;
    fn signature(&self) -> &Signature;
    fn signing_bytes(&self) -> Vec<u8>;
}

impl SignedVote for SignedPreVote {
    const VOTE_TYPE: VoteType = VoteType::PreVote;

    fn height(&self) -> Height {
        self.pre_vote.height
    }
    fn round(&self) -> Round {
        self.pre_vote.round
    }
    fn block_hash(&self) -> Option<Hash> {
        self.pre_vote.block_hash
    }
    fn voter(&self) -> &Pubkey {
        &self.pre_vote.voter
    }
    fn signature(&self) -> &Signature {
        &self.signature
    }
    fn signing_bytes(&self) -> Vec<u8> {
        self.pre_vote.signing_bytes()
    }
}

impl SignedVote for SignedPreCommit {
    const VOTE_TYPE: VoteType = VoteType::PreCommit;

    fn height(&self) -> Height {
        self.pre_commit.height
    }
    fn round(&self) -> Round {
        self.pre_commit.round
    }
    fn block_hash(&self) -> Option<Hash> {
        self.pre_commit.block_hash
    }
    fn voter(&self) -> &Pubkey {
        &self.pre_commit.voter
    }
    fn signature(&self) -> &Signature {
        &self.signature
    }
    fn signing_bytes(&self) -> Vec<u8> {
        self.pre_commit.signing_bytes()
    }
}

// ---------------------------------------------------------------------------
// Certificates
// ---------------------------------------------------------------------------

/// Aggregated proof that a set of validators cast the same vote.
///
/// Used both as the `last_commit` justification carried by a proposal and
/// as the body of a [`Commit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCertificate {
    pub vote_type: VoteType,
    pub height: Height,
    pub round: Round,
    pub block_hash: Option<Hash>,
    /// `(voter, signature)` pairs over the vote described above.
    pub signatures: Vec<(Pubkey, Signature)>,
}

impl VoteCertificate {
    /// Collect the signatures of `votes` matching `(height, round, block_hash)`.
    pub fn from_votes<'a, V, I>(height: Height, round: Round, block_hash: Option<Hash>, votes: I) -> Self
    where
        V: SignedVote + 'a,
        I: IntoIterator<Item = &'a V>,
    {
        let signatures = votes
            .into_iter()
            .filter(|v| v.height() == height && v.round() == round && v.block_hash() == block_hash)
            .map(|v| (*v.voter(), *v.signature()))
            .collect();
        Self {
            vote_type: V::VOTE_TYPE,
            height,
            round,
            block_hash,
            signatures,
        }
    }

    /// Reconstruct the bytes `voter` must have signed for this certificate.
    pub fn signing_bytes_for(&self, voter: &Pubkey) -> Vec<u8> {
        let domain = match self.vote_type {
            VoteType::PreVote => PREVOTE_DOMAIN,
            VoteType::PreCommit => PRECOMMIT_DOMAIN,
        };
        vote_signing_bytes(domain, self.height, self.round, self.block_hash.as_ref(), voter)
    }
}

/// Proof that `block` finalized at `certificate.height`: a precommit quorum
/// for the block's hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub block: Block,
    pub certificate: VoteCertificate,
}

impl Commit {
    pub fn height(&self) -> Height {
        self.certificate.height
    }

    pub fn round(&self) -> Round {
        self.certificate.round
    }

    /// Structural checks that need no validator set: a precommit
    /// certificate whose value is this block at this block's height.
    pub fn is_well_formed(&self) -> bool {
        self.certificate.vote_type == VoteType::PreCommit
            && self.certificate.block_hash == Some(self.block.hash())
            && self.certificate.height == self.block.height
    }
}

// ---------------------------------------------------------------------------
// Proposals
// ---------------------------------------------------------------------------

/// A block proposal broadcast by the round's designated proposer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Propose {
    pub height: Height,
    pub round: Round,
    pub block: Block,
    pub proposer: Pubkey,
    /// Proposer signature over [`Propose::signing_bytes`].
    pub signature: Signature,
    /// A prevote quorum for `block` from an earlier round of this height.
    /// Lets validators locked on a stale block unlock safely.
    pub last_commit: Option<VoteCertificate>,
}

impl Propose {
    /// `[domain][height: u64-le][round: u32-le][block hash]`. The block
    /// content is bound through its hash; `last_commit` is self-certifying
    /// and not covered.
    pub fn signing_bytes(&self) -> Vec<u8> {
        proposal_signing_bytes(self.height, self.round, &self.block.hash())
    }

    /// Build and sign a proposal.
    pub fn new_signed(
        height: Height,
        round: Round,
        block: Block,
        last_commit: Option<VoteCertificate>,
        signer: &dyn Signer,
    ) -> Self {
        let signature = signer.sign_message(&proposal_signing_bytes(height, round, &block.hash()));
        Self {
            height,
            round,
            block,
            proposer: signer.pubkey(),
            signature,
            last_commit,
        }
    }
}

fn proposal_signing_bytes(height: Height, round: Round, block_hash: &Hash) -> Vec<u8> {
    let mut buf = Vec::with_capacity(45);
    buf.push(PROPOSAL_DOMAIN);
    buf.extend_from_slice(&height.to_le_bytes());
    buf.extend_from_slice(&round.to_le_bytes());
    buf.extend_from_slice(block_hash.as_ref());
    buf
}

// ---------------------------------------------------------------------------
// Consensus state
// ---------------------------------------------------------------------------

/// The step within a single consensus round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConsensusStep {
    /// Waiting for the round's proposal.
    AwaitingProposal,
    /// Prevote cast; collecting prevotes.
    Prevoting,
    /// Precommit cast; collecting precommits.
    Precommitting,
    /// The height has finalized.
    Committed,
}

impl std::fmt::Display for ConsensusStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsensusStep::AwaitingProposal => write!(f, "AwaitingProposal"),
            ConsensusStep::Prevoting => write!(f, "Prevoting"),
            ConsensusStep::Precommitting => write!(f, "Precommitting"),
            ConsensusStep::Committed => write!(f, "Committed"),
        }
    }
}

/// The most recent block for which this replica observed a prevote quorum.
/// A proposer re-proposes it so locked validators can follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidValue {
    pub round: Round,
    pub block_hash: Hash,
}

/// Position of the state machine within a height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusState {
    /// Current block height being decided.
    pub height: Height,
    /// Current round within this height.
    pub round: Round,
    /// Current step within the round.
    pub step: ConsensusStep,
    /// Latest prevote quorum seen at this height, if any.
    pub valid: Option<ValidValue>,
}

impl ConsensusState {
    /// Fresh state for a new height, waiting for the round-0 proposal.
    pub fn new(height: Height) -> Self {
        Self {
            height,
            round: 0,
            step: ConsensusStep::AwaitingProposal,
            valid: None,
        }
    }

    /// Enter `new_round`, preserving the valid value.
    pub fn advance_round(&mut self, new_round: Round) {
        self.round = new_round;
        self.step = ConsensusStep::AwaitingProposal;
    }
}
