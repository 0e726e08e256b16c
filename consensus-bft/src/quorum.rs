//! Quorum evaluation.
//!
//! Pure functions over a validator set: tally signed votes by value, decide
//! whether any value (nil included) holds strictly more than two thirds of
//! the voting weight, and check aggregated [`VoteCertificate`]s.

use {
    crate::{
        crypto::SignatureVerifier,
        types::{Height, Round, SignedVote, VoteCertificate},
        validator_set::ValidatorSet,
    },
    solana_hash::Hash,
    solana_pubkey::Pubkey,
    std::collections::HashSet,
};

/// Outcome of [`evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuorumResult {
    /// More than 2/3 of weight voted for this value. `None` is nil.
    Quorum(Option<Hash>),
    NoQuorum,
}

impl QuorumResult {
    pub fn is_quorum(&self) -> bool {
        matches!(self, QuorumResult::Quorum(_))
    }
}

/// Per-value weights of the votes that survived filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoteTally {
    /// `(value, weight)` in order of first appearance.
    entries: Vec<(Option<Hash>, u64)>,
    /// First value whose weight crossed the quorum threshold.
    quorum: Option<Option<Hash>>,
    counted_weight: u64,
}

impl VoteTally {
    pub fn weight_for(&self, value: Option<Hash>) -> u64 {
        self.entries
            .iter()
            .find(|(v, _)| *v == value)
            .map_or(0, |(_, w)| *w)
    }

    /// Total weight of all counted votes, any value.
    pub fn counted_weight(&self) -> u64 {
        self.counted_weight
    }

    pub fn result(&self) -> QuorumResult {
        self.quorum.map_or(QuorumResult::NoQuorum, QuorumResult::Quorum)
    }
}

/// Tally `votes` for `(height, round)`.
///
/// Votes are skipped if they are for another height or round, come from a
/// voter outside `validators`, or carry a signature `verifier` rejects. Each
/// voter counts once, with its first admissible vote.
pub fn tally<'a, V, I>(
    votes: I,
    height: Height,
    round: Round,
    validators: &ValidatorSet,
    verifier: &dyn SignatureVerifier,
) -> VoteTally
where
    V: SignedVote + 'a,
    I: IntoIterator<Item = &'a V>,
{
    let mut seen: HashSet<Pubkey> = HashSet::new();
    let mut tally = VoteTally::default();

    for vote in votes {
        if vote.height() != height || vote.round() != round {
            continue;
        }
        let stake = validators.stake_of(vote.voter());
        if stake == 0 || seen.contains(vote.voter()) {
            continue;
        }
        if !verifier.verify(vote.voter(), &vote.signing_bytes(), vote.signature()) {
            continue;
        }
        seen.insert(*vote.voter());

        let value = vote.block_hash();
        let weight = match tally.entries.iter_mut().find(|(v, _)| *v == value) {
            Some((_, w)) => {
                *w = w.saturating_add(stake);
                *w
            }
            None => {
                tally.entries.push((value, stake));
                stake
            }
        };
        tally.counted_weight = tally.counted_weight.saturating_add(stake);

        if tally.quorum.is_none() && validators.is_quorum(weight) {
            tally.quorum = Some(value);
        }
    }

    tally
}

/// Is there a quorum for a single value among `votes` at `(height, round)`?
///
/// Counting each voter once makes two disjoint quorums impossible within one
/// tally; conflicting quorums can only surface across replicas when more
/// than a third of the weight is faulty. The first value to cross is
/// reported.
pub fn evaluate<'a, V, I>(
    votes: I,
    height: Height,
    round: Round,
    validators: &ValidatorSet,
    verifier: &dyn SignatureVerifier,
) -> QuorumResult
where
    V: SignedVote + 'a,
    I: IntoIterator<Item = &'a V>,
{
    tally(votes, height, round, validators, verifier).result()
}

/// Reasons a [`VoteCertificate`] is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CertificateError {
    #[error("signer {0} appears more than once")]
    DuplicateSigner(Pubkey),
    #[error("signer {0} is not in the validator set")]
    UnknownSigner(Pubkey),
    #[error("invalid signature from {0}")]
    InvalidSignature(Pubkey),
    #[error("certificate weight {weight} is not a quorum of {total}")]
    InsufficientWeight { weight: u64, total: u64 },
    /// The certificate is sound but certifies something other than what
    /// it is attached to.
    #[error("certificate does not cover the message it justifies")]
    NotApplicable,
}

/// Check that `cert` carries distinct, known, correctly signed votes whose
/// combined weight is a quorum.
pub fn verify_certificate(
    cert: &VoteCertificate,
    validators: &ValidatorSet,
    verifier: &dyn SignatureVerifier,
) -> Result<(), CertificateError> {
    let mut seen: HashSet<Pubkey> = HashSet::with_capacity(cert.signatures.len());
    let mut weight: u64 = 0;

    for (signer, signature) in &cert.signatures {
        if !seen.insert(*signer) {
            return Err(CertificateError::DuplicateSigner(*signer));
        }
        let stake = validators.stake_of(signer);
        if stake == 0 {
            return Err(CertificateError::UnknownSigner(*signer));
        }
        if !verifier.verify(signer, &cert.signing_bytes_for(signer), signature) {
            return Err(CertificateError::InvalidSignature(*signer));
        }
        weight = weight.saturating_add(stake);
    }

    if !validators.is_quorum(weight) {
        return Err(CertificateError::InsufficientWeight {
            weight,
            total: validators.total_stake(),
        });
    }
    Ok(())
}
