//! Per-height lock bookkeeping.
//!
//! A replica that precommits a block at round `r` locks on it. While locked
//! it only prevotes that block, unless it is shown a quorum certificate or a
//! commit for a different block from a round at or after its lock.

use {
    crate::{
        crypto::SignatureVerifier,
        quorum::{verify_certificate, CertificateError},
        types::{Commit, Height, Round, VoteCertificate},
        validator_set::ValidatorSet,
    },
    log::*,
    solana_hash::Hash,
    std::collections::BTreeMap,
};

/// The (round, block) a replica precommitted at one height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lock {
    pub round: Round,
    pub block_hash: Hash,
}

/// Evidence offered to release a lock.
#[derive(Debug, Clone, Copy)]
pub enum Justification<'a> {
    /// A prevote or precommit quorum certificate.
    Quorum(&'a VoteCertificate),
    /// A finalized block for the height.
    Commit(&'a Commit),
}

impl Justification<'_> {
    fn certificate(&self) -> &VoteCertificate {
        match self {
            Justification::Quorum(cert) => cert,
            Justification::Commit(commit) => &commit.certificate,
        }
    }
}

/// Why an unlock was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnlockRefusal {
    #[error("no lock is held")]
    NotLocked,
    #[error("evidence is for height {0}")]
    WrongHeight(Height),
    #[error("evidence round {evidence} precedes lock round {locked}")]
    OlderRound { evidence: Round, locked: Round },
    #[error("evidence round {evidence} does not match unlock round {requested}")]
    RoundMismatch { evidence: Round, requested: Round },
    #[error("evidence certifies nil or the locked block")]
    SameOrNilValue,
    #[error("commit block does not match its certificate")]
    MalformedCommit,
    #[error(transparent)]
    Certificate(#[from] CertificateError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("cannot relock height {height} at round {round}: locked at round {locked_round}")]
    StaleRelock {
        height: Height,
        round: Round,
        locked_round: Round,
    },
    #[error("invalid unlock at height {height}: {reason}")]
    InvalidUnlock { height: Height, reason: UnlockRefusal },
}

/// At most one [`Lock`] per height.
#[derive(Debug, Default)]
pub struct LockTracker {
    locks: BTreeMap<Height, Lock>,
}

impl LockTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock `height` on `block_hash` at `round`.
    ///
    /// A lock at a later round replaces the held one. Relocking at an earlier
    /// round, or on a different block at the same round, is refused.
    pub fn lock(&mut self, height: Height, round: Round, block_hash: Hash) -> Result<(), LockError> {
        if let Some(held) = self.locks.get(&height) {
            let conflicting_same_round = held.round == round && held.block_hash != block_hash;
            if round < held.round || conflicting_same_round {
                return Err(LockError::StaleRelock {
                    height,
                    round,
                    locked_round: held.round,
                });
            }
        }
        self.locks.insert(height, Lock { round, block_hash });
        Ok(())
    }

    pub fn current_lock(&self, height: Height) -> Option<Lock> {
        self.locks.get(&height).copied()
    }

    /// Release the lock at `height` given evidence from `newer_round`.
    ///
    /// The evidence must be for this height and `newer_round`, at or after the
    /// lock round, for a different non-nil block, and carry a valid quorum.
    /// On refusal the lock is untouched. Returns the released lock.
    pub fn unlock(
        &mut self,
        height: Height,
        newer_round: Round,
        justification: Justification<'_>,
        validators: &ValidatorSet,
        verifier: &dyn SignatureVerifier,
    ) -> Result<Lock, LockError> {
        let refuse = |reason: UnlockRefusal| LockError::InvalidUnlock { height, reason };

        let held = self
            .locks
            .get(&height)
            .copied()
            .ok_or_else(|| refuse(UnlockRefusal::NotLocked))?;

        if let Justification::Commit(commit) = justification {
            if !commit.is_well_formed() {
                return Err(refuse(UnlockRefusal::MalformedCommit));
            }
        }

        let cert = justification.certificate();
        if cert.height != height {
            return Err(refuse(UnlockRefusal::WrongHeight(cert.height)));
        }
        if cert.round != newer_round {
            return Err(refuse(UnlockRefusal::RoundMismatch {
                evidence: cert.round,
                requested: newer_round,
            }));
        }
        if cert.round < held.round {
            return Err(refuse(UnlockRefusal::OlderRound {
                evidence: cert.round,
                locked: held.round,
            }));
        }
        match cert.block_hash {
            Some(hash) if hash != held.block_hash => {}
            _ => return Err(refuse(UnlockRefusal::SameOrNilValue)),
        }
        verify_certificate(cert, validators, verifier)
            .map_err(|err| refuse(UnlockRefusal::Certificate(err)))?;

        debug!(
            "unlocked height {height} from round {} (evidence round {newer_round})",
            held.round
        );
        self.locks.remove(&height);
        Ok(held)
    }

    /// Drop locks for heights below `height`.
    pub fn prune_below(&mut self, height: Height) {
        self.locks = self.locks.split_off(&height);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
