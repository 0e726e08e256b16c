//! Weighted validator set.
//!
//! An immutable snapshot of the validators for one height with their voting
//! weights. Quorum thresholds are computed here in integer arithmetic.

use {solana_pubkey::Pubkey, std::collections::HashMap};

/// A single validator with its voting weight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorInfo {
    pub pubkey: Pubkey,
    pub stake: u64,
}

/// An ordered, weighted set of validators.
///
/// Validators are sorted by (stake descending, pubkey ascending) so every
/// replica iterates them in the same order.
#[derive(Debug, Clone)]
pub struct ValidatorSet {
    validators: Vec<ValidatorInfo>,
    index: HashMap<Pubkey, usize>,
    total_stake: u64,
}

impl ValidatorSet {
    /// Build a set from `(pubkey, stake)` pairs. Zero-stake entries are
    /// dropped; a repeated pubkey keeps its first entry.
    pub fn new(validators: Vec<(Pubkey, u64)>) -> Self {
        let mut infos: Vec<ValidatorInfo> = Vec::with_capacity(validators.len());
        for (pubkey, stake) in validators {
            if stake > 0 && !infos.iter().any(|v| v.pubkey == pubkey) {
                infos.push(ValidatorInfo { pubkey, stake });
            }
        }

        infos.sort_by(|a, b| b.stake.cmp(&a.stake).then_with(|| a.pubkey.cmp(&b.pubkey)));

        let total_stake = infos
            .iter()
            .fold(0u64, |acc, v| acc.saturating_add(v.stake));
        let index = infos
            .iter()
            .enumerate()
            .map(|(i, v)| (v.pubkey, i))
            .collect();

        Self {
            validators: infos,
            index,
            total_stake,
        }
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn total_stake(&self) -> u64 {
        self.total_stake
    }

    /// Returns the validator at `index` in canonical order.
    pub fn get(&self, index: usize) -> Option<&ValidatorInfo> {
        self.validators.get(index)
    }

    pub fn get_by_pubkey(&self, pubkey: &Pubkey) -> Option<&ValidatorInfo> {
        self.index.get(pubkey).and_then(|&i| self.validators.get(i))
    }

    /// Returns the stake of a validator, or 0 if not in the set.
    pub fn stake_of(&self, pubkey: &Pubkey) -> u64 {
        self.get_by_pubkey(pubkey).map_or(0, |v| v.stake)
    }

    pub fn contains(&self, pubkey: &Pubkey) -> bool {
        self.index.contains_key(pubkey)
    }

    /// `weight * 3 > total * 2`.
    pub fn is_quorum(&self, weight: u64) -> bool {
        if self.total_stake == 0 {
            return false;
        }
        u128::from(weight).saturating_mul(3) > u128::from(self.total_stake).saturating_mul(2)
    }

    /// `weight * 3 > total`. Any such set contains at least one honest
    /// validator while faults stay within bound.
    pub fn exceeds_one_third(&self, weight: u64) -> bool {
        if self.total_stake == 0 {
            return false;
        }
        u128::from(weight).saturating_mul(3) > u128::from(self.total_stake)
    }

    /// Sum the stake of `voters`, counting each known validator once.
    pub fn weight_of<'a, I>(&self, voters: I) -> u64
    where
        I: IntoIterator<Item = &'a Pubkey>,
    {
        let mut seen = std::collections::HashSet::new();
        voters
            .into_iter()
            .filter(|pk| seen.insert(**pk))
            .fold(0u64, |acc, pk| acc.saturating_add(self.stake_of(pk)))
    }

    /// Iterate validators in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = &ValidatorInfo> {
        self.validators.iter()
    }

    pub fn pubkeys(&self) -> Vec<Pubkey> {
        self.validators.iter().map(|v| v.pubkey).collect()
    }
}
