//! Proposer selection.
//!
//! Every replica must agree on the proposer of each (height, round). The
//! selection function is pluggable through [`ProposerSelector`]; the default
//! is a deterministic stake-weighted round-robin.

use {
    crate::{
        types::{Height, Round},
        validator_set::ValidatorSet,
    },
    solana_pubkey::Pubkey,
};

/// Chooses the proposer for a (height, round). Must be a pure function of
/// its inputs.
pub type ProposerSelector = fn(&ValidatorSet, Height, Round) -> Option<Pubkey>;

/// Deterministic proposer selection weighted by stake.
///
/// # Algorithm
///
/// 1. Divide every stake by the gcd of all stakes, so equal stakes behave
///    like unit stakes and rotate every round.
/// 2. `target = (height + round) % normalized_total`.
/// 3. Walk validators in canonical order accumulating normalized stake; the
///    first whose running sum exceeds `target` proposes.
pub fn proposer_for_round(validator_set: &ValidatorSet, height: Height, round: Round) -> Option<Pubkey> {
    let divisor = validator_set
        .iter()
        .map(|v| v.stake)
        .fold(0u64, gcd);
    if divisor == 0 {
        return None;
    }

    let normalized_total = validator_set.total_stake().checked_div(divisor)?;
    let seed = height.wrapping_add(u64::from(round));
    let target = seed.checked_rem(normalized_total)?;

    let mut accumulated: u64 = 0;
    for validator in validator_set.iter() {
        let weight = validator.stake.checked_div(divisor).unwrap_or(0);
        accumulated = accumulated.saturating_add(weight);
        if accumulated > target {
            return Some(validator.pubkey);
        }
    }

    validator_set.get(0).map(|v| v.pubkey)
}

/// Check whether `identity` proposes at (height, round) under `selector`.
pub fn is_proposer(
    selector: ProposerSelector,
    validator_set: &ValidatorSet,
    identity: &Pubkey,
    height: Height,
    round: Round,
) -> bool {
    selector(validator_set, height, round).is_some_and(|p| p == *identity)
}

fn gcd(a: u64, b: u64) -> u64 {
    let (mut a, mut b) = (a, b);
    while b != 0 {
        let r = a.checked_rem(b).unwrap_or(0);
        a = b;
        b = r;
    }
    a
}
