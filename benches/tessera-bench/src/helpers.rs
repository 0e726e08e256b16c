//! Shared helpers for Tessera benchmarks.

use {
    solana_hash::Hash,
    solana_keypair::Keypair,
    solana_pubkey::Pubkey,
    solana_signer::Signer,
    std::sync::Arc,
    tessera_consensus_bft::{
        proposer_for_round, BftConfig, Block, EmptyBlocks, PreCommit, PreVote, Propose, SignedPreCommit,
        SignedPreVote, StateMachine, ValidatorSet,
    },
};

/// Create a validator set of `n` validators with equal stake.
pub fn make_validator_set(n: usize) -> (Arc<ValidatorSet>, Vec<Keypair>) {
    let keypairs: Vec<Keypair> = (0..n).map(|_| Keypair::new()).collect();
    let validators: Vec<(Pubkey, u64)> = keypairs
        .iter()
        .map(|kp| (kp.pubkey(), 1_000_000))
        .collect();
    (Arc::new(ValidatorSet::new(validators)), keypairs)
}

/// Create a validator set with weighted stakes.
pub fn make_weighted_validator_set(n: usize) -> (Arc<ValidatorSet>, Vec<Keypair>) {
    let keypairs: Vec<Keypair> = (0..n).map(|_| Keypair::new()).collect();
    let validators: Vec<(Pubkey, u64)> = keypairs
        .iter()
        .enumerate()
        .map(|(i, kp)| {
            // Give descending stakes so the first validators have more weight
            let stake = ((n.saturating_sub(i)) as u64).saturating_mul(1_000_000);
            (kp.pubkey(), stake)
        })
        .collect();
    (Arc::new(ValidatorSet::new(validators)), keypairs)
}

/// Number of equal-stake votes needed for a quorum out of `n`.
pub fn quorum_size(n: usize) -> usize {
    n.saturating_mul(2) / 3 + 1
}

/// A machine that observes the set without being a member, so it never
/// proposes or votes itself.
pub fn make_observer(validators: Arc<ValidatorSet>) -> StateMachine {
    StateMachine::new(
        BftConfig::default(),
        Arc::new(Keypair::new()),
        validators,
        Arc::new(EmptyBlocks),
    )
    .expect("default config is valid")
}

/// Every message of one successful round, signed by real keys.
pub struct SignedRound {
    pub proposal: Propose,
    pub prevotes: Vec<SignedPreVote>,
    pub precommits: Vec<SignedPreCommit>,
}

/// Sign a proposal from the scheduled proposer plus prevotes and precommits
/// for it from the first `voters` keypairs.
pub fn signed_round(
    validators: &ValidatorSet,
    keypairs: &[Keypair],
    height: u64,
    round: u32,
    voters: usize,
) -> SignedRound {
    let proposer_pk = proposer_for_round(validators, height, round).expect("non-empty set");
    let proposer = keypairs
        .iter()
        .find(|kp| kp.pubkey() == proposer_pk)
        .expect("proposer is a member");
    let block = Block {
        parent_hash: Hash::default(),
        height,
        timestamp: 1_700_000_000_000,
        payload: vec![0u8; 256],
        proposer: proposer_pk,
    };
    let block_hash = Some(block.hash());
    let proposal = Propose::new_signed(height, round, block, None, proposer);

    let prevotes = keypairs
        .iter()
        .take(voters)
        .map(|kp| {
            PreVote {
                height,
                round,
                block_hash,
                voter: kp.pubkey(),
            }
            .sign(kp)
        })
        .collect();
    let precommits = keypairs
        .iter()
        .take(voters)
        .map(|kp| {
            PreCommit {
                height,
                round,
                block_hash,
                voter: kp.pubkey(),
            }
            .sign(kp)
        })
        .collect();

    SignedRound {
        proposal,
        prevotes,
        precommits,
    }
}
