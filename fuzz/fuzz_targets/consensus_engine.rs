//! Fuzz the BFT state machine with random event sequences.
//!
//! Goals:
//! - Find panics or invalid state transitions.
//! - Verify that no two different blocks are committed at the same height.
//! - Verify that (height, round) never moves backwards.
//! - Verify that redelivering an accepted message is a no-op.

#![no_main]

use {
    arbitrary::{Arbitrary, Unstructured},
    libfuzzer_sys::fuzz_target,
    solana_hash::Hash,
    solana_keypair::Keypair,
    solana_pubkey::Pubkey,
    solana_signature::Signature,
    solana_signer::Signer,
    std::{collections::HashMap, sync::Arc},
    tessera_consensus_bft::{
        crypto::PreVerified, proposer_for_round, BftConfig, Block, ConsensusEvent, ConsensusStep,
        EmptyBlocks, PreCommit, PreVote, Propose, SignedPreCommit, SignedPreVote, StateMachine,
        TimeoutToken, ValidatorSet, VoteCertificate, VoteType,
    },
};

/// A fuzzable event the machine can receive.
#[derive(Debug)]
enum FuzzAction {
    /// Deliver a proposal, from the scheduled proposer unless `forged`.
    Proposal {
        forged: bool,
        proposer_idx: usize,
        payload: u8,
        round_offset: u8,
        with_certificate: bool,
    },
    /// Deliver a prevote for one of a few candidate values.
    Prevote {
        voter_idx: usize,
        value: u8,
        round_offset: u8,
    },
    Precommit {
        voter_idx: usize,
        value: u8,
        round_offset: u8,
    },
    /// Fire a timeout, either the current one or a stale one.
    Timeout { current: bool, step_idx: u8 },
    /// Redeliver the last accepted message.
    Redeliver,
    /// Start the next height if committed, else an arbitrary one.
    NewHeight { height: u64 },
}

impl<'a> Arbitrary<'a> for FuzzAction {
    fn arbitrary(u: &mut Unstructured<'a>) -> arbitrary::Result<Self> {
        let variant = u.int_in_range(0..=5)?;
        match variant {
            0 => Ok(FuzzAction::Proposal {
                forged: u.ratio(1, 8)?,
                proposer_idx: u.int_in_range(0..=7)?,
                payload: u.int_in_range(0..=2)?,
                round_offset: u.int_in_range(0..=2)?,
                with_certificate: u.ratio(1, 4)?,
            }),
            1 => Ok(FuzzAction::Prevote {
                voter_idx: u.int_in_range(0..=7)?,
                value: u.int_in_range(0..=3)?,
                round_offset: u.int_in_range(0..=3)?,
            }),
            2 => Ok(FuzzAction::Precommit {
                voter_idx: u.int_in_range(0..=7)?,
                value: u.int_in_range(0..=3)?,
                round_offset: u.int_in_range(0..=3)?,
            }),
            3 => Ok(FuzzAction::Timeout {
                current: u.ratio(3, 4)?,
                step_idx: u.int_in_range(0..=3)?,
            }),
            4 => Ok(FuzzAction::Redeliver),
            5 => Ok(FuzzAction::NewHeight {
                height: u.int_in_range(0..=1000)?,
            }),
            _ => unreachable!(),
        }
    }
}

const STEPS: [ConsensusStep; 4] = [
    ConsensusStep::AwaitingProposal,
    ConsensusStep::Prevoting,
    ConsensusStep::Precommitting,
    ConsensusStep::Committed,
];

fn make_block(height: u64, payload: u8, proposer: Pubkey) -> Block {
    Block {
        parent_hash: Hash::default(),
        height,
        timestamp: 1000,
        payload: vec![payload],
        proposer,
    }
}

/// Candidate value `0` is nil, others are blocks with that payload.
fn candidate(height: u64, value: u8, proposer: Pubkey) -> Option<Hash> {
    (value != 0).then(|| make_block(height, value, proposer).hash())
}

fuzz_target!(|data: &[u8]| {
    let mut u = Unstructured::new(data);

    let num_validators: usize = match u.int_in_range(1..=8) {
        Ok(n) => n,
        Err(_) => return,
    };

    let validator_pks: Vec<Pubkey> = (0..num_validators)
        .map(|i| {
            let mut bytes = [0u8; 32];
            bytes[0] = i as u8;
            bytes[31] = 0xAA; // marker
            Pubkey::new_from_array(bytes)
        })
        .collect();

    let stakes: Vec<u64> = (0..num_validators)
        .map(|_| u.int_in_range(1..=1000).unwrap_or(100))
        .collect();

    let vs = Arc::new(ValidatorSet::new(
        validator_pks
            .iter()
            .zip(stakes.iter())
            .map(|(pk, s)| (*pk, *s))
            .collect(),
    ));

    // We fuzz as a non-validator observer signing with a throwaway key, so
    // every validator vote comes from the fuzzer. Signatures are not checked.
    let signer = Arc::new(Keypair::new());
    let Ok(machine) = StateMachine::new(
        BftConfig::default(),
        signer,
        Arc::clone(&vs),
        Arc::new(EmptyBlocks),
    ) else {
        return;
    };
    let mut machine = machine.with_verifier(Arc::new(PreVerified));
    let _ = machine.start_new_height(1, Hash::default());

    let mut committed_at_height: HashMap<u64, Hash> = HashMap::new();
    let mut last_accepted: Option<ConsensusEvent> = None;
    let mut last_position = (machine.height(), machine.round());

    let num_actions: usize = u.int_in_range(1..=300).unwrap_or(50);

    for _ in 0..num_actions {
        let action: FuzzAction = match u.arbitrary() {
            Ok(a) => a,
            Err(_) => break,
        };

        let height = machine.height();
        let round = machine.round();
        let proposer_of = |r: u32| proposer_for_round(&vs, height, r).unwrap_or_default();

        let event = match action {
            FuzzAction::Proposal {
                forged,
                proposer_idx,
                payload,
                round_offset,
                with_certificate,
            } => {
                let r = round.saturating_add(u32::from(round_offset));
                let proposer = if forged {
                    validator_pks[proposer_idx % num_validators]
                } else {
                    proposer_of(r)
                };
                let block = make_block(height, payload.saturating_add(1), proposer_of(0));
                let last_commit = (with_certificate && r > 0).then(|| VoteCertificate {
                    vote_type: VoteType::PreVote,
                    height,
                    round: r.saturating_sub(1),
                    block_hash: Some(block.hash()),
                    signatures: validator_pks
                        .iter()
                        .map(|pk| (*pk, Signature::default()))
                        .collect(),
                });
                ConsensusEvent::ReceivedProposal(Propose {
                    height,
                    round: r,
                    block,
                    proposer,
                    signature: Signature::default(),
                    last_commit,
                })
            }
            FuzzAction::Prevote {
                voter_idx,
                value,
                round_offset,
            } => ConsensusEvent::ReceivedPreVote(SignedPreVote {
                pre_vote: PreVote {
                    height,
                    round: round.saturating_add(u32::from(round_offset)),
                    block_hash: candidate(height, value, proposer_of(0)),
                    voter: validator_pks[voter_idx % num_validators],
                },
                signature: Signature::default(),
            }),
            FuzzAction::Precommit {
                voter_idx,
                value,
                round_offset,
            } => ConsensusEvent::ReceivedPreCommit(SignedPreCommit {
                pre_commit: PreCommit {
                    height,
                    round: round.saturating_add(u32::from(round_offset)),
                    block_hash: candidate(height, value, proposer_of(0)),
                    voter: validator_pks[voter_idx % num_validators],
                },
                signature: Signature::default(),
            }),
            FuzzAction::Timeout { current, step_idx } => {
                let token = if current {
                    machine.current_token()
                } else {
                    TimeoutToken {
                        height,
                        round,
                        step: STEPS[usize::from(step_idx) % STEPS.len()],
                    }
                };
                ConsensusEvent::TimeoutFired(token)
            }
            FuzzAction::Redeliver => {
                let Some(event) = last_accepted.clone() else {
                    continue;
                };
                let before = machine.state().clone();
                if let Ok(output) = machine.handle(event) {
                    assert!(output.is_empty(), "redelivery produced output");
                    assert_eq!(machine.state(), &before, "redelivery changed state");
                }
                continue;
            }
            FuzzAction::NewHeight { height } => {
                let output = match machine.start_next_height() {
                    Some(output) => output,
                    None => machine.start_new_height(height, Hash::default()),
                };
                assert!(output.committed.is_none() || machine.step() == ConsensusStep::Committed);
                last_accepted = None;
                last_position = (machine.height(), machine.round());
                continue;
            }
        };

        let is_message = !matches!(event, ConsensusEvent::TimeoutFired(_));
        let retained = is_message.then(|| event.clone());
        let Ok(output) = machine.handle(event) else {
            continue;
        };
        if retained.is_some() {
            last_accepted = retained;
        }

        // INVARIANT: no two different blocks committed at the same height.
        if let Some(commit) = output.committed {
            let hash = commit.block.hash();
            if let Some(previous) = committed_at_height.insert(commit.height(), hash) {
                assert_eq!(previous, hash, "conflicting commits at height {}", commit.height());
            }
            assert_eq!(machine.step(), ConsensusStep::Committed);
            assert!(output.timeout.is_none());
        }

        // INVARIANT: position never regresses within a height.
        let position = (machine.height(), machine.round());
        assert!(position >= last_position, "position regressed");
        last_position = position;
    }
});
