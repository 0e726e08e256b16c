//! Consensus BFT benchmarks.
//!
//! Measures:
//! - Propose → commit cycle timing, signatures verified
//! - Vote admission throughput (prevotes, precommits)
//! - Quorum evaluation over a round's votes
//! - Validator set sizes: 50, 100, 200

use {
    criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput},
    solana_hash::Hash,
    std::hint::black_box,
    tessera_bench::helpers::{
        make_observer, make_validator_set, make_weighted_validator_set, quorum_size, signed_round,
    },
    tessera_consensus_bft::{
        crypto::{Ed25519Verifier, PreVerified},
        quorum, ConsensusEvent, ValidatorSet,
    },
};

const SIZES: [usize; 3] = [50, 100, 200];

fn bench_propose_commit_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("consensus/propose_commit_cycle");
    group.sample_size(20);

    for &n_validators in &SIZES {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("validators", n_validators),
            &n_validators,
            |b, &n| {
                let (vs, keypairs) = make_validator_set(n);
                let round = signed_round(&vs, &keypairs, 1, 0, quorum_size(n));

                b.iter_batched(
                    || {
                        let mut machine = make_observer(vs.clone());
                        machine.start_new_height(1, Hash::default());
                        machine
                    },
                    |mut machine| {
                        machine
                            .handle(ConsensusEvent::ReceivedProposal(round.proposal.clone()))
                            .ok();
                        for vote in &round.prevotes {
                            machine
                                .handle(ConsensusEvent::ReceivedPreVote(vote.clone()))
                                .ok();
                        }
                        for vote in &round.precommits {
                            machine
                                .handle(ConsensusEvent::ReceivedPreCommit(vote.clone()))
                                .ok();
                        }
                        assert!(machine.committed().is_some());
                        machine
                    },
                    BatchSize::SmallInput,
                );
            },
        );
    }
    group.finish();
}

fn bench_prevote_admission_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("consensus/prevote_throughput");
    group.sample_size(20);

    for &n_validators in &SIZES {
        group.throughput(Throughput::Elements(n_validators as u64));
        group.bench_with_input(
            BenchmarkId::new("validators", n_validators),
            &n_validators,
            |b, &n| {
                let (vs, keypairs) = make_validator_set(n);
                let round = signed_round(&vs, &keypairs, 1, 0, n);

                b.iter_batched(
                    || {
                        let mut machine = make_observer(vs.clone());
                        machine.start_new_height(1, Hash::default());
                        machine
                            .handle(ConsensusEvent::ReceivedProposal(round.proposal.clone()))
                            .ok();
                        machine
                    },
                    |mut machine| {
                        for vote in &round.prevotes {
                            machine
                                .handle(ConsensusEvent::ReceivedPreVote(vote.clone()))
                                .ok();
                        }
                        machine
                    },
                    BatchSize::SmallInput,
                );
            },
        );
    }
    group.finish();
}

fn bench_precommit_admission_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("consensus/precommit_throughput");
    group.sample_size(20);

    for &n_validators in &SIZES {
        group.throughput(Throughput::Elements(n_validators as u64));
        group.bench_with_input(
            BenchmarkId::new("validators", n_validators),
            &n_validators,
            |b, &n| {
                let (vs, keypairs) = make_validator_set(n);
                let round = signed_round(&vs, &keypairs, 1, 0, n);

                b.iter_batched(
                    || {
                        // Reach Precommitting before the measured section.
                        let mut machine = make_observer(vs.clone());
                        machine.start_new_height(1, Hash::default());
                        machine
                            .handle(ConsensusEvent::ReceivedProposal(round.proposal.clone()))
                            .ok();
                        for vote in &round.prevotes {
                            machine
                                .handle(ConsensusEvent::ReceivedPreVote(vote.clone()))
                                .ok();
                        }
                        machine
                    },
                    |mut machine| {
                        for vote in &round.precommits {
                            machine
                                .handle(ConsensusEvent::ReceivedPreCommit(vote.clone()))
                                .ok();
                        }
                        machine
                    },
                    BatchSize::SmallInput,
                );
            },
        );
    }
    group.finish();
}

fn bench_quorum_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("consensus/quorum_evaluation");

    for &n_validators in &SIZES {
        group.throughput(Throughput::Elements(n_validators as u64));
        let (vs, keypairs) = make_weighted_validator_set(n_validators);
        let round = signed_round(&vs, &keypairs, 1, 0, n_validators);

        group.bench_with_input(
            BenchmarkId::new("verified", n_validators),
            &round.prevotes,
            |b, votes| b.iter(|| quorum::evaluate(black_box(votes), 1, 0, &vs, &Ed25519Verifier)),
        );
        group.bench_with_input(
            BenchmarkId::new("pre_verified", n_validators),
            &round.prevotes,
            |b, votes| b.iter(|| quorum::evaluate(black_box(votes), 1, 0, &vs, &PreVerified)),
        );
    }
    group.finish();
}

fn bench_validator_set_creation(c: &mut Criterion) {
    let mut group = c.benchmark_group("consensus/validator_set_creation");

    for &n_validators in &[50usize, 100, 200, 500] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("validators", n_validators),
            &n_validators,
            |b, &n| {
                let (vs, _keypairs) = make_weighted_validator_set(n);
                let validators: Vec<_> = vs.iter().map(|v| (v.pubkey, v.stake)).collect();

                b.iter(|| ValidatorSet::new(validators.clone()));
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_propose_commit_cycle,
    bench_prevote_admission_throughput,
    bench_precommit_admission_throughput,
    bench_quorum_evaluation,
    bench_validator_set_creation,
);
criterion_main!(benches);
