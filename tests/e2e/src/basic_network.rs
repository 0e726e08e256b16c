//! E2E Test: Basic Validator Networks
//!
//! Verifies fundamental network operations:
//! - Equal-stake and weighted networks finalize consecutive heights
//! - Every node finalizes the same block at each height
//! - Finalized blocks form a hash chain
//! - Proposers rotate across heights

use {
    std::{collections::HashSet, time::Duration},
    tessera_consensus_bft::{proposer_for_round, BftConfig},
    tessera_e2e_tests::helpers::*,
};

const WAIT: Duration = Duration::from_secs(20);

#[test]
fn test_four_equal_validators_finalize_ten_heights() {
    init_logging();
    println!("\n========================================");
    println!("  BASIC NETWORK: 4 validators, 10 heights");
    println!("========================================\n");

    // Generous timeouts keep every height in round 0.
    let config = BftConfig {
        propose_timeout_base_ms: 2_000,
        prevote_timeout_base_ms: 1_000,
        precommit_timeout_base_ms: 1_000,
        ..fast_config()
    };
    let mut net = TestNetwork::start(&[100; 4], &[], config);
    assert!(net.wait_for_height(10, WAIT), "network stalled");
    net.assert_agreement();
    println!("✓ All 4 validators finalized heights 1..=10 identically");

    // Every block extends the previous one.
    let commits = net.commits(0).clone();
    for height in 2..=10 {
        let parent = commits[&(height - 1)].block.hash();
        assert_eq!(commits[&height].block.parent_hash, parent);
    }
    println!("✓ Finalized blocks form a hash chain");

    assert!(commits.values().all(|c| c.round() == 0));

    let proposers: HashSet<_> = commits.values().map(|c| c.block.proposer).collect();
    assert_eq!(proposers.len(), 4);
    println!("✓ All 4 validators proposed a finalized block");

    net.shutdown();
}

#[test]
fn test_weighted_three_validator_network() {
    init_logging();

    // A quorum needs the largest validator plus one other.
    let mut net = TestNetwork::start(&[1_000, 2_000, 3_000], &[], fast_config());
    assert!(net.wait_for_height(6, WAIT), "network stalled");
    net.assert_agreement();

    let commits = net.commits(1).clone();
    for (height, commit) in &commits {
        if *height > 6 {
            break;
        }
        let expected = proposer_for_round(&net.validators, *height, commit.round());
        assert_eq!(Some(commit.block.proposer), expected);
        // Every precommit carried in the certificate is from a member.
        assert!(commit
            .certificate
            .signatures
            .iter()
            .all(|(pk, _)| net.validators.contains(pk)));
    }
    println!("✓ Weighted network finalized 6 heights with scheduled proposers");

    net.shutdown();
}

#[test]
fn test_single_validator_network() {
    init_logging();
    let mut net = TestNetwork::start(&[42], &[], fast_config());
    assert!(net.wait_for_height(5, WAIT));
    let commits = net.commits(0);
    assert!(commits.len() >= 5);
    assert!(commits.values().all(|c| c.certificate.signatures.len() == 1));
    net.shutdown();
}
