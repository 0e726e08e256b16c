//! Deterministic in-memory cluster of state machines.
//!
//! Messages sit in one in-flight pool and are delivered in an order drawn
//! from a seeded RNG. Before global stabilization (GST) each delivery may be
//! dropped; after it every message arrives. When nothing is in flight, time
//! "passes": one live node's pending timeout fires. After GST an idle
//! network also lets lagging nodes fetch commits they missed, which stands in
//! for block sync.
//!
//! With [`Timing`] set the cluster instead runs on a virtual clock: every
//! message takes a random delay up to a known bound, and each node's timeout
//! fires once its scheduled duration has elapsed, whether or not messages
//! are still in flight.
//!
//! The cluster records what every node sent so invariants can be checked
//! after a run.

use {
    log::*,
    rand::{rngs::StdRng, Rng, SeedableRng},
    solana_hash::Hash,
    solana_keypair::Keypair,
    solana_pubkey::Pubkey,
    solana_sha256_hasher::hashv,
    solana_signer::Signer,
    std::{
        collections::{BTreeMap, BTreeSet},
        sync::Arc,
    },
    tessera_consensus_bft::{
        Action, Block, BlockBuilder, BlockValidator, BftConfig, Commit, ConsensusEvent,
        ConsensusStep, EngineOutput, Height, PreCommit, PreVote, Result, Round, StateMachine,
        TimeoutToken, ValidatorSet,
    },
};

/// How a node behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Honest,
    /// Never sends or receives anything.
    Crashed,
    /// Runs an honest state machine but sends odd-indexed peers a vote for a
    /// different value than even-indexed peers.
    Equivocating,
}

/// Message delays on the virtual clock, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub min_delay_ms: u64,
    /// Bound on every delivery delay.
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub behaviors: Vec<Behavior>,
    pub seed: u64,
    /// Probability that a delivery before GST is dropped.
    pub drop_probability: f64,
    /// Number of deliveries or timeouts after which the network stabilizes.
    pub gst_step: usize,
    /// Probability that a delivered message is delivered a second time.
    pub duplicate_probability: f64,
    /// Heights each node runs before it stops.
    pub heights: Height,
    /// Run on a virtual clock instead of firing timeouts only when idle.
    pub timing: Option<Timing>,
}

impl ClusterConfig {
    pub fn honest(validators: usize, seed: u64) -> Self {
        Self {
            behaviors: vec![Behavior::Honest; validators],
            seed,
            drop_probability: 0.0,
            gst_step: 0,
            duplicate_probability: 0.0,
            heights: 1,
            timing: None,
        }
    }
}

/// Proposes a distinct block per (height, round, proposer).
struct RoundBlocks;

impl BlockValidator for RoundBlocks {
    fn validate_block(&self, block: &Block) -> bool {
        block.payload.len() == 4
    }
}

impl BlockBuilder for RoundBlocks {
    fn build_block(&self, height: Height, round: Round, parent_hash: Hash, proposer: Pubkey) -> Option<Block> {
        Some(Block {
            parent_hash,
            height,
            timestamp: 0,
            payload: round.to_le_bytes().to_vec(),
            proposer,
        })
    }
}

/// A vote a node sent, as recorded by the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SentVote {
    pub height: Height,
    pub round: Round,
    pub precommit: bool,
    pub value: Option<Hash>,
}

pub struct Node {
    pub keypair: Arc<Keypair>,
    pub behavior: Behavior,
    pub machine: StateMachine,
    /// Armed timeout and the virtual time it fires at.
    pending_timeout: Option<(TimeoutToken, u64)>,
    /// Blocks this node finalized, by height.
    pub commits: BTreeMap<Height, Commit>,
    /// Votes this node's machine emitted, in order.
    pub own_votes: Vec<SentVote>,
    /// Every (height, round, step) position the node passed through.
    pub positions: Vec<(Height, Round, ConsensusStep)>,
}

impl Node {
    fn position(&self) -> (Height, Round, ConsensusStep) {
        let state = self.machine.state();
        (state.height, state.round, state.step)
    }

    pub fn is_live(&self) -> bool {
        self.behavior != Behavior::Crashed
    }
}

#[derive(Debug, Clone)]
struct Envelope {
    to: usize,
    event: ConsensusEvent,
    /// Virtual time of delivery. Unused without [`Timing`].
    deliver_at: u64,
}

/// Violation found while running the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// A node finalized two different blocks at one height.
    ConflictingCommit { node: usize, height: Height },
    /// A redelivered message changed state or produced output.
    NonIdempotent { node: usize, kind: &'static str },
    /// A node's position moved backwards.
    PositionRegressed { node: usize },
}

pub struct Cluster {
    pub nodes: Vec<Node>,
    pub validators: Arc<ValidatorSet>,
    in_flight: Vec<Envelope>,
    rng: StdRng,
    config: ClusterConfig,
    steps: usize,
    /// Virtual time in milliseconds.
    now: u64,
    /// Every prevote any node sent: (height, round, value) -> voters.
    prevotes_sent: BTreeMap<(Height, Round, Option<Hash>), BTreeSet<Pubkey>>,
    pub violations: Vec<Violation>,
}

impl Cluster {
    pub fn new(config: ClusterConfig, bft_config: BftConfig) -> Result<Self> {
        let keypairs: Vec<Arc<Keypair>> = (0..config.behaviors.len())
            .map(|i| {
                let mut secret = [0u8; 32];
                secret[..8].copy_from_slice(&config.seed.to_le_bytes());
                secret[8..16].copy_from_slice(&(i as u64).to_le_bytes());
                Arc::new(Keypair::new_from_array(secret))
            })
            .collect();
        let validators = Arc::new(ValidatorSet::new(
            keypairs.iter().map(|kp| (kp.pubkey(), 100)).collect(),
        ));
        let nodes = keypairs
            .into_iter()
            .zip(config.behaviors.iter().copied())
            .map(|(keypair, behavior)| {
                let machine = StateMachine::new(
                    bft_config.clone(),
                    Arc::clone(&keypair) as Arc<dyn Signer + Send + Sync>,
                    Arc::clone(&validators),
                    Arc::new(RoundBlocks),
                )?;
                Ok(Node {
                    keypair,
                    behavior,
                    machine,
                    pending_timeout: None,
                    commits: BTreeMap::new(),
                    own_votes: Vec::new(),
                    positions: Vec::new(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            nodes,
            validators,
            in_flight: Vec::new(),
            rng: StdRng::seed_from_u64(config.seed),
            config,
            steps: 0,
            now: 0,
            prevotes_sent: BTreeMap::new(),
            violations: Vec::new(),
        })
    }

    /// Start height 1 on every live node.
    pub fn start(&mut self) {
        for i in 0..self.nodes.len() {
            if self.nodes[i].is_live() {
                let output = self.nodes[i].machine.start_new_height(1, Hash::default());
                self.absorb(i, output);
            }
        }
    }

    pub fn after_gst(&self) -> bool {
        self.steps >= self.config.gst_step
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    /// Every live honest node has finalized all configured heights.
    pub fn all_honest_done(&self) -> bool {
        self.nodes
            .iter()
            .filter(|n| n.behavior == Behavior::Honest)
            .all(|n| n.commits.contains_key(&self.config.heights))
    }

    /// Run until every honest node is done, nothing can happen, or
    /// `max_steps` is reached. Returns whether every honest node finished.
    pub fn run(&mut self, max_steps: usize) -> bool {
        while self.steps < max_steps {
            if self.all_honest_done() {
                return true;
            }
            if !self.step() {
                break;
            }
        }
        self.all_honest_done()
    }

    /// Perform one delivery or timeout. Returns false when nothing is left.
    pub fn step(&mut self) -> bool {
        self.steps += 1;
        if self.config.timing.is_some() {
            return self.step_timed();
        }
        if !self.in_flight.is_empty() {
            let index = self.rng.random_range(0..self.in_flight.len());
            let envelope = self.in_flight.swap_remove(index);
            if !self.after_gst() && self.rng.random_bool(self.config.drop_probability) {
                trace!("dropping {} to {}", envelope.event.kind(), envelope.to);
                return true;
            }
            let duplicate = self.rng.random_bool(self.config.duplicate_probability);
            self.deliver(envelope.to, envelope.event, duplicate);
            return true;
        }
        if self.after_gst() && self.sync_lagging() {
            return true;
        }
        self.fire_timeout()
    }

    // -- Internal --

    /// Deliver the earliest message or fire the earliest timeout, whichever
    /// is due first.
    fn step_timed(&mut self) -> bool {
        let next_message = self
            .in_flight
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.deliver_at)
            .map(|(index, e)| (index, e.deliver_at));
        let next_timeout = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_live())
            .filter_map(|(i, n)| n.pending_timeout.map(|(_, at)| (i, at)))
            .min_by_key(|(_, at)| *at);

        match (next_message, next_timeout) {
            (Some((index, at)), timeout) if timeout.is_none_or(|(_, t)| at <= t) => {
                self.now = self.now.max(at);
                let envelope = self.in_flight.swap_remove(index);
                if !self.after_gst() && self.rng.random_bool(self.config.drop_probability) {
                    trace!("dropping {} to {}", envelope.event.kind(), envelope.to);
                    return true;
                }
                let duplicate = self.rng.random_bool(self.config.duplicate_probability);
                self.deliver(envelope.to, envelope.event, duplicate);
                true
            }
            (_, Some((i, at))) => {
                self.now = self.now.max(at);
                self.fire(i)
            }
            // Covered by the guarded first arm: `is_none_or` holds for `None`.
            (Some(_), None) => unreachable!(),
            (None, None) => false,
        }
    }

    fn deliver(&mut self, to: usize, event: ConsensusEvent, duplicate: bool) {
        let kind = event.kind();
        let second = duplicate.then(|| event.clone());
        match self.nodes[to].machine.handle(event) {
            Ok(output) => self.absorb(to, output),
            Err(err) => trace!("node {to} rejected {kind}: {err}"),
        }
        if let Some(event) = second {
            let before = self.nodes[to].machine.state().clone();
            if let Ok(output) = self.nodes[to].machine.handle(event) {
                let unchanged = self.nodes[to].machine.state() == &before;
                if !output.is_empty() || !unchanged {
                    self.violations.push(Violation::NonIdempotent { node: to, kind });
                    self.absorb(to, output);
                }
            }
        }
    }

    fn fire_timeout(&mut self) -> bool {
        let candidates: Vec<usize> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_live() && n.pending_timeout.is_some())
            .map(|(i, _)| i)
            .collect();
        if candidates.is_empty() {
            return false;
        }
        let i = candidates[self.rng.random_range(0..candidates.len())];
        self.fire(i)
    }

    fn fire(&mut self, i: usize) -> bool {
        let Some((token, _)) = self.nodes[i].pending_timeout.take() else {
            return false;
        };
        if let Ok(output) = self.nodes[i].machine.handle(ConsensusEvent::TimeoutFired(token)) {
            self.absorb(i, output);
        }
        true
    }

    /// Hand a node stuck below the highest finalized height the commit it
    /// is missing.
    fn sync_lagging(&mut self) -> bool {
        for i in 0..self.nodes.len() {
            let node = &self.nodes[i];
            if !node.is_live() || node.machine.step() == ConsensusStep::Committed {
                continue;
            }
            let height = node.machine.height();
            let known = self
                .nodes
                .iter()
                .find_map(|n| n.commits.get(&height))
                .cloned();
            if let Some(commit) = known {
                debug!("syncing node {i} to height {height}");
                self.deliver(i, ConsensusEvent::ExternalCommit(commit), false);
                return true;
            }
        }
        false
    }

    /// Record and route everything node `from` emitted.
    fn absorb(&mut self, from: usize, output: EngineOutput) {
        let EngineOutput {
            actions,
            committed,
            timeout,
        } = output;

        for action in actions {
            self.record_vote(from, &action);
            self.broadcast(from, action);
        }
        if let Some(scheduled) = timeout {
            let duration = u64::try_from(scheduled.duration.as_millis()).unwrap_or(u64::MAX);
            self.nodes[from].pending_timeout =
                Some((scheduled.token, self.now.saturating_add(duration)));
        }
        self.check_position(from);

        let Some(commit) = committed else {
            return;
        };
        let height = commit.height();
        let node = &mut self.nodes[from];
        node.pending_timeout = None;
        match node.commits.get(&height) {
            Some(existing) if existing.block.hash() != commit.block.hash() => {
                self.violations
                    .push(Violation::ConflictingCommit { node: from, height });
            }
            Some(_) => {}
            None => {
                node.commits.insert(height, commit);
            }
        }
        if height < self.config.heights {
            if let Some(output) = self.nodes[from].machine.start_next_height() {
                self.absorb(from, output);
            }
        }
    }

    fn check_position(&mut self, i: usize) {
        let position = self.nodes[i].position();
        let node = &mut self.nodes[i];
        if let Some(last) = node.positions.last() {
            if position < *last {
                self.violations.push(Violation::PositionRegressed { node: i });
            }
        }
        if node.positions.last() != Some(&position) {
            node.positions.push(position);
        }
    }

    fn record_vote(&mut self, from: usize, action: &Action) {
        let (vote, voter) = match action {
            Action::SignedPreVote(v) => (
                SentVote {
                    height: v.pre_vote.height,
                    round: v.pre_vote.round,
                    precommit: false,
                    value: v.pre_vote.block_hash,
                },
                v.pre_vote.voter,
            ),
            Action::SignedPreCommit(v) => (
                SentVote {
                    height: v.pre_commit.height,
                    round: v.pre_commit.round,
                    precommit: true,
                    value: v.pre_commit.block_hash,
                },
                v.pre_commit.voter,
            ),
            _ => return,
        };
        if !vote.precommit {
            self.prevotes_sent
                .entry((vote.height, vote.round, vote.value))
                .or_default()
                .insert(voter);
        }
        self.nodes[from].own_votes.push(vote);
    }

    fn broadcast(&mut self, from: usize, action: Action) {
        let equivocate = self.nodes[from].behavior == Behavior::Equivocating;
        let twin = if equivocate {
            self.conflicting_twin(from, &action)
        } else {
            None
        };
        let Some(event) = ConsensusEvent::from_action(action) else {
            return;
        };
        for to in 0..self.nodes.len() {
            if to == from || !self.nodes[to].is_live() {
                continue;
            }
            let event = match &twin {
                Some(twin) if to % 2 == 1 => twin.clone(),
                _ => event.clone(),
            };
            let deliver_at = match self.config.timing {
                Some(timing) => self.now.saturating_add(
                    self.rng
                        .random_range(timing.min_delay_ms..=timing.max_delay_ms),
                ),
                None => 0,
            };
            self.in_flight.push(Envelope {
                to,
                event,
                deliver_at,
            });
        }
    }

    /// The same vote for a different value, signed by `from`.
    fn conflicting_twin(&mut self, from: usize, action: &Action) -> Option<ConsensusEvent> {
        let keypair = Arc::clone(&self.nodes[from].keypair);
        let flip = |height: Height, round: Round, value: Option<Hash>| match value {
            Some(_) => None,
            None => Some(hashv(&[b"equivocation", &height.to_le_bytes(), &round.to_le_bytes()])),
        };
        let twin = match action {
            Action::SignedPreVote(v) => {
                let vote = PreVote {
                    block_hash: flip(v.pre_vote.height, v.pre_vote.round, v.pre_vote.block_hash),
                    ..v.pre_vote.clone()
                }
                .sign(keypair.as_ref());
                self.prevotes_sent
                    .entry((vote.pre_vote.height, vote.pre_vote.round, vote.pre_vote.block_hash))
                    .or_default()
                    .insert(vote.pre_vote.voter);
                ConsensusEvent::ReceivedPreVote(vote)
            }
            Action::SignedPreCommit(v) => ConsensusEvent::ReceivedPreCommit(
                PreCommit {
                    block_hash: flip(v.pre_commit.height, v.pre_commit.round, v.pre_commit.block_hash),
                    ..v.pre_commit.clone()
                }
                .sign(keypair.as_ref()),
            ),
            _ => return None,
        };
        Some(twin)
    }

    /// Whether a prevote quorum for `value` was sent at (height, round).
    pub fn polka_sent(&self, height: Height, round: Round, value: Hash) -> bool {
        self.prevotes_sent
            .get(&(height, round, Some(value)))
            .is_some_and(|voters| self.validators.is_quorum(self.validators.weight_of(voters)))
    }

    /// Check that every non-nil vote of each honest node is allowed by its
    /// lock.
    ///
    /// A precommit for `v` at round `r` needs a polka for `v` at `r` and
    /// locks `v`. A prevote for `v` at `r` while locked on `w != v` from
    /// round `lr` needs a polka for `v` at some round in `lr..r`, and
    /// releases the lock.
    pub fn lock_violations(&self) -> Vec<(usize, SentVote)> {
        let mut violations = Vec::new();
        for (i, node) in self.nodes.iter().enumerate() {
            if node.behavior != Behavior::Honest {
                continue;
            }
            let mut locked: BTreeMap<Height, (Round, Hash)> = BTreeMap::new();
            for vote in &node.own_votes {
                let Some(value) = vote.value else {
                    continue;
                };
                if vote.precommit {
                    if !self.polka_sent(vote.height, vote.round, value) {
                        violations.push((i, *vote));
                    }
                    locked.insert(vote.height, (vote.round, value));
                    continue;
                }
                let Some((lock_round, lock_value)) = locked.get(&vote.height).copied() else {
                    continue;
                };
                if lock_value == value {
                    continue;
                }
                if !(lock_round..vote.round).any(|q| self.polka_sent(vote.height, q, value)) {
                    violations.push((i, *vote));
                }
                locked.remove(&vote.height);
            }
        }
        violations
    }

    /// Heights at which two honest nodes finalized different blocks.
    pub fn disagreements(&self) -> Vec<Height> {
        let mut by_height: BTreeMap<Height, BTreeSet<Hash>> = BTreeMap::new();
        for node in self.nodes.iter().filter(|n| n.behavior == Behavior::Honest) {
            for (height, commit) in &node.commits {
                by_height
                    .entry(*height)
                    .or_default()
                    .insert(commit.block.hash());
            }
        }
        by_height
            .into_iter()
            .filter(|(_, hashes)| hashes.len() > 1)
            .map(|(height, _)| height)
            .collect()
    }
}
