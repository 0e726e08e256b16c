//! The round state machine.
//!
//! Drives one height at a time through rounds of
//! `AwaitingProposal -> Prevoting -> Precommitting` until a precommit quorum
//! finalizes a block. The machine is deterministic and never blocks: each
//! [`ConsensusEvent`] is applied atomically and yields an [`EngineOutput`]
//! listing the actions to broadcast, the commit (if any) and the timeout to
//! arm. Transport, persistence and timers belong to the driver.

use {
    crate::{
        action::Action,
        app::Application,
        config::BftConfig,
        crypto::{Ed25519Verifier, PreVerified, SignatureVerifier},
        error::{ConsensusError, Result},
        event::ConsensusEvent,
        evidence::{DoubleSignEvidence, EvidenceCollector},
        lock::{Justification, Lock, LockTracker},
        proposer::{self, ProposerSelector},
        quorum::{self, CertificateError, QuorumResult},
        timeout::{ScheduledTimeout, TimeoutToken},
        types::{
            Commit, ConsensusState, ConsensusStep, Height, PreCommit, PreVote, Propose, Round,
            SignedPreCommit, SignedPreVote, SignedVote, ValidValue, VoteCertificate, VoteType,
        },
        validator_set::ValidatorSet,
        vote_cache::{Admission, HeightVotes, VoteCache},
    },
    log::*,
    solana_hash::Hash,
    solana_pubkey::Pubkey,
    solana_signer::Signer,
    std::{collections::BTreeMap, sync::Arc, time::Duration},
};

/// Result of applying one event.
#[derive(Debug, Default)]
pub struct EngineOutput {
    /// Actions to hand to the action sink, in emission order.
    pub actions: Vec<Action>,
    /// Set when this event finalized the current height.
    pub committed: Option<Commit>,
    /// Timeout for the step the machine ended in, replacing any pending one.
    pub timeout: Option<ScheduledTimeout>,
}

impl EngineOutput {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.committed.is_none() && self.timeout.is_none()
    }
}

/// Where an inbound message's height falls relative to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Current,
    Buffered,
}

/// Quorums and round-skip targets at the current height, updated as each
/// vote is admitted so no rule has to rescan every round.
#[derive(Debug, Default)]
struct RoundTally {
    /// Rounds with a prevote quorum for a block.
    polkas: BTreeMap<Round, Hash>,
    /// Rounds with a precommit quorum for a block.
    decisions: BTreeMap<Round, Hash>,
    /// Highest round in which more than a third of the stake has voted.
    skip_to: Option<Round>,
}

/// Tendermint-style round state machine for a single replica.
pub struct StateMachine {
    config: BftConfig,
    signer: Arc<dyn Signer + Send + Sync>,
    identity: Pubkey,
    /// Validator snapshot for the current height.
    validators: Arc<ValidatorSet>,
    /// Snapshot queued to take effect at the next height.
    next_validators: Option<Arc<ValidatorSet>>,
    app: Arc<dyn Application>,
    verifier: Arc<dyn SignatureVerifier>,
    select_proposer: ProposerSelector,
    state: ConsensusState,
    /// Hash of the block finalized at `height - 1`.
    parent_hash: Hash,
    locks: LockTracker,
    votes: VoteCache,
    tally: RoundTally,
    evidence: EvidenceCollector,
    committed: Option<Commit>,
}

impl StateMachine {
    /// Create a machine that signs with `signer`. Nothing happens until
    /// [`StateMachine::start_new_height`].
    pub fn new(
        config: BftConfig,
        signer: Arc<dyn Signer + Send + Sync>,
        validators: Arc<ValidatorSet>,
        app: Arc<dyn Application>,
    ) -> Result<Self> {
        config.validate()?;
        let identity = signer.pubkey();
        if !validators.contains(&identity) {
            info!("{identity} is not in the validator set; following without voting");
        }
        let mut state = ConsensusState::new(0);
        state.step = ConsensusStep::Committed;
        Ok(Self {
            config,
            signer,
            identity,
            validators,
            next_validators: None,
            app,
            verifier: Arc::new(Ed25519Verifier),
            select_proposer: proposer::proposer_for_round,
            state,
            parent_hash: Hash::default(),
            locks: LockTracker::new(),
            votes: VoteCache::new(),
            tally: RoundTally::default(),
            evidence: EvidenceCollector::new(),
            committed: None,
        })
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_proposer_selector(mut self, select_proposer: ProposerSelector) -> Self {
        self.select_proposer = select_proposer;
        self
    }

    // -- Public API --

    /// Begin `height` on top of `parent_hash` at round 0.
    ///
    /// Applies a queued validator set, prunes state below `height` and
    /// replays messages buffered for `height`. Heights never decrease; an
    /// earlier height is ignored.
    pub fn start_new_height(&mut self, height: Height, parent_hash: Hash) -> EngineOutput {
        let mut out = EngineOutput::default();
        if height < self.state.height {
            warn!(
                "refusing to move back from height {} to {height}",
                self.state.height
            );
            return out;
        }

        if let Some(next) = self.next_validators.take() {
            info!(
                "validator set for height {height}: {} validators, total stake {}",
                next.len(),
                next.total_stake()
            );
            self.validators = next;
        }

        info!("Starting consensus for height {height}");
        self.state = ConsensusState::new(height);
        self.parent_hash = parent_hash;
        self.committed = None;
        self.tally = RoundTally::default();
        self.locks.prune_below(height);
        self.votes.prune_below(height);
        self.evidence
            .prune(height.saturating_sub(self.config.evidence_retention_heights));

        let buffered = self.votes.take(height);
        self.start_round(0, &mut out);
        if let Some(buffered) = buffered {
            self.replay(buffered);
        }
        self.advance(&mut out);
        out
    }

    /// Begin the height after the one just finalized. `None` until the
    /// current height has committed.
    pub fn start_next_height(&mut self) -> Option<EngineOutput> {
        let parent_hash = self.committed.as_ref()?.block.hash();
        Some(self.start_new_height(self.state.height.saturating_add(1), parent_hash))
    }

    /// Apply one inbound event.
    ///
    /// A rejected event leaves the machine unchanged, except that a
    /// conflicting message also records double-sign evidence. Redelivered
    /// messages are accepted as no-ops.
    pub fn handle(&mut self, event: ConsensusEvent) -> Result<EngineOutput> {
        let mut out = EngineOutput::default();
        let progressed = match event {
            ConsensusEvent::ReceivedProposal(proposal) => self.admit_proposal(proposal)?,
            ConsensusEvent::ReceivedPreVote(vote) => self.admit_prevote(vote)?,
            ConsensusEvent::ReceivedPreCommit(vote) => self.admit_precommit(vote)?,
            ConsensusEvent::TimeoutFired(token) => self.on_timeout(token, &mut out),
            ConsensusEvent::ExternalCommit(commit) => {
                self.on_external_commit(commit, &mut out)?;
                false
            }
        };
        if progressed {
            self.advance(&mut out);
        }
        Ok(out)
    }

    /// Queue `validators` to take effect at the next height.
    pub fn update_validator_set(&mut self, validators: Arc<ValidatorSet>) {
        self.next_validators = Some(validators);
    }

    /// Whether this replica proposes at (height, round) under the current
    /// validator set.
    pub fn is_proposer(&self, height: Height, round: Round) -> bool {
        proposer::is_proposer(
            self.select_proposer,
            &self.validators,
            &self.identity,
            height,
            round,
        )
    }

    /// Token of the timeout for the machine's current position.
    pub fn current_token(&self) -> TimeoutToken {
        TimeoutToken {
            height: self.state.height,
            round: self.state.round,
            step: self.state.step,
        }
    }

    // -- Accessors --

    pub fn state(&self) -> &ConsensusState {
        &self.state
    }

    pub fn height(&self) -> Height {
        self.state.height
    }

    pub fn round(&self) -> Round {
        self.state.round
    }

    pub fn step(&self) -> ConsensusStep {
        self.state.step
    }

    pub fn identity(&self) -> &Pubkey {
        &self.identity
    }

    pub fn validator_set(&self) -> &Arc<ValidatorSet> {
        &self.validators
    }

    pub fn config(&self) -> &BftConfig {
        &self.config
    }

    pub fn parent_hash(&self) -> Hash {
        self.parent_hash
    }

    /// The commit for the current height, once finalized.
    pub fn committed(&self) -> Option<&Commit> {
        self.committed.as_ref()
    }

    pub fn current_lock(&self) -> Option<Lock> {
        self.locks.current_lock(self.state.height)
    }

    pub fn evidence(&self) -> &EvidenceCollector {
        &self.evidence
    }

    pub fn evidence_mut(&mut self) -> &mut EvidenceCollector {
        &mut self.evidence
    }

    /// Messages admitted so far for the current height.
    pub fn votes(&self) -> Option<&HeightVotes> {
        self.votes.height(self.state.height)
    }

    // -- Admission --

    fn classify(&self, height: Height) -> Result<Slot> {
        let current = self.state.height;
        if height < current {
            return Err(ConsensusError::StaleMessage { height, current });
        }
        if height == current {
            return Ok(Slot::Current);
        }
        if height.saturating_sub(current) > self.config.future_height_window {
            return Err(ConsensusError::FutureHeight { height, current });
        }
        Ok(Slot::Buffered)
    }

    fn check_round(&self, slot: Slot, round: Round) -> Result<()> {
        let current = match slot {
            Slot::Current => self.state.round,
            Slot::Buffered => 0,
        };
        if round.saturating_sub(current) > self.config.future_round_window {
            return Err(ConsensusError::FutureRound { round, current });
        }
        Ok(())
    }

    fn validators_for(&self, height: Height) -> Arc<ValidatorSet> {
        match &self.next_validators {
            Some(next) if height > self.state.height => Arc::clone(next),
            _ => Arc::clone(&self.validators),
        }
    }

    /// Returns `true` if the proposal is new and for the current height.
    fn admit_proposal(&mut self, proposal: Propose) -> Result<bool> {
        let slot = self.classify(proposal.height)?;
        self.check_round(slot, proposal.round)?;
        let validators = self.validators_for(proposal.height);

        if !proposer::is_proposer(
            self.select_proposer,
            &validators,
            &proposal.proposer,
            proposal.height,
            proposal.round,
        ) {
            return Err(ConsensusError::UnauthorizedProposer {
                height: proposal.height,
                round: proposal.round,
                sender: proposal.proposer,
            });
        }
        if proposal.block.height != proposal.height {
            return Err(ConsensusError::InvalidBlock {
                height: proposal.height,
                reason: "block height differs from proposal height",
            });
        }
        if !self
            .verifier
            .verify(&proposal.proposer, &proposal.signing_bytes(), &proposal.signature)
        {
            return Err(ConsensusError::InvalidSignature {
                kind: "proposal",
                sender: proposal.proposer,
            });
        }
        if let Some(cert) = &proposal.last_commit {
            let covers_block = cert.vote_type == VoteType::PreVote
                && cert.height == proposal.height
                && cert.round < proposal.round
                && cert.block_hash == Some(proposal.block.hash());
            if !covers_block {
                return Err(CertificateError::NotApplicable.into());
            }
            quorum::verify_certificate(cert, &validators, self.verifier.as_ref())?;
        }

        let admission = self.votes.height_mut(proposal.height).insert_proposal(&proposal);
        self.settle(admission, slot, |existing| {
            DoubleSignEvidence::from_proposals(existing, &proposal)
        })
    }

    fn admit_prevote(&mut self, vote: SignedPreVote) -> Result<bool> {
        let slot = self.classify(vote.height())?;
        self.check_round(slot, vote.round())?;
        let stake = self.authenticate(&vote)?;
        let admission = self.votes.height_mut(vote.height()).insert_prevote(&vote, stake);
        let progressed = self.settle(admission, slot, |existing| {
            DoubleSignEvidence::from_votes(existing, &vote)
        })?;
        if progressed {
            self.count_vote(VoteType::PreVote, vote.round());
        }
        Ok(progressed)
    }

    fn admit_precommit(&mut self, vote: SignedPreCommit) -> Result<bool> {
        let slot = self.classify(vote.height())?;
        self.check_round(slot, vote.round())?;
        let stake = self.authenticate(&vote)?;
        let admission = self.votes.height_mut(vote.height()).insert_precommit(&vote, stake);
        let progressed = self.settle(admission, slot, |existing| {
            DoubleSignEvidence::from_votes(existing, &vote)
        })?;
        if progressed {
            self.count_vote(VoteType::PreCommit, vote.round());
        }
        Ok(progressed)
    }

    /// Returns the voter's stake.
    fn authenticate<V: SignedVote>(&self, vote: &V) -> Result<u64> {
        let validators = self.validators_for(vote.height());
        let stake = validators.stake_of(vote.voter());
        if stake == 0 {
            return Err(ConsensusError::UnauthorizedVoter(*vote.voter()));
        }
        if !self
            .verifier
            .verify(vote.voter(), &vote.signing_bytes(), vote.signature())
        {
            let kind = match V::VOTE_TYPE {
                VoteType::PreVote => "prevote",
                VoteType::PreCommit => "precommit",
            };
            return Err(ConsensusError::InvalidSignature {
                kind,
                sender: *vote.voter(),
            });
        }
        Ok(stake)
    }

    /// Update the round tally after a vote at `round` of the current height
    /// was stored.
    fn count_vote(&mut self, vote_type: VoteType, round: Round) {
        let height = self.state.height;
        let Some(votes) = self.votes.height(height) else {
            return;
        };
        if round > self.state.round
            && self.validators.exceeds_one_third(votes.round_weight(round))
            && self.tally.skip_to.is_none_or(|r| r < round)
        {
            self.tally.skip_to = Some(round);
        }
        let validators = self.validators.as_ref();
        let (result, quorums) = match vote_type {
            VoteType::PreVote => (
                quorum::evaluate(votes.prevotes(round), height, round, validators, &PreVerified),
                &mut self.tally.polkas,
            ),
            VoteType::PreCommit => (
                quorum::evaluate(votes.precommits(round), height, round, validators, &PreVerified),
                &mut self.tally.decisions,
            ),
        };
        if let QuorumResult::Quorum(Some(hash)) = result {
            quorums.insert(round, hash);
        }
    }

    fn settle<T>(
        &mut self,
        admission: Admission<T>,
        slot: Slot,
        evidence: impl FnOnce(&T) -> DoubleSignEvidence,
    ) -> Result<bool> {
        match admission {
            Admission::Inserted => Ok(slot == Slot::Current),
            Admission::Duplicate => Ok(false),
            Admission::Conflicting(existing) => {
                let evidence = evidence(&existing);
                if self.evidence.record(evidence.clone()) {
                    warn!(
                        "double sign by {} at height {} round {}: {}",
                        evidence.validator, evidence.height, evidence.round, evidence.kind
                    );
                }
                Err(evidence.into())
            }
        }
    }

    fn replay(&mut self, buffered: HeightVotes) {
        let (proposals, prevotes, precommits) = buffered.into_messages();
        debug!(
            "replaying {} proposals, {} prevotes, {} precommits buffered for height {}",
            proposals.len(),
            prevotes.len(),
            precommits.len(),
            self.state.height
        );
        for proposal in proposals {
            if let Err(err) = self.admit_proposal(proposal) {
                debug!("dropping buffered proposal: {err}");
            }
        }
        for vote in prevotes {
            if let Err(err) = self.admit_prevote(vote) {
                debug!("dropping buffered prevote: {err}");
            }
        }
        for vote in precommits {
            if let Err(err) = self.admit_precommit(vote) {
                debug!("dropping buffered precommit: {err}");
            }
        }
    }

    // -- Timeouts and external commits --

    fn on_timeout(&mut self, token: TimeoutToken, out: &mut EngineOutput) -> bool {
        if token != self.current_token() {
            debug!("ignoring stale timeout {token}");
            return false;
        }
        match token.step {
            ConsensusStep::AwaitingProposal => {
                info!(
                    "no proposal for height {} round {}; prevoting nil",
                    token.height, token.round
                );
                self.cast_prevote(None, out);
            }
            ConsensusStep::Prevoting => self.cast_precommit(None, out),
            ConsensusStep::Precommitting => self.start_round(token.round.saturating_add(1), out),
            ConsensusStep::Committed => return false,
        }
        true
    }

    fn on_external_commit(&mut self, commit: Commit, out: &mut EngineOutput) -> Result<()> {
        let height = commit.height();
        if self.classify(height)? == Slot::Buffered {
            return Err(ConsensusError::FutureHeight {
                height,
                current: self.state.height,
            });
        }
        if !commit.is_well_formed() {
            return Err(CertificateError::NotApplicable.into());
        }
        if let Some(committed) = &self.committed {
            let (finalized, received) = (committed.block.hash(), commit.block.hash());
            if finalized == received {
                return Ok(());
            }
            quorum::verify_certificate(
                &commit.certificate,
                &self.validators,
                self.verifier.as_ref(),
            )?;
            warn!(
                "conflicting commit at height {height}: finalized {finalized} at round {}, \
                 received {received} at round {}",
                committed.round(),
                commit.round()
            );
            return Err(ConsensusError::ConflictingCommit {
                height,
                committed: finalized,
                received,
            });
        }
        if self.state.step == ConsensusStep::Committed {
            return Ok(());
        }
        if commit.block.parent_hash != self.parent_hash {
            return Err(ConsensusError::InvalidBlock {
                height,
                reason: "commit does not extend the last committed block",
            });
        }
        quorum::verify_certificate(&commit.certificate, &self.validators, self.verifier.as_ref())?;

        if let Some(lock) = self.locks.current_lock(height) {
            if commit.certificate.block_hash != Some(lock.block_hash) {
                if let Err(err) = self.locks.unlock(
                    height,
                    commit.round(),
                    Justification::Commit(&commit),
                    &self.validators,
                    &PreVerified,
                ) {
                    debug!("lock at height {height} outlived external commit: {err}");
                }
            }
        }

        info!(
            "height {height} finalized by external commit of {} at round {}",
            commit.block.hash(),
            commit.round()
        );
        self.finalize(commit, false, out);
        Ok(())
    }

    // -- Transitions --

    /// Apply every rule that fires until none does.
    fn advance(&mut self, out: &mut EngineOutput) {
        loop {
            if self.state.step == ConsensusStep::Committed || self.try_commit(out) {
                return;
            }
            self.update_valid_value();
            let progressed = match self.state.step {
                ConsensusStep::AwaitingProposal => self.try_prevote_on_proposal(out),
                ConsensusStep::Prevoting => self.try_precommit_on_polka(out),
                ConsensusStep::Precommitting => self.try_next_round_on_nil_quorum(out),
                ConsensusStep::Committed => false,
            } || self.try_skip_round(out);
            if !progressed {
                return;
            }
        }
    }

    /// A precommit quorum for a known block at any round of this height
    /// finalizes it.
    fn try_commit(&mut self, out: &mut EngineOutput) -> bool {
        let height = self.state.height;
        let Some(votes) = self.votes.height(height) else {
            return false;
        };
        let decided = self.tally.decisions.iter().find_map(|(round, hash)| {
            let block = votes.block_by_hash(hash)?;
            let certificate =
                VoteCertificate::from_votes(height, *round, Some(*hash), votes.precommits(*round));
            Some(Commit {
                block: block.clone(),
                certificate,
            })
        });
        let Some(commit) = decided else {
            return false;
        };

        info!(
            "Committed block {} at height {height} round {} (current round {})",
            commit.block.hash(),
            commit.round(),
            self.state.round
        );
        self.finalize(commit, true, out);
        true
    }

    fn finalize(&mut self, commit: Commit, broadcast: bool, out: &mut EngineOutput) {
        self.state.step = ConsensusStep::Committed;
        self.committed = Some(commit.clone());
        if broadcast {
            out.actions.push(Action::Commit(commit.clone()));
        }
        out.committed = Some(commit);
        out.timeout = None;
    }

    /// Track the most recent round with a prevote quorum for a known block.
    fn update_valid_value(&mut self) {
        let height = self.state.height;
        let Some(votes) = self.votes.height(height) else {
            return;
        };
        let floor = self.state.valid.map(|v| v.round);
        let newest = self
            .tally
            .polkas
            .range(..=self.state.round)
            .rev()
            .take_while(|(round, _)| floor.is_none_or(|f| **round > f))
            .find(|(_, hash)| votes.block_by_hash(hash).is_some())
            .map(|(round, hash)| ValidValue {
                round: *round,
                block_hash: *hash,
            });
        if let Some(valid) = newest {
            debug!(
                "valid value at height {height}: {} from round {}",
                valid.block_hash, valid.round
            );
            self.state.valid = Some(valid);
        }
    }

    fn try_prevote_on_proposal(&mut self, out: &mut EngineOutput) -> bool {
        let (height, round) = (self.state.height, self.state.round);
        let Some(proposal) = self
            .votes
            .height(height)
            .and_then(|votes| votes.proposal(round))
            .cloned()
        else {
            return false;
        };
        let value = self.prevote_value(&proposal);
        self.cast_prevote(value, out);
        true
    }

    /// Decide the prevote for `proposal`: the block if it is acceptable and
    /// the lock allows it, nil otherwise.
    fn prevote_value(&mut self, proposal: &Propose) -> Option<Hash> {
        let height = self.state.height;
        let block_hash = proposal.block.hash();

        if proposal.block.parent_hash != self.parent_hash {
            debug!("proposal {block_hash} at height {height} does not extend {}", self.parent_hash);
            return None;
        }
        if !self.app.validate_block(&proposal.block) {
            debug!("application rejected proposal {block_hash} at height {height}");
            return None;
        }

        let Some(lock) = self.locks.current_lock(height) else {
            return Some(block_hash);
        };
        if lock.block_hash == block_hash {
            return Some(block_hash);
        }
        let Some(cert) = &proposal.last_commit else {
            info!(
                "locked on {} from round {}; prevoting nil for {block_hash}",
                lock.block_hash, lock.round
            );
            return None;
        };
        match self.locks.unlock(
            height,
            cert.round,
            Justification::Quorum(cert),
            &self.validators,
            self.verifier.as_ref(),
        ) {
            Ok(_) => {
                info!(
                    "released lock on {} for {block_hash} justified at round {}",
                    lock.block_hash, cert.round
                );
                Some(block_hash)
            }
            Err(err) => {
                info!("keeping lock on {}: {err}", lock.block_hash);
                None
            }
        }
    }

    fn try_precommit_on_polka(&mut self, out: &mut EngineOutput) -> bool {
        let (height, round) = (self.state.height, self.state.round);
        let Some(votes) = self.votes.height(height) else {
            return false;
        };
        let result = quorum::evaluate(
            votes.prevotes(round),
            height,
            round,
            &self.validators,
            &PreVerified,
        );
        let value = match result {
            QuorumResult::NoQuorum => return false,
            QuorumResult::Quorum(None) => None,
            QuorumResult::Quorum(Some(hash)) => {
                let known = votes
                    .block_by_hash(&hash)
                    .is_some_and(|block| block.parent_hash == self.parent_hash);
                if !known {
                    debug!("polka for unknown block {hash} at height {height} round {round}");
                    return false;
                }
                let polka = VoteCertificate::from_votes(height, round, Some(hash), votes.prevotes(round));
                self.relock(hash, &polka).then_some(hash)
            }
        };
        self.cast_precommit(value, out);
        true
    }

    /// Lock on `hash` at the current round, first releasing a lock on a
    /// different block with `polka`.
    fn relock(&mut self, hash: Hash, polka: &VoteCertificate) -> bool {
        let (height, round) = (self.state.height, self.state.round);
        if let Some(lock) = self.locks.current_lock(height) {
            if lock.block_hash != hash {
                if let Err(err) = self.locks.unlock(
                    height,
                    round,
                    Justification::Quorum(polka),
                    &self.validators,
                    &PreVerified,
                ) {
                    warn!("cannot move lock to {hash}: {err}");
                    return false;
                }
            }
        }
        match self.locks.lock(height, round, hash) {
            Ok(()) => {
                debug!("locked on {hash} at height {height} round {round}");
                true
            }
            Err(err) => {
                warn!("cannot lock on {hash}: {err}");
                false
            }
        }
    }

    fn try_next_round_on_nil_quorum(&mut self, out: &mut EngineOutput) -> bool {
        let (height, round) = (self.state.height, self.state.round);
        let Some(votes) = self.votes.height(height) else {
            return false;
        };
        let result = quorum::evaluate(
            votes.precommits(round),
            height,
            round,
            &self.validators,
            &PreVerified,
        );
        if result != QuorumResult::Quorum(None) {
            return false;
        }
        info!("nil precommit quorum at height {height} round {round}");
        self.start_round(round.saturating_add(1), out);
        true
    }

    /// Jump to the highest later round in which more than a third of the
    /// weight has voted.
    fn try_skip_round(&mut self, out: &mut EngineOutput) -> bool {
        let (height, round) = (self.state.height, self.state.round);
        let Some(target) = self.tally.skip_to.filter(|target| *target > round) else {
            return false;
        };
        info!("skipping from round {round} to {target} at height {height}");
        self.start_round(target, out);
        true
    }

    fn start_round(&mut self, round: Round, out: &mut EngineOutput) {
        let height = self.state.height;
        self.state.advance_round(round);
        if round >= self.config.max_rounds_per_height {
            warn!(
                "height {height} reached round {round} (max_rounds_per_height {})",
                self.config.max_rounds_per_height
            );
        }
        info!("Starting round {round} at height {height}");
        self.enter_step(ConsensusStep::AwaitingProposal, out);
        if self.is_proposer(height, round) {
            self.propose(out);
        }
    }

    /// Re-propose the valid value with its prevote certificate, or build a
    /// fresh block.
    fn propose(&mut self, out: &mut EngineOutput) {
        let (height, round) = (self.state.height, self.state.round);
        let reproposal = self.state.valid.and_then(|valid| {
            let votes = self.votes.height(height)?;
            let block = votes.block_by_hash(&valid.block_hash)?.clone();
            let cert = VoteCertificate::from_votes(
                height,
                valid.round,
                Some(valid.block_hash),
                votes.prevotes(valid.round),
            );
            Some((block, cert))
        });

        let (block, last_commit) = match reproposal {
            Some((block, cert)) => (block, Some(cert)),
            None => match self
                .app
                .build_block(height, round, self.parent_hash, self.identity)
            {
                Some(block) if block.height == height => (block, None),
                Some(block) => {
                    warn!(
                        "block builder returned height {} while proposing at {height}",
                        block.height
                    );
                    return;
                }
                None => {
                    warn!("block builder produced no block for height {height} round {round}");
                    return;
                }
            },
        };

        let proposal = Propose::new_signed(height, round, block, last_commit, self.signer.as_ref());
        info!(
            "Proposing block {} at height {height} round {round}{}",
            proposal.block.hash(),
            if proposal.last_commit.is_some() { " (valid value)" } else { "" }
        );
        match self.votes.height_mut(height).insert_proposal(&proposal) {
            Admission::Inserted => out.actions.push(Action::Propose(proposal)),
            _ => warn!("proposal slot for height {height} round {round} already taken"),
        }
    }

    fn cast_prevote(&mut self, value: Option<Hash>, out: &mut EngineOutput) {
        let (height, round) = (self.state.height, self.state.round);
        if self.validators.contains(&self.identity) {
            let vote = PreVote {
                height,
                round,
                block_hash: value,
                voter: self.identity,
            }
            .sign(self.signer.as_ref());
            let stake = self.validators.stake_of(&self.identity);
            match self.votes.height_mut(height).insert_prevote(&vote, stake) {
                Admission::Inserted => {
                    self.count_vote(VoteType::PreVote, round);
                    out.actions.push(Action::SignedPreVote(vote));
                }
                _ => warn!("already prevoted at height {height} round {round}"),
            }
        }
        self.enter_step(ConsensusStep::Prevoting, out);
    }

    fn cast_precommit(&mut self, value: Option<Hash>, out: &mut EngineOutput) {
        let (height, round) = (self.state.height, self.state.round);
        if self.validators.contains(&self.identity) {
            let vote = PreCommit {
                height,
                round,
                block_hash: value,
                voter: self.identity,
            }
            .sign(self.signer.as_ref());
            let stake = self.validators.stake_of(&self.identity);
            match self.votes.height_mut(height).insert_precommit(&vote, stake) {
                Admission::Inserted => {
                    self.count_vote(VoteType::PreCommit, round);
                    out.actions.push(Action::SignedPreCommit(vote));
                }
                _ => warn!("already precommitted at height {height} round {round}"),
            }
        }
        self.enter_step(ConsensusStep::Precommitting, out);
    }

    fn enter_step(&mut self, step: ConsensusStep, out: &mut EngineOutput) {
        self.state.step = step;
        out.timeout = Some(ScheduledTimeout {
            token: self.current_token(),
            duration: Duration::from_millis(self.config.timeout_ms(step, self.state.round)),
        });
    }
}
