//! Adapter between the pure state machine and the outside world.
//!
//! # Data flow
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       BftAdapter                         │
//! │                                                          │
//! │  ┌──────────────┐  Action   ┌────────────┐               │
//! │  │ StateMachine │──────────▶│ ActionSink │──▶ network    │
//! │  └──────┬───────┘           └────────────┘               │
//! │         │ Commit            ┌────────────┐               │
//! │         ├──────────────────▶│ CommitSink │──▶ storage    │
//! │         │                   └────────────┘               │
//! │  ┌──────▼───────────┐                                    │
//! │  │ TimeoutScheduler │                                    │
//! │  └──────────────────┘                                    │
//! └──────────────────────────────────────────────────────────┘
//!          ▲
//!          │ ConsensusEvent (from network / timers)
//! ```
//!
//! The adapter:
//! 1. Owns the state machine and its single pending timeout.
//! 2. Dispatches every emitted [`Action`] to the action sink in order.
//! 3. Hands each finalized block to the commit sink exactly once, then
//!    starts the next height after `commit_timeout_ms`.

use {
    crossbeam_channel::Sender,
    log::*,
    solana_hash::Hash,
    solana_pubkey::Pubkey,
    std::{
        sync::Arc,
        time::{Duration, Instant},
    },
    tessera_consensus_bft::{
        action::Action,
        error::ConsensusError,
        event::ConsensusEvent,
        state_machine::{EngineOutput, StateMachine},
        timeout::TimeoutScheduler,
        types::{Block, Commit, ConsensusStep, Height, Round},
        validator_set::ValidatorSet,
    },
};

/// Receives every action the state machine emits, in emission order.
/// Must not block.
pub trait ActionSink: Send {
    fn on_action(&mut self, action: Action);
}

/// Receives each finalized block. Called once per height before the next
/// height starts.
pub trait CommitSink: Send {
    fn on_commit(&mut self, height: Height, block: &Block, commit: &Commit);
}

impl ActionSink for Sender<Action> {
    fn on_action(&mut self, action: Action) {
        if let Err(e) = self.send(action) {
            warn!("BftAdapter: failed to send outbound action: {e}");
        }
    }
}

impl CommitSink for Sender<Commit> {
    fn on_commit(&mut self, height: Height, _block: &Block, commit: &Commit) {
        if let Err(e) = self.send(commit.clone()) {
            warn!("BftAdapter: failed to deliver commit for height {height}: {e}");
        }
    }
}

/// Result of feeding one event through the adapter.
#[derive(Debug, Default)]
pub struct AdapterOutput {
    /// Number of actions dispatched to the action sink.
    pub dispatched: usize,
    /// Height finalized by this event, if any.
    pub committed: Option<Height>,
    /// Why the event was rejected, if it was.
    pub rejected: Option<ConsensusError>,
}

impl AdapterOutput {
    pub fn is_empty(&self) -> bool {
        self.dispatched == 0 && self.committed.is_none() && self.rejected.is_none()
    }
}

/// Owns a [`StateMachine`] and performs the I/O it asks for.
pub struct BftAdapter {
    machine: StateMachine,
    timeouts: TimeoutScheduler,
    actions: Box<dyn ActionSink>,
    commits: Box<dyn CommitSink>,
    /// When to start the next height after a commit.
    next_height_at: Option<Instant>,
    last_committed: Option<Height>,
}

impl BftAdapter {
    pub fn new(
        machine: StateMachine,
        actions: Box<dyn ActionSink>,
        commits: Box<dyn CommitSink>,
    ) -> Self {
        Self {
            machine,
            timeouts: TimeoutScheduler::new(),
            actions,
            commits,
            next_height_at: None,
            last_committed: None,
        }
    }

    // -- Public API --

    /// Start consensus at `height` on top of `parent_hash`.
    pub fn start_height(&mut self, height: Height, parent_hash: Hash) -> AdapterOutput {
        info!("BftAdapter: starting height {height}");
        self.next_height_at = None;
        let output = self.machine.start_new_height(height, parent_hash);
        self.process(output)
    }

    /// Feed one event to the state machine.
    pub fn handle_event(&mut self, event: ConsensusEvent) -> AdapterOutput {
        let kind = event.kind();
        let height = event.height();
        match self.machine.handle(event) {
            Ok(output) => self.process(output),
            Err(err) => {
                if err.is_byzantine() {
                    warn!("BftAdapter: {kind} for height {height} shows Byzantine behavior: {err}");
                } else {
                    debug!("BftAdapter: dropped {kind} for height {height}: {err}");
                }
                AdapterOutput {
                    rejected: Some(err),
                    ..AdapterOutput::default()
                }
            }
        }
    }

    /// Fire an expired step timeout, or start the next height once the
    /// commit timeout has passed. Call whenever the driver wakes up.
    pub fn check_timeouts(&mut self) -> AdapterOutput {
        self.check_timeouts_at(Instant::now())
    }

    pub fn check_timeouts_at(&mut self, now: Instant) -> AdapterOutput {
        if let Some(token) = self.timeouts.take_expired_at(now) {
            info!("BftAdapter: timeout expired for {token}");
            return self.handle_event(ConsensusEvent::TimeoutFired(token));
        }
        match self.next_height_at {
            Some(deadline) if now >= deadline => {
                self.next_height_at = None;
                match self.machine.start_next_height() {
                    Some(output) => {
                        info!("BftAdapter: advanced to height {}", self.machine.height());
                        self.process(output)
                    }
                    None => AdapterOutput::default(),
                }
            }
            _ => AdapterOutput::default(),
        }
    }

    /// Time until the adapter next needs [`BftAdapter::check_timeouts`].
    pub fn time_to_next_wakeup(&self) -> Option<Duration> {
        let next_height = self
            .next_height_at
            .map(|deadline| deadline.saturating_duration_since(Instant::now()));
        match (self.timeouts.remaining(), next_height) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Queue a validator set for the next height.
    pub fn update_validator_set(&mut self, validators: Arc<ValidatorSet>) {
        info!(
            "BftAdapter: updating validator set ({} validators)",
            validators.len()
        );
        self.machine.update_validator_set(validators);
    }

    // -- Accessors --

    pub fn height(&self) -> Height {
        self.machine.height()
    }

    pub fn round(&self) -> Round {
        self.machine.round()
    }

    pub fn step(&self) -> ConsensusStep {
        self.machine.step()
    }

    pub fn identity(&self) -> Pubkey {
        *self.machine.identity()
    }

    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut StateMachine {
        &mut self.machine
    }

    // -- Internal --

    fn process(&mut self, output: EngineOutput) -> AdapterOutput {
        let EngineOutput {
            actions,
            committed,
            timeout,
        } = output;

        let dispatched = actions.len();
        for action in actions {
            trace!("BftAdapter: dispatching {}", action.kind());
            self.actions.on_action(action);
        }

        match timeout {
            Some(scheduled) => self.timeouts.schedule(scheduled.token, scheduled.duration),
            None if self.machine.step() == ConsensusStep::Committed => self.timeouts.cancel(),
            None => {}
        }

        let committed = committed.and_then(|commit| self.finalize(&commit));
        AdapterOutput {
            dispatched,
            committed,
            rejected: None,
        }
    }

    fn finalize(&mut self, commit: &Commit) -> Option<Height> {
        let height = commit.height();
        if self.last_committed == Some(height) {
            return None;
        }
        info!(
            "BftAdapter: committed block {} at height {height} round {}",
            commit.block.hash(),
            commit.round()
        );
        self.commits.on_commit(height, &commit.block, commit);
        self.last_committed = Some(height);
        self.timeouts.cancel();

        let now = Instant::now();
        let delay = Duration::from_millis(self.machine.config().commit_timeout_ms);
        self.next_height_at = Some(now.checked_add(delay).unwrap_or(now));
        Some(height)
    }
}
