//! Tessera BFT Consensus Service
//!
//! A long-running service that drives the BFT consensus loop. It:
//!
//! 1. Drains inbound [`ConsensusEvent`]s from a channel.
//! 2. Feeds them to the [`BftAdapter`], which dispatches outbound actions.
//! 3. Wakes for the nearest step timeout or next-height deadline.
//! 4. Stops when the exit flag is raised or the inbound channel closes.
//!
//! The service thread is the only place events are applied, so the state
//! machine sees one linear sequence of events.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────────────────────────────────────────┐
//!  │              ConsensusService                    │
//!  │                                                  │
//!  │  ┌────────────┐    ┌────────────┐                │
//!  │  │ Event RX   │───▶│ BftAdapter │──▶ Action TX   │
//!  │  │ (inbound)  │    │            │──▶ Commit TX   │
//!  │  └────────────┘    └─────┬──────┘                │
//!  │                          │                       │
//!  │                    ┌─────▼──────┐                │
//!  │                    │ Timeouts   │                │
//!  │                    └────────────┘                │
//!  └──────────────────────────────────────────────────┘
//! ```

use {
    crate::bft_adapter::{BftAdapter, CommitSink},
    crossbeam_channel::{Receiver, RecvTimeoutError, Sender},
    log::*,
    solana_hash::Hash,
    solana_signer::Signer,
    std::{
        io,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        thread::{self, Builder, JoinHandle},
        time::Duration,
    },
    tessera_consensus_bft::{
        action::Action,
        app::Application,
        config::BftConfig,
        error::ConsensusError,
        event::ConsensusEvent,
        state_machine::StateMachine,
        types::Height,
        validator_set::ValidatorSet,
    },
    thiserror::Error,
};

/// Upper bound on how long the loop sleeps, so the exit flag stays
/// responsive.
const EXIT_POLL_INTERVAL_MS: u64 = 50;

/// Configuration for the consensus service.
#[derive(Debug, Clone)]
pub struct ConsensusServiceConfig {
    /// State machine configuration.
    pub bft_config: BftConfig,
    /// First height to run, usually the latest committed + 1.
    pub start_height: Height,
    /// Hash of the block at `start_height - 1`.
    pub parent_hash: Hash,
}

impl Default for ConsensusServiceConfig {
    fn default() -> Self {
        Self {
            bft_config: BftConfig::default(),
            start_height: 1,
            parent_hash: Hash::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to create state machine: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("failed to spawn consensus thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Runs the BFT event loop on a dedicated thread.
pub struct ConsensusService {
    thread: JoinHandle<()>,
}

impl ConsensusService {
    /// Create and start the consensus service.
    ///
    /// # Arguments
    ///
    /// * `config` - Service configuration including BFT params.
    /// * `signer` - This validator's signing identity.
    /// * `validators` - Validator set for `config.start_height`.
    /// * `app` - Block validation and construction.
    /// * `event_receiver` - Inbound events from the network layer.
    /// * `action_sender` - Outbound actions to broadcast.
    /// * `commit_sink` - Receives each finalized block.
    /// * `exit` - Global shutdown flag.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ConsensusServiceConfig,
        signer: Arc<dyn Signer + Send + Sync>,
        validators: Arc<ValidatorSet>,
        app: Arc<dyn Application>,
        event_receiver: Receiver<ConsensusEvent>,
        action_sender: Sender<Action>,
        commit_sink: Box<dyn CommitSink>,
        exit: Arc<AtomicBool>,
    ) -> Result<Self, ServiceError> {
        let machine = StateMachine::new(config.bft_config, signer, validators, app)?;
        let mut adapter = BftAdapter::new(machine, Box::new(action_sender), commit_sink);
        let start_height = config.start_height;
        let parent_hash = config.parent_hash;

        let thread = Builder::new()
            .name("tesseraBftConsensus".to_string())
            .spawn(move || {
                Self::run(&mut adapter, start_height, parent_hash, &event_receiver, &exit);
            })?;

        Ok(Self { thread })
    }

    /// Join the consensus service thread.
    pub fn join(self) -> thread::Result<()> {
        self.thread.join()
    }

    /// Main consensus loop.
    fn run(
        adapter: &mut BftAdapter,
        start_height: Height,
        parent_hash: Hash,
        event_receiver: &Receiver<ConsensusEvent>,
        exit: &AtomicBool,
    ) {
        info!(
            "ConsensusService: starting at height {start_height} (identity: {})",
            adapter.identity()
        );
        adapter.start_height(start_height, parent_hash);

        let poll_interval = Duration::from_millis(EXIT_POLL_INTERVAL_MS);
        loop {
            if exit.load(Ordering::Relaxed) {
                info!("ConsensusService: exit signal received, shutting down");
                break;
            }

            let wait = adapter
                .time_to_next_wakeup()
                .map_or(poll_interval, |d| d.min(poll_interval));

            match event_receiver.recv_timeout(wait) {
                Ok(event) => {
                    trace!(
                        "ConsensusService: received {} for height {}",
                        event.kind(),
                        event.height()
                    );
                    adapter.handle_event(event);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("ConsensusService: event channel disconnected, shutting down");
                    break;
                }
            }

            // Deadlines can pass while events keep arriving.
            adapter.check_timeouts();
        }

        info!(
            "ConsensusService: consensus loop exited at height {}",
            adapter.height()
        );
    }
}
