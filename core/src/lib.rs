//! Driver for the Tessera BFT state machine.
//!
//! [`bft_adapter::BftAdapter`] owns a
//! [`StateMachine`](tessera_consensus_bft::StateMachine) together with its
//! timeout and routes its output to action and commit sinks.
//! [`consensus_service::ConsensusService`] runs an adapter on its own thread,
//! fed by a crossbeam channel of events.

pub mod bft_adapter;
pub mod consensus_service;

pub use {
    bft_adapter::{ActionSink, AdapterOutput, BftAdapter, CommitSink},
    consensus_service::{ConsensusService, ConsensusServiceConfig, ServiceError},
};
