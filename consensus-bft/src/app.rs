//! Hooks into the application that owns block content.
//!
//! The consensus core never interprets a payload. It asks the application
//! whether a proposed block is acceptable and, when proposing, for a block
//! to propose.

use {
    crate::types::{Block, Height, Round},
    solana_hash::Hash,
    solana_pubkey::Pubkey,
    std::time::{SystemTime, UNIX_EPOCH},
};

/// Yes/no oracle for proposed block content. Must be deterministic across
/// honest replicas and must not block.
pub trait BlockValidator: Send + Sync {
    fn validate_block(&self, block: &Block) -> bool;
}

/// Produces blocks when this replica proposes.
pub trait BlockBuilder: Send + Sync {
    /// Build a block at `height` on top of `parent_hash`. `None` skips the
    /// proposal; peers will time out and move on.
    fn build_block(&self, height: Height, round: Round, parent_hash: Hash, proposer: Pubkey) -> Option<Block>;
}

/// Both hooks together, as held by the state machine.
pub trait Application: BlockValidator + BlockBuilder {}

impl<T: BlockValidator + BlockBuilder> Application for T {}

/// Accepts every block and proposes empty ones stamped with wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyBlocks;

impl BlockValidator for EmptyBlocks {
    fn validate_block(&self, _block: &Block) -> bool {
        true
    }
}

impl BlockBuilder for EmptyBlocks {
    fn build_block(&self, height: Height, _round: Round, parent_hash: Hash, proposer: Pubkey) -> Option<Block> {
        Some(Block {
            parent_hash,
            height,
            timestamp: unix_millis(),
            payload: Vec::new(),
            proposer,
        })
    }
}

/// Milliseconds since the Unix epoch, saturating.
pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}
