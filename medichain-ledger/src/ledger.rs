//! Append and verification over a [`LedgerStore`].

use crate::block::{Block, GENESIS_HASH, NewBlock, block_timestamp};
use crate::error::LedgerResult;
use crate::store::{BlockFilter, LedgerStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of a chain walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub total_blocks: usize,
    /// Id of the first block failing a check, if any.
    pub first_broken_block_id: Option<i64>,
}

impl ChainVerification {
    fn intact(total_blocks: usize) -> Self {
        Self {
            valid: true,
            total_blocks,
            first_broken_block_id: None,
        }
    }

    fn broken_at(total_blocks: usize, id: i64) -> Self {
        Self {
            valid: false,
            total_blocks,
            first_broken_block_id: Some(id),
        }
    }
}

/// The hash chain.
///
/// The tail read and the insert happen inside the store under the store's
/// own lock, so any number of `Ledger`s over handles to the same storage
/// never fork the chain.
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Links a new block onto the current tail (or genesis) and persists it.
    pub fn append_block(&self, entry: NewBlock) -> LedgerResult<Block> {
        let block = self.store.append_linked(entry, block_timestamp())?;

        debug!(
            block_id = block.id,
            content_ref = %block.content_ref,
            hash = %block.hash_value,
            "appended ledger block"
        );
        Ok(block)
    }

    pub fn all_blocks(&self) -> LedgerResult<Vec<Block>> {
        self.store.list_ordered()
    }

    pub fn blocks_for_patient(&self, patient_id: &str) -> LedgerResult<Vec<Block>> {
        self.store.list_filtered(BlockFilter::Patient(patient_id))
    }

    pub fn blocks_for_doctor(&self, doctor_id: &str) -> LedgerResult<Vec<Block>> {
        self.store.list_filtered(BlockFilter::Doctor(doctor_id))
    }

    /// Blocks recorded against a record, keyed by its content ref.
    pub fn blocks_for_record(&self, content_ref: &str) -> LedgerResult<Vec<Block>> {
        self.store.list_filtered(BlockFilter::ContentRef(content_ref))
    }

    /// Linkage-only check over the stored chain.
    pub fn verify_linkage(&self) -> LedgerResult<ChainVerification> {
        let result = verify_linkage(&self.store.list_ordered()?);
        log_result("linkage", &result);
        Ok(result)
    }

    /// Genesis, linkage and hash recomputation over the stored chain.
    pub fn verify_chain(&self) -> LedgerResult<ChainVerification> {
        let result = verify_chain(&self.store.list_ordered()?);
        log_result("strict", &result);
        Ok(result)
    }
}

fn log_result(mode: &str, result: &ChainVerification) {
    match result.first_broken_block_id {
        None => debug!(mode, total = result.total_blocks, "ledger chain intact"),
        Some(id) => warn!(mode, total = result.total_blocks, block_id = id, "ledger chain broken"),
    }
}

/// Checks `blocks[i].previous_hash == blocks[i - 1].hash_value` for every
/// block after the first. Blocks must be in ascending id order.
pub fn verify_linkage(blocks: &[Block]) -> ChainVerification {
    let broken = blocks
        .windows(2)
        .find(|pair| pair[1].previous_hash != pair[0].hash_value)
        .map(|pair| pair[1].id);

    match broken {
        Some(id) => ChainVerification::broken_at(blocks.len(), id),
        None => ChainVerification::intact(blocks.len()),
    }
}

/// Strict verification: the first block must link to the genesis hash, each
/// later block must link to its predecessor, and every stored hash must match
/// its recomputation. Reports the first block failing any check.
pub fn verify_chain(blocks: &[Block]) -> ChainVerification {
    let mut expected_previous = GENESIS_HASH;

    for block in blocks {
        if block.previous_hash != expected_previous || block.recompute_hash() != block.hash_value {
            return ChainVerification::broken_at(blocks.len(), block.id);
        }
        expected_previous = block.hash_value.as_str();
    }

    ChainVerification::intact(blocks.len())
}
