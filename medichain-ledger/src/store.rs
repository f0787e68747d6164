//! Ledger persistence seam and the in-memory implementation.

use crate::block::{Block, GENESIS_HASH, NewBlock};
use crate::error::{LedgerError, LedgerResult};
use chrono::{DateTime, Utc};
use std::sync::RwLock;

/// Which blocks a filtered listing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockFilter<'a> {
    Patient(&'a str),
    Doctor(&'a str),
    ContentRef(&'a str),
}

impl BlockFilter<'_> {
    pub fn matches(&self, block: &Block) -> bool {
        match self {
            BlockFilter::Patient(id) => block.patient_id == *id,
            BlockFilter::Doctor(id) => block.doctor_id == *id,
            BlockFilter::ContentRef(r) => block.content_ref == *r,
        }
    }
}

/// Persistence for committed blocks.
///
/// Stores assign ids on [`append_linked`](LedgerStore::append_linked) and
/// list in ascending id order.
pub trait LedgerStore: Send + Sync {
    /// The block with the highest id, if any.
    fn tail(&self) -> LedgerResult<Option<Block>>;

    /// Links `entry` onto the current tail (or genesis), hashes it at
    /// `timestamp` and persists it.
    ///
    /// Reading the tail and writing the block must happen under one lock
    /// shared by every handle onto the same storage, so that no two appends
    /// ever link onto the same tail.
    fn append_linked(&self, entry: NewBlock, timestamp: DateTime<Utc>) -> LedgerResult<Block>;

    fn list_ordered(&self) -> LedgerResult<Vec<Block>>;

    fn list_filtered(&self, filter: BlockFilter<'_>) -> LedgerResult<Vec<Block>> {
        Ok(self
            .list_ordered()?
            .into_iter()
            .filter(|b| filter.matches(b))
            .collect())
    }
}

/// Vec-backed store for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    blocks: RwLock<Vec<Block>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store with existing blocks, e.g. a chain loaded elsewhere.
    pub fn with_blocks(mut blocks: Vec<Block>) -> Self {
        blocks.sort_by_key(|b| b.id);
        Self {
            blocks: RwLock::new(blocks),
        }
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn tail(&self) -> LedgerResult<Option<Block>> {
        let blocks = self.blocks.read().map_err(|_| LedgerError::LockPoisoned)?;
        Ok(blocks.last().cloned())
    }

    fn append_linked(&self, entry: NewBlock, timestamp: DateTime<Utc>) -> LedgerResult<Block> {
        let mut blocks = self.blocks.write().map_err(|_| LedgerError::LockPoisoned)?;
        let (id, previous_hash) = match blocks.last() {
            Some(tail) => (tail.id + 1, tail.hash_value.clone()),
            None => (1, GENESIS_HASH.to_string()),
        };
        let block = entry.seal(previous_hash, timestamp).with_id(id);
        blocks.push(block.clone());
        Ok(block)
    }

    fn list_ordered(&self) -> LedgerResult<Vec<Block>> {
        let blocks = self.blocks.read().map_err(|_| LedgerError::LockPoisoned)?;
        Ok(blocks.clone())
    }
}
