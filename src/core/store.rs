// Copyright (c) 2026 Phinet Contributors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! The append-only block store consensus reads and writes directly (C8).
//!
//! This is distinct from `core::snapshot`, which persists periodic warm
//! restart snapshots of the whole chain; `ChainStore` is the live store
//! consensus consults on every proposal and vote.

use crate::core::types::{Block, BlockStatus, H256};
use std::collections::BTreeMap;
use std::sync::RwLock;
use thiserror::Error;

/// Chain store errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Appending would violate append-only/slot-ordering invariants.
    #[error("chain integrity violation")]
    ChainIntegrityViolation,
    /// Underlying storage backend is unavailable.
    #[error("store backend unavailable")]
    BackendUnavailable,
}

/// The append-only store consensus uses to read and write blocks.
pub trait ChainStore: Send + Sync {
    /// Insert `block` at `status`, keyed by its hash. A second block at an
    /// already-occupied slot is recorded alongside the first rather than
    /// overwriting it — `hashes_at_slot` then reports both, and it is up
    /// to the caller (the consensus engine's equivocation handling) to
    /// `set_status` the loser to `Rejected`. Chain linkage (`prev_hash`
    /// and slot continuity against the current head) is enforced by the
    /// consensus engine before a proposal reaches this call, not here.
    fn put_block(&self, block: Block, status: BlockStatus) -> Result<(), StoreError>;

    /// Update the status of an already-stored block.
    fn set_status(&self, hash: &H256, status: BlockStatus) -> Result<(), StoreError>;

    /// Fetch a block by hash.
    fn get_block(&self, hash: &H256) -> Result<Option<Block>, StoreError>;

    /// Fetch a block's status by hash.
    fn get_status(&self, hash: &H256) -> Result<Option<BlockStatus>, StoreError>;

    /// All block hashes recorded for `slot` (more than one means a fork
    /// was observed at that slot).
    fn hashes_at_slot(&self, slot: u64) -> Result<Vec<H256>, StoreError>;

    /// The highest slot for which any block is stored, or `None` if empty.
    fn head_slot(&self) -> Result<Option<u64>, StoreError>;

    /// The finalized chain tip: the highest-slot block with
    /// `BlockStatus::Finalized`.
    fn finalized_tip(&self) -> Result<Option<Block>, StoreError>;

    /// Drop every block recorded at `slot`. Used only by [`ChainStore::compact`].
    fn remove_slot(&self, slot: u64) -> Result<(), StoreError>;

    /// The canonical block at the head slot, preferring the most-advanced
    /// status when a slot briefly holds more than one block (a fork still
    /// being resolved).
    fn head(&self) -> Result<Option<Block>, StoreError> {
        match self.head_slot()? {
            Some(slot) => self.by_slot(slot),
            None => Ok(None),
        }
    }

    /// The canonical block stored at `slot`, if any. When a slot holds more
    /// than one hash (a fork), the block with the most-advanced status wins;
    /// ties are broken by the lexicographically smaller hash, matching the
    /// fork detector's heaviest-branch tie-break.
    fn by_slot(&self, slot: u64) -> Result<Option<Block>, StoreError> {
        let mut best: Option<(Block, BlockStatus)> = None;
        for hash in self.hashes_at_slot(slot)? {
            let (Some(block), Some(status)) = (self.get_block(&hash)?, self.get_status(&hash)?)
            else {
                continue;
            };
            let replace = match &best {
                None => true,
                Some((b, s)) => {
                    status_rank(status)
                        .cmp(&status_rank(*s))
                        .then_with(|| b.hash.cmp(&block.hash))
                        == std::cmp::Ordering::Greater
                }
            };
            if replace {
                best = Some((block, status));
            }
        }
        Ok(best.map(|(b, _)| b))
    }

    /// The `k` most recent canonical blocks, newest first, starting from
    /// `head_slot` and walking backward. Stops early if history runs out.
    fn recent(&self, k: usize) -> Result<Vec<Block>, StoreError> {
        let Some(head_slot) = self.head_slot()? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::with_capacity(k);
        let mut slot = head_slot;
        loop {
            if out.len() >= k {
                break;
            }
            if let Some(block) = self.by_slot(slot)? {
                out.push(block);
            }
            match slot.checked_sub(1) {
                Some(prev) => slot = prev,
                None => break,
            }
        }
        Ok(out)
    }

    /// Full invariant walk over the canonical (highest-status-per-slot)
    /// chain: every block's `prev_hash` must equal its predecessor's hash
    /// and its `slot` must be exactly one past the predecessor's.
    fn verify(&self) -> Result<(), StoreError> {
        let Some(head_slot) = self.head_slot()? else {
            return Ok(());
        };
        let mut slot = head_slot;
        let mut child: Option<Block> = self.by_slot(slot)?;
        loop {
            if slot == 0 {
                break;
            }
            let Some(current) = child else { break };
            let prev_slot = slot - 1;
            match self.by_slot(prev_slot)? {
                Some(parent) => {
                    if current.prev_hash != parent.hash || current.slot != parent.slot + 1 {
                        return Err(StoreError::ChainIntegrityViolation);
                    }
                    child = Some(parent);
                }
                None => {
                    // No recorded parent (possibly compacted away); nothing
                    // further back to check.
                    break;
                }
            }
            slot = prev_slot;
        }
        Ok(())
    }

    /// Bounded-history compaction: once the head slot exceeds
    /// `high_water_mark`, drop the oldest half of stored slots, but only if
    /// every block in that range is `Finalized`. Returns the number of
    /// slots removed (zero if the mark hasn't been reached, or if any
    /// candidate slot isn't fully finalized).
    fn compact(&self, high_water_mark: u64) -> Result<u64, StoreError> {
        let Some(head_slot) = self.head_slot()? else {
            return Ok(0);
        };
        if head_slot <= high_water_mark {
            return Ok(0);
        }
        let cutoff = head_slot / 2;
        for slot in 0..=cutoff {
            for hash in self.hashes_at_slot(slot)? {
                match self.get_status(&hash)? {
                    Some(BlockStatus::Finalized) => {}
                    _ => return Ok(0),
                }
            }
        }
        for slot in 0..=cutoff {
            self.remove_slot(slot)?;
        }
        Ok(cutoff + 1)
    }
}

fn status_rank(status: BlockStatus) -> u8 {
    match status {
        BlockStatus::Rejected => 0,
        BlockStatus::Proposed => 1,
        BlockStatus::Confirmed => 2,
        BlockStatus::Finalized => 3,
    }
}

#[derive(Default)]
struct Inner {
    blocks: BTreeMap<H256, (Block, BlockStatus)>,
    by_slot: BTreeMap<u64, Vec<H256>>,
}

/// In-memory chain store, for tests and ephemeral nodes.
#[derive(Default)]
pub struct InMemoryChainStore {
    inner: RwLock<Inner>,
}

impl InMemoryChainStore {
    /// A fresh, empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChainStore for InMemoryChainStore {
    fn put_block(&self, block: Block, status: BlockStatus) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::BackendUnavailable)?;
        let hash = block.hash;
        let slot = block.slot;
        inner.blocks.insert(hash, (block, status));
        let at_slot = inner.by_slot.entry(slot).or_default();
        if !at_slot.contains(&hash) {
            at_slot.push(hash);
        }
        Ok(())
    }

    fn set_status(&self, hash: &H256, status: BlockStatus) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::BackendUnavailable)?;
        match inner.blocks.get_mut(hash) {
            Some((_, s)) => {
                *s = status;
                Ok(())
            }
            None => Err(StoreError::ChainIntegrityViolation),
        }
    }

    fn get_block(&self, hash: &H256) -> Result<Option<Block>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::BackendUnavailable)?;
        Ok(inner.blocks.get(hash).map(|(b, _)| b.clone()))
    }

    fn get_status(&self, hash: &H256) -> Result<Option<BlockStatus>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::BackendUnavailable)?;
        Ok(inner.blocks.get(hash).map(|(_, s)| *s))
    }

    fn hashes_at_slot(&self, slot: u64) -> Result<Vec<H256>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::BackendUnavailable)?;
        Ok(inner.by_slot.get(&slot).cloned().unwrap_or_default())
    }

    fn head_slot(&self) -> Result<Option<u64>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::BackendUnavailable)?;
        Ok(inner.by_slot.keys().next_back().copied())
    }

    fn finalized_tip(&self) -> Result<Option<Block>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::BackendUnavailable)?;
        Ok(inner
            .blocks
            .values()
            .filter(|(_, status)| matches!(status, BlockStatus::Finalized))
            .max_by_key(|(b, _)| b.slot)
            .map(|(b, _)| b.clone()))
    }

    fn remove_slot(&self, slot: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::BackendUnavailable)?;
        if let Some(hashes) = inner.by_slot.remove(&slot) {
            for hash in hashes {
                inner.blocks.remove(&hash);
            }
        }
        Ok(())
    }
}

const TREE_BLOCKS: &str = "blocks";
const TREE_STATUS: &str = "status";
const TREE_BY_SLOT: &str = "by_slot";

/// Sled-backed chain store, for durable nodes that must survive restarts
/// without replaying the entire gossip history.
pub struct SledChainStore {
    db: sled::Db,
}

impl SledChainStore {
    /// Open (or create) a sled database at `path`.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|_| StoreError::BackendUnavailable)?;
        Ok(Self { db })
    }

    fn tree(&self, name: &str) -> Result<sled::Tree, StoreError> {
        self.db.open_tree(name).map_err(|_| StoreError::BackendUnavailable)
    }
}

impl ChainStore for SledChainStore {
    fn put_block(&self, block: Block, status: BlockStatus) -> Result<(), StoreError> {
        let blocks = self.tree(TREE_BLOCKS)?;
        let statuses = self.tree(TREE_STATUS)?;
        let by_slot = self.tree(TREE_BY_SLOT)?;

        let hash = block.hash;
        let slot = block.slot;
        let block_bytes = bincode::serialize(&block).map_err(|_| StoreError::BackendUnavailable)?;
        blocks.insert(hash.as_bytes(), block_bytes).map_err(|_| StoreError::BackendUnavailable)?;
        statuses
            .insert(hash.as_bytes(), bincode::serialize(&status).map_err(|_| StoreError::BackendUnavailable)?)
            .map_err(|_| StoreError::BackendUnavailable)?;

        let mut hashes: Vec<H256> = by_slot
            .get(slot.to_be_bytes())
            .map_err(|_| StoreError::BackendUnavailable)?
            .and_then(|v| bincode::deserialize(&v).ok())
            .unwrap_or_default();
        if !hashes.contains(&hash) {
            hashes.push(hash);
        }
        by_slot
            .insert(slot.to_be_bytes(), bincode::serialize(&hashes).map_err(|_| StoreError::BackendUnavailable)?)
            .map_err(|_| StoreError::BackendUnavailable)?;
        Ok(())
    }

    fn set_status(&self, hash: &H256, status: BlockStatus) -> Result<(), StoreError> {
        let statuses = self.tree(TREE_STATUS)?;
        if !statuses.contains_key(hash.as_bytes()).map_err(|_| StoreError::BackendUnavailable)? {
            return Err(StoreError::ChainIntegrityViolation);
        }
        statuses
            .insert(hash.as_bytes(), bincode::serialize(&status).map_err(|_| StoreError::BackendUnavailable)?)
            .map_err(|_| StoreError::BackendUnavailable)?;
        Ok(())
    }

    fn get_block(&self, hash: &H256) -> Result<Option<Block>, StoreError> {
        let blocks = self.tree(TREE_BLOCKS)?;
        let raw = blocks.get(hash.as_bytes()).map_err(|_| StoreError::BackendUnavailable)?;
        Ok(raw.and_then(|v| bincode::deserialize(&v).ok()))
    }

    fn get_status(&self, hash: &H256) -> Result<Option<BlockStatus>, StoreError> {
        let statuses = self.tree(TREE_STATUS)?;
        let raw = statuses.get(hash.as_bytes()).map_err(|_| StoreError::BackendUnavailable)?;
        Ok(raw.and_then(|v| bincode::deserialize(&v).ok()))
    }

    fn hashes_at_slot(&self, slot: u64) -> Result<Vec<H256>, StoreError> {
        let by_slot = self.tree(TREE_BY_SLOT)?;
        let raw = by_slot.get(slot.to_be_bytes()).map_err(|_| StoreError::BackendUnavailable)?;
        Ok(raw.and_then(|v| bincode::deserialize(&v).ok()).unwrap_or_default())
    }

    fn head_slot(&self) -> Result<Option<u64>, StoreError> {
        let by_slot = self.tree(TREE_BY_SLOT)?;
        match by_slot.iter().keys().next_back() {
            Some(Ok(k)) => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&k);
                Ok(Some(u64::from_be_bytes(buf)))
            }
            Some(Err(_)) => Err(StoreError::BackendUnavailable),
            None => Ok(None),
        }
    }

    fn finalized_tip(&self) -> Result<Option<Block>, StoreError> {
        let blocks = self.tree(TREE_BLOCKS)?;
        let statuses = self.tree(TREE_STATUS)?;
        let mut best: Option<Block> = None;
        for item in blocks.iter() {
            let (k, v) = item.map_err(|_| StoreError::BackendUnavailable)?;
            let status_raw = statuses.get(&k).map_err(|_| StoreError::BackendUnavailable)?;
            let Some(status_raw) = status_raw else { continue };
            let status: BlockStatus = bincode::deserialize(&status_raw).map_err(|_| StoreError::BackendUnavailable)?;
            if !matches!(status, BlockStatus::Finalized) {
                continue;
            }
            let block: Block = bincode::deserialize(&v).map_err(|_| StoreError::BackendUnavailable)?;
            if best.as_ref().map(|b| block.slot > b.slot).unwrap_or(true) {
                best = Some(block);
            }
        }
        Ok(best)
    }

    fn remove_slot(&self, slot: u64) -> Result<(), StoreError> {
        let blocks = self.tree(TREE_BLOCKS)?;
        let statuses = self.tree(TREE_STATUS)?;
        let by_slot = self.tree(TREE_BY_SLOT)?;
        let key = slot.to_be_bytes();
        if let Some(raw) = by_slot.get(key).map_err(|_| StoreError::BackendUnavailable)? {
            let hashes: Vec<H256> = bincode::deserialize(&raw).unwrap_or_default();
            for hash in hashes {
                blocks.remove(hash.as_bytes()).map_err(|_| StoreError::BackendUnavailable)?;
                statuses.remove(hash.as_bytes()).map_err(|_| StoreError::BackendUnavailable)?;
            }
        }
        by_slot.remove(key).map_err(|_| StoreError::BackendUnavailable)?;
        Ok(())
    }
}
