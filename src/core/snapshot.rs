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

//! Chain-snapshot persistence for warm restart: a point-in-time capture of
//! the finalized chain plus the validator registry, distinct from the live
//! `core::store::ChainStore` consensus reads and writes on every slot.

use crate::core::types::{Block, CanonicalMap, ValidatorId, ValidatorRecord};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use thiserror::Error;

/// Snapshot store errors.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The backend could not serve the request right now.
    #[error("store backend unavailable")]
    BackendUnavailable,
    /// No snapshot has ever been saved.
    #[error("no snapshot present")]
    NotFound,
}

/// A full point-in-time capture of chain state, enough to resume without
/// replaying gossip history from genesis.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainSnapshot {
    /// Highest finalized block at capture time.
    pub finalized_tip: Block,
    /// Validator registry at capture time.
    pub validators: CanonicalMap<ValidatorId, ValidatorRecord>,
    /// Wall-clock time the snapshot was taken (unix ms).
    pub captured_at_ms: i64,
}

/// Boundary for persisting and loading chain snapshots. Three
/// implementations are provided, matching the storage-backend pattern
/// used elsewhere in the crate (in-memory, file/embedded, remote stub).
pub trait SnapshotStore: Send + Sync {
    /// Persist `snapshot`, replacing whatever was stored previously.
    fn save(&self, snapshot: &ChainSnapshot) -> Result<(), SnapshotError>;
    /// Load the most recently saved snapshot, if any.
    fn load(&self) -> Result<Option<ChainSnapshot>, SnapshotError>;
}

/// In-memory snapshot store, for tests.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    inner: RwLock<Option<ChainSnapshot>>,
}

impl InMemorySnapshotStore {
    /// A fresh, empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn save(&self, snapshot: &ChainSnapshot) -> Result<(), SnapshotError> {
        let mut guard = self.inner.write().map_err(|_| SnapshotError::BackendUnavailable)?;
        *guard = Some(snapshot.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<ChainSnapshot>, SnapshotError> {
        let guard = self.inner.read().map_err(|_| SnapshotError::BackendUnavailable)?;
        Ok(guard.clone())
    }
}

const SNAPSHOT_KEY: &[u8] = b"current";
const SNAPSHOT_TREE: &str = "snapshot";

/// Sled-backed snapshot store for durable warm restart.
pub struct FileSnapshotStore {
    db: sled::Db,
}

impl FileSnapshotStore {
    /// Open (or create) a sled database at `path`.
    pub fn open(path: &str) -> Result<Self, SnapshotError> {
        let db = sled::open(path).map_err(|_| SnapshotError::BackendUnavailable)?;
        Ok(Self { db })
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn save(&self, snapshot: &ChainSnapshot) -> Result<(), SnapshotError> {
        let tree = self.db.open_tree(SNAPSHOT_TREE).map_err(|_| SnapshotError::BackendUnavailable)?;
        let bytes = bincode::serialize(snapshot).map_err(|_| SnapshotError::BackendUnavailable)?;
        tree.insert(SNAPSHOT_KEY, bytes).map_err(|_| SnapshotError::BackendUnavailable)?;
        tree.flush().map_err(|_| SnapshotError::BackendUnavailable)?;
        Ok(())
    }

    fn load(&self) -> Result<Option<ChainSnapshot>, SnapshotError> {
        let tree = self.db.open_tree(SNAPSHOT_TREE).map_err(|_| SnapshotError::BackendUnavailable)?;
        let raw = tree.get(SNAPSHOT_KEY).map_err(|_| SnapshotError::BackendUnavailable)?;
        Ok(match raw {
            Some(bytes) => Some(bincode::deserialize(&bytes).map_err(|_| SnapshotError::BackendUnavailable)?),
            None => None,
        })
    }
}

/// Placeholder for a remote snapshot backend (e.g. an object store behind
/// a different team's API). Always reports unavailable rather than
/// fabricating network calls; swap in a real client when one exists.
#[derive(Default)]
pub struct RemoteSnapshotStore {
    _private: (),
}

impl RemoteSnapshotStore {
    /// Construct a stub remote store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for RemoteSnapshotStore {
    fn save(&self, _snapshot: &ChainSnapshot) -> Result<(), SnapshotError> {
        Err(SnapshotError::BackendUnavailable)
    }

    fn load(&self) -> Result<Option<ChainSnapshot>, SnapshotError> {
        Err(SnapshotError::BackendUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Block, PublicKey, H256};

    fn sample_snapshot() -> ChainSnapshot {
        ChainSnapshot {
            finalized_tip: Block {
                slot: 10,
                prev_hash: H256::ZERO,
                proposer: PublicKey([3u8; 32]),
                timestamp: 1_000,
                judgments: vec![],
                merkle_root: H256::ZERO,
                hash: H256([9u8; 32]),
            },
            validators: CanonicalMap::new(),
            captured_at_ms: 1_000,
        }
    }

    #[test]
    fn in_memory_store_round_trips() {
        let store = InMemorySnapshotStore::new();
        assert!(store.load().unwrap().is_none());
        store.save(&sample_snapshot()).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.finalized_tip.slot, 10);
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();
        {
            let store = FileSnapshotStore::open(path).unwrap();
            store.save(&sample_snapshot()).unwrap();
        }
        let reopened = FileSnapshotStore::open(path).unwrap();
        assert!(reopened.load().unwrap().is_some());
    }

    #[test]
    fn remote_store_reports_unavailable() {
        let store = RemoteSnapshotStore::new();
        assert!(matches!(store.load(), Err(SnapshotError::BackendUnavailable)));
        assert!(matches!(store.save(&sample_snapshot()), Err(SnapshotError::BackendUnavailable)));
    }
}
