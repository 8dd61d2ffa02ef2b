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

//! Fork detection and reorg recommendation.
//!
//! `ForkDetector` accumulates per-slot `(hash, reporter, weight)` reports
//! from gossip and CATCHUP responses alike — a CATCHUP response is fed in
//! exactly like any peer's reported `(slot, hash)` pair (SPEC_FULL.md's
//! pinned "CATCHUP authority" answer): this module is the only place that
//! decides whether to reorg.

use crate::core::types::{ForkSlotRecord, PublicKey, H256};
use std::collections::{BTreeMap, BTreeSet};

/// What the local node should do once a fork has been observed at a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForkRecommendation {
    /// The local hash at this slot is already the heaviest branch.
    Stay,
    /// A different branch outweighs the local one; reorg onto it.
    ReorgNeeded {
        /// The heavier branch's hash.
        heaviest: H256,
    },
}

/// Events the detector emits while processing reports.
#[derive(Clone, Debug, PartialEq)]
pub enum ForkEvent {
    /// A slot was observed to hold >= 2 distinct hashes for the first time.
    ForkDetected {
        /// The slot with competing hashes.
        slot: u64,
    },
}

/// Tracks per-slot fork state and issues reorg recommendations.
#[derive(Default)]
pub struct ForkDetector {
    records: BTreeMap<u64, ForkSlotRecord>,
    detected: BTreeSet<u64>,
    resolution_in_progress: BTreeSet<u64>,
    forks_resolved: u64,
}

impl ForkDetector {
    /// A fresh detector with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `reporter` (holding `reporter_weight` reporting
    /// weight, typically its E-Score-derived vote weight) claims `hash` at
    /// `slot`. Returns `ForkEvent::ForkDetected` the first time this slot
    /// accumulates a second distinct hash.
    pub fn observe(&mut self, slot: u64, hash: H256, reporter: PublicKey, reporter_weight: f64) -> Option<ForkEvent> {
        let record = self.records.entry(slot).or_default();
        let entry = record.hashes.entry(hash).or_insert_with(|| (BTreeSet::new(), 0.0));
        if entry.0.insert(reporter) {
            entry.1 += reporter_weight;
        }

        if record.is_fork() && self.detected.insert(slot) {
            return Some(ForkEvent::ForkDetected { slot });
        }
        None
    }

    /// Compare the local hash at `slot` against the heaviest observed
    /// branch and recommend staying or reorging.
    pub fn recommend(&self, slot: u64, local_hash: H256) -> ForkRecommendation {
        match self.records.get(&slot).and_then(ForkSlotRecord::heaviest) {
            Some(heaviest) if heaviest != local_hash => ForkRecommendation::ReorgNeeded { heaviest },
            _ => ForkRecommendation::Stay,
        }
    }

    /// The peer with the highest individually-reported weight on the
    /// heaviest branch at `slot`, the natural target for a
    /// FORK_RESOLUTION_REQUEST. Returns `None` if nothing is on record.
    pub fn resolution_target(&self, slot: u64) -> Option<PublicKey> {
        let record = self.records.get(&slot)?;
        let heaviest = record.heaviest()?;
        record
            .hashes
            .get(&heaviest)
            .and_then(|(peers, _)| peers.iter().copied().next())
    }

    /// True if a reorg for this slot is already in flight, preventing a
    /// second FORK_RESOLUTION_REQUEST from being sent.
    pub fn is_resolution_in_progress(&self, slot: u64) -> bool {
        self.resolution_in_progress.contains(&slot)
    }

    /// Mark `slot`'s resolution as in-flight (a FORK_RESOLUTION_REQUEST
    /// was just sent).
    pub fn begin_resolution(&mut self, slot: u64) {
        self.resolution_in_progress.insert(slot);
    }

    /// Clear the in-flight flag for `slot` and count one more resolved fork.
    pub fn mark_fork_resolved(&mut self, slot: u64) {
        self.resolution_in_progress.remove(&slot);
        self.forks_resolved += 1;
    }

    /// Total number of forks resolved over this detector's lifetime.
    pub fn forks_resolved(&self) -> u64 {
        self.forks_resolved
    }

    /// Drop fork records for slots older than `last_finalized_slot - 100`,
    /// per the periodic retention sweep.
    pub fn sweep(&mut self, last_finalized_slot: u64) {
        let cutoff = last_finalized_slot.saturating_sub(100);
        self.records.retain(|&slot, _| slot >= cutoff);
        self.detected.retain(|&slot| slot >= cutoff);
        self.resolution_in_progress.retain(|&slot| slot >= cutoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_hash_is_not_a_fork() {
        let mut fd = ForkDetector::new();
        let peer = PublicKey([1u8; 32]);
        let event = fd.observe(10, H256([0xaa; 32]), peer, 50.0);
        assert_eq!(event, None);
        assert_eq!(fd.recommend(10, H256([0xaa; 32])), ForkRecommendation::Stay);
    }

    #[test]
    fn second_distinct_hash_triggers_detection_once() {
        let mut fd = ForkDetector::new();
        let p1 = PublicKey([1u8; 32]);
        let p2 = PublicKey([2u8; 32]);
        let p3 = PublicKey([3u8; 32]);
        assert_eq!(fd.observe(10, H256([0xaa; 32]), p1, 10.0), None);
        let event = fd.observe(10, H256([0xbb; 32]), p2, 90.0);
        assert_eq!(event, Some(ForkEvent::ForkDetected { slot: 10 }));
        // A third report on an already-forked slot must not re-fire.
        assert_eq!(fd.observe(10, H256([0xbb; 32]), p3, 5.0), None);
    }

    #[test]
    fn heaviest_branch_wins_and_recommends_reorg() {
        let mut fd = ForkDetector::new();
        let p1 = PublicKey([1u8; 32]);
        let p2 = PublicKey([2u8; 32]);
        fd.observe(10, H256([0xaa; 32]), p1, 10.0);
        fd.observe(10, H256([0xbb; 32]), p2, 90.0);
        assert_eq!(
            fd.recommend(10, H256([0xaa; 32])),
            ForkRecommendation::ReorgNeeded {
                heaviest: H256([0xbb; 32])
            }
        );
        assert_eq!(fd.recommend(10, H256([0xbb; 32])), ForkRecommendation::Stay);
    }

    #[test]
    fn tie_break_picks_lexicographically_smaller_hash() {
        let mut fd = ForkDetector::new();
        let p1 = PublicKey([1u8; 32]);
        let p2 = PublicKey([2u8; 32]);
        fd.observe(10, H256([0xbb; 32]), p1, 50.0);
        fd.observe(10, H256([0xaa; 32]), p2, 50.0);
        assert_eq!(
            fd.recommend(10, H256([0xbb; 32])),
            ForkRecommendation::ReorgNeeded {
                heaviest: H256([0xaa; 32])
            }
        );
    }

    #[test]
    fn resolution_flag_prevents_duplicate_requests() {
        let mut fd = ForkDetector::new();
        assert!(!fd.is_resolution_in_progress(10));
        fd.begin_resolution(10);
        assert!(fd.is_resolution_in_progress(10));
        fd.mark_fork_resolved(10);
        assert!(!fd.is_resolution_in_progress(10));
        assert_eq!(fd.forks_resolved(), 1);
    }

    #[test]
    fn sweep_drops_entries_older_than_retention_window() {
        let mut fd = ForkDetector::new();
        let p1 = PublicKey([1u8; 32]);
        fd.observe(5, H256([0xaa; 32]), p1, 10.0);
        fd.observe(200, H256([0xbb; 32]), p1, 10.0);
        fd.sweep(200);
        assert!(fd.records.get(&5).is_none());
        assert!(fd.records.get(&200).is_some());
    }
}
