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

//! Simulates a 7-validator network split into a 4/3 partition and checks
//! that neither side alone can confirm a block: the approval threshold
//! (phi^-1, about 0.618 of total weight) requires more than half the
//! validator set's weight, so no group of 3 or 4 out of 7 equal-weight
//! validators can finalize anything on its own. This is what keeps a
//! network split from having both halves finalize conflicting blocks.

use phinet::core::consensus::engine::{ConsensusCommand, ConsensusEngine, ConsensusEvent, EngineConfig};
use phinet::core::consensus::signing::vote_signing_bytes;
use phinet::core::crypto::Keypair;
use phinet::core::store::{ChainStore, InMemoryChainStore};
use phinet::core::types::{BlockStatus, CanonicalMap, ValidatorRecord, Vote, VoteDecision, H256};
use std::sync::Arc;

fn validator_set(keys: &[Keypair]) -> CanonicalMap<phinet::core::types::ValidatorId, ValidatorRecord> {
    let mut validators = CanonicalMap::new();
    for kp in keys {
        validators.insert(
            kp.public_key(),
            ValidatorRecord {
                public_key: kp.public_key(),
                e_score: 50.0,
                burned: 0,
                uptime: 1.0,
                weight: 100.0,
            },
        );
    }
    validators
}

fn cast_vote(engine: &mut ConsensusEngine, kp: &Keypair, slot: u64, block_hash: H256) -> Vec<ConsensusEvent> {
    let bytes = vote_signing_bytes(slot, block_hash, VoteDecision::Approve);
    let vote = Vote {
        slot,
        block_hash,
        decision: VoteDecision::Approve,
        voter: kp.public_key(),
        signature: kp.sign(&bytes),
    };
    engine.handle(ConsensusCommand::HandleVote { vote }).unwrap()
}

#[test]
fn minority_partition_cannot_confirm_a_block() {
    let keys: Vec<Keypair> = (0..7).map(|_| Keypair::generate().unwrap()).collect();
    let validators = validator_set(&keys);

    let store: Arc<dyn ChainStore> = Arc::new(InMemoryChainStore::new());
    let mut engine = ConsensusEngine::new(
        Keypair::from_pkcs8(keys[0].pkcs8_bytes()).unwrap(),
        validators,
        store.clone(),
        EngineConfig::default(),
    );

    let events = engine
        .handle(ConsensusCommand::Propose {
            slot: 1,
            prev_hash: H256::ZERO,
            timestamp: 1_000,
            judgments: vec![],
        })
        .unwrap();
    let block_hash = events
        .iter()
        .find_map(|e| match e {
            ConsensusEvent::VoteCast(v) => Some(v.block_hash),
            _ => None,
        })
        .expect("the proposer always self-votes on its own proposal");

    // Only 3 of the other 6 validators can be reached by this node, as if
    // a network split cut it off from the rest. 4 validators * 100 weight
    // (including the proposer's self-vote) is 400 out of 700 total,
    // short of phi^-1 * 700 (~432.6).
    for kp in &keys[1..=3] {
        let events = cast_vote(&mut engine, kp, 1, block_hash);
        assert!(!events.iter().any(|e| matches!(e, ConsensusEvent::BlockConfirmed { .. })));
    }

    assert_eq!(store.get_status(&block_hash).unwrap(), Some(BlockStatus::Proposed));
}

#[test]
fn reunited_partition_still_confirms_once_enough_weight_reports_in() {
    let keys: Vec<Keypair> = (0..7).map(|_| Keypair::generate().unwrap()).collect();
    let validators = validator_set(&keys);

    let store: Arc<dyn ChainStore> = Arc::new(InMemoryChainStore::new());
    let mut engine = ConsensusEngine::new(
        Keypair::from_pkcs8(keys[0].pkcs8_bytes()).unwrap(),
        validators,
        store.clone(),
        EngineConfig::default(),
    );

    let events = engine
        .handle(ConsensusCommand::Propose {
            slot: 1,
            prev_hash: H256::ZERO,
            timestamp: 1_000,
            judgments: vec![],
        })
        .unwrap();
    let block_hash = events
        .iter()
        .find_map(|e| match e {
            ConsensusEvent::VoteCast(v) => Some(v.block_hash),
            _ => None,
        })
        .unwrap();

    // First the 3-member minority checks in (still below threshold)...
    for kp in &keys[1..=3] {
        cast_vote(&mut engine, kp, 1, block_hash);
    }
    assert_eq!(store.get_status(&block_hash).unwrap(), Some(BlockStatus::Proposed));

    // ...then the partition heals and the remaining validators vote too,
    // crossing phi^-1 of the total weight.
    let mut confirmed = false;
    for kp in &keys[4..7] {
        let events = cast_vote(&mut engine, kp, 1, block_hash);
        if events.iter().any(|e| matches!(e, ConsensusEvent::BlockConfirmed { .. })) {
            confirmed = true;
        }
    }
    assert!(confirmed, "block should confirm once enough weight has voted");
    assert_eq!(store.get_status(&block_hash).unwrap(), Some(BlockStatus::Confirmed));
}

#[test]
fn both_partition_halves_proposing_conflicting_blocks_never_both_confirm() {
    let keys: Vec<Keypair> = (0..7).map(|_| Keypair::generate().unwrap()).collect();

    let store_a: Arc<dyn ChainStore> = Arc::new(InMemoryChainStore::new());
    let mut engine_a = ConsensusEngine::new(
        Keypair::from_pkcs8(keys[0].pkcs8_bytes()).unwrap(),
        validator_set(&keys),
        store_a.clone(),
        EngineConfig::default(),
    );
    let store_b: Arc<dyn ChainStore> = Arc::new(InMemoryChainStore::new());
    let mut engine_b = ConsensusEngine::new(
        Keypair::from_pkcs8(keys[4].pkcs8_bytes()).unwrap(),
        validator_set(&keys),
        store_b.clone(),
        EngineConfig::default(),
    );

    let hash_a = engine_a
        .handle(ConsensusCommand::Propose {
            slot: 1,
            prev_hash: H256::ZERO,
            timestamp: 1_000,
            judgments: vec![],
        })
        .unwrap()
        .iter()
        .find_map(|e| match e {
            ConsensusEvent::VoteCast(v) => Some(v.block_hash),
            _ => None,
        })
        .unwrap();
    let hash_b = engine_b
        .handle(ConsensusCommand::Propose {
            slot: 1,
            prev_hash: H256::ZERO,
            timestamp: 1_001,
            judgments: vec![],
        })
        .unwrap()
        .iter()
        .find_map(|e| match e {
            ConsensusEvent::VoteCast(v) => Some(v.block_hash),
            _ => None,
        })
        .unwrap();
    assert_ne!(hash_a, hash_b);

    for kp in &keys[1..3] {
        cast_vote(&mut engine_a, kp, 1, hash_a);
    }
    for kp in &keys[5..7] {
        cast_vote(&mut engine_b, kp, 1, hash_b);
    }

    assert_eq!(store_a.get_status(&hash_a).unwrap(), Some(BlockStatus::Proposed));
    assert_eq!(store_b.get_status(&hash_b).unwrap(), Some(BlockStatus::Proposed));
}
