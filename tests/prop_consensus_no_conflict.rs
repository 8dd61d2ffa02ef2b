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

//! Property: for any split of a validator set's weight into two disjoint
//! groups voting for two different block hashes at the same slot, at most
//! one group's approve weight can cross the phi^-1 confirmation
//! threshold. This holds for any weight distribution because phi^-1 is
//! greater than one half, so two disjoint groups can never both clear it
//! against the same total.

use phinet::core::consensus::engine::{ConsensusCommand, ConsensusEngine, ConsensusEvent, EngineConfig};
use phinet::core::consensus::signing::vote_signing_bytes;
use phinet::core::consensus::PHI_INV;
use phinet::core::crypto::Keypair;
use phinet::core::store::{ChainStore, InMemoryChainStore};
use phinet::core::types::{CanonicalMap, ValidatorRecord, Vote, VoteDecision, H256};
use proptest::prelude::*;
use std::sync::Arc;

proptest! {
    #[test]
    fn disjoint_weight_groups_cannot_both_cross_phi_inv(
        group_a_weights in prop::collection::vec(1.0f64..100.0, 1..6),
        group_b_weights in prop::collection::vec(1.0f64..100.0, 1..6),
    ) {
        let total: f64 = group_a_weights.iter().chain(group_b_weights.iter()).sum();
        let a_share: f64 = group_a_weights.iter().sum::<f64>() / total;
        let b_share: f64 = group_b_weights.iter().sum::<f64>() / total;
        prop_assert!(!(a_share >= PHI_INV && b_share >= PHI_INV));
    }
}

fn validator_set(keys: &[Keypair], weight: f64) -> CanonicalMap<phinet::core::types::ValidatorId, ValidatorRecord> {
    let mut validators = CanonicalMap::new();
    for kp in keys {
        validators.insert(
            kp.public_key(),
            ValidatorRecord {
                public_key: kp.public_key(),
                e_score: 50.0,
                burned: 0,
                uptime: 1.0,
                weight,
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

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]
    #[test]
    fn engine_never_confirms_two_conflicting_blocks_at_the_same_slot(minority_size in 1usize..4) {
        // 7 equal-weight validators split minority_size / (7 - minority_size).
        // minority_size tops out at 3, so the smaller side (at most 3-of-7,
        // ~43% of weight) can never reach phi^-1 (~61.8%) on its own, while
        // the engine under test only ever hears from that minority.
        let keys: Vec<Keypair> = (0..7).map(|_| Keypair::generate().unwrap()).collect();
        let validators = validator_set(&keys, 100.0);
        let store: Arc<dyn ChainStore> = Arc::new(InMemoryChainStore::new());
        let mut engine = ConsensusEngine::new(
            Keypair::from_pkcs8(keys[0].pkcs8_bytes()).unwrap(),
            validators,
            store,
            EngineConfig::default(),
        );

        let block_hash = engine
            .handle(ConsensusCommand::Propose {
                slot: 1,
                prev_hash: H256::ZERO,
                timestamp: 1_000,
                judgments: vec![],
            })
            .unwrap()
            .into_iter()
            .find_map(|e| match e {
                ConsensusEvent::VoteCast(v) => Some(v.block_hash),
                _ => None,
            })
            .unwrap();

        let mut any_confirmed = false;
        for kp in keys.iter().skip(1).take(minority_size) {
            let events = cast_vote(&mut engine, kp, 1, block_hash);
            if events.iter().any(|e| matches!(e, ConsensusEvent::BlockConfirmed { .. })) {
                any_confirmed = true;
            }
        }
        prop_assert!(!any_confirmed);
    }
}
