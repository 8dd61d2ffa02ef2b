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

//! The block state machine: proposal, weighted vote tally, confirmation,
//! finality, and timeouts.
//!
//! `ConsensusEngine` is meant to be owned by a single task that reads
//! [`ConsensusCommand`]s off an `mpsc` channel and applies them one at a
//! time — no internal locking, per the single-owner-task discipline. The
//! engine itself stays synchronous and channel-agnostic so it can be
//! driven directly in tests without spinning up Tokio.

use crate::core::consensus::signing::{self, SigningError};
use crate::core::consensus::PHI_INV;
use crate::core::crypto::{self, Keypair};
use crate::core::escore::{self, Outcome};
use crate::core::slot::WeightLine;
use crate::core::store::{ChainStore, StoreError};
use crate::core::types::{
    Block, BlockStatus, CanonicalMap, Judgment, Signature, ValidatorId, ValidatorRecord,
    Vote, VoteDecision, H256,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Consensus engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The judgment list could not be canonically ordered.
    #[error("duplicate judgment id")]
    DuplicateJudgmentId,
    /// The underlying block store rejected an operation.
    #[error("store error")]
    Store(#[from] StoreError),
    /// This node is not a participant in the current validator set.
    #[error("local identity is not a known validator")]
    NotAValidator,
    /// A proposal's `prev_hash` does not match the local head's hash.
    #[error("chain integrity violation: block does not extend the local head")]
    ChainIntegrityViolation,
    /// A proposal's `slot` does not immediately follow the local head's slot.
    #[error("slot mismatch: block does not follow head.slot + 1")]
    SlotMismatch,
}

impl From<SigningError> for EngineError {
    fn from(_: SigningError) -> Self {
        EngineError::DuplicateJudgmentId
    }
}

/// Tunable engine parameters (pinned defaults per SPEC_FULL.md §4 constants).
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Confirmations a Confirmed block needs before becoming Finalized.
    pub finality_depth: u32,
    /// Per-slot proposal timeout, in milliseconds.
    pub proposal_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            finality_depth: 3,
            proposal_timeout_ms: 800,
        }
    }
}

/// Commands the engine's owning task applies one at a time.
pub enum ConsensusCommand {
    /// Build, store, and self-vote a new proposal for `slot`.
    Propose {
        /// Slot to propose into.
        slot: u64,
        /// Hash of the block this one extends.
        prev_hash: H256,
        /// Proposal wall-clock timestamp.
        timestamp: i64,
        /// Judgments to pack into the block.
        judgments: Vec<Judgment>,
    },
    /// A proposal arrived from gossip (or from the local leader path).
    HandleProposal {
        /// The proposed block, as received.
        block: Block,
    },
    /// A vote arrived from gossip.
    HandleVote {
        /// The vote, as received.
        vote: Vote,
    },
    /// Advance the engine's notion of time, firing any expired timeouts.
    Tick {
        /// Current wall-clock time, in milliseconds.
        now_ms: i64,
    },
    /// Insert or replace a validator's record, e.g. after an E-Score
    /// refresh or an operator-driven `addValidator` call.
    UpsertValidator {
        /// The record to insert or replace.
        record: ValidatorRecord,
    },
    /// Stop the engine; all pending timers are abandoned, committed state
    /// is left intact.
    Stop,
}

/// Events the engine emits in response to a command, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum ConsensusEvent {
    /// This node built and self-voted a new proposal; the caller should
    /// gossip it (an externally-received proposal is already being
    /// re-broadcast by the gossip layer and does not raise this event).
    BlockProposed(Block),
    /// This node cast (and broadcast) a vote.
    VoteCast(Vote),
    /// A block crossed the φ⁻¹ approval threshold.
    BlockConfirmed {
        /// Slot of the confirmed block.
        slot: u64,
        /// Hash of the confirmed block.
        hash: H256,
    },
    /// A Confirmed block accumulated enough later confirmations.
    BlockFinalized {
        /// Slot of the finalized block.
        slot: u64,
        /// Hash of the finalized block.
        hash: H256,
    },
    /// A Proposed block's timeout fired before it reached Confirmed.
    ProposalTimeout {
        /// Slot whose proposal timed out.
        slot: u64,
        /// Hash of the timed-out proposal.
        hash: H256,
    },
    /// A validator double-proposed or double-voted at the same slot.
    EquivocationDetected {
        /// Slot the equivocation occurred at.
        slot: u64,
        /// The offending validator.
        proposer: ValidatorId,
    },
    /// The engine processed `Stop`.
    Stopped,
}

#[derive(Default)]
struct VoteTally {
    approve: BTreeMap<ValidatorId, f64>,
    reject: BTreeMap<ValidatorId, f64>,
}

impl VoteTally {
    fn approve_weight(&self) -> f64 {
        self.approve.values().sum()
    }
}

/// The block proposal/vote/finality state machine (C7's core).
pub struct ConsensusEngine {
    config: EngineConfig,
    self_id: ValidatorId,
    self_keypair: Keypair,
    validators: CanonicalMap<ValidatorId, ValidatorRecord>,
    store: Arc<dyn ChainStore>,
    /// (slot, block_hash) -> tally, for blocks still being voted on.
    tallies: BTreeMap<(u64, H256), VoteTally>,
    /// Last vote cast by (voter, slot), to detect vote equivocation.
    last_vote: BTreeMap<(ValidatorId, u64), H256>,
    /// Last proposal by (proposer, slot), to detect proposal equivocation.
    last_proposal: BTreeMap<(ValidatorId, u64), H256>,
    /// Pending timeout deadlines for still-Proposed blocks.
    pending_timeouts: BTreeMap<(u64, H256), i64>,
    /// Confirmations accumulated per Confirmed block hash.
    confirmations: BTreeMap<H256, u32>,
}

impl ConsensusEngine {
    /// Construct a new engine. `self_keypair` signs this node's own votes
    /// and proposals; `validators` is the initial weight table.
    pub fn new(
        self_keypair: Keypair,
        validators: CanonicalMap<ValidatorId, ValidatorRecord>,
        store: Arc<dyn ChainStore>,
        config: EngineConfig,
    ) -> Self {
        let self_id = self_keypair.public_key();
        Self {
            config,
            self_id,
            self_keypair,
            validators,
            store,
            tallies: BTreeMap::new(),
            last_vote: BTreeMap::new(),
            last_proposal: BTreeMap::new(),
            pending_timeouts: BTreeMap::new(),
            confirmations: BTreeMap::new(),
        }
    }

    /// This node's validator identity.
    pub fn self_id(&self) -> ValidatorId {
        self.self_id
    }

    /// Replace a validator's record (e.g. after an E-Score refresh).
    pub fn upsert_validator(&mut self, record: ValidatorRecord) {
        self.validators.insert(record.public_key, record);
    }

    /// Current validator weight table, for the leader schedule and status
    /// reporting.
    pub fn validators(&self) -> &CanonicalMap<ValidatorId, ValidatorRecord> {
        &self.validators
    }

    /// Whether this node is the deterministically-drawn leader for `slot`.
    pub fn is_self_leader(&self, slot: u64) -> bool {
        self.weight_line().leader_for_slot(slot) == Some(self.self_id)
    }

    fn total_weight(&self) -> f64 {
        self.validators.values().map(|v| v.weight).sum()
    }

    fn weight_of(&self, id: &ValidatorId) -> f64 {
        self.validators.get(id).map(|v| v.weight).unwrap_or(0.0)
    }

    fn weight_line(&self) -> WeightLine {
        let weights: CanonicalMap<ValidatorId, f64> =
            self.validators.iter().map(|(id, v)| (*id, v.weight)).collect();
        WeightLine::build(&weights)
    }

    fn penalize(&mut self, id: &ValidatorId, outcome: Outcome) {
        if let Some(record) = self.validators.get_mut(id) {
            record.e_score = escore::apply_outcome(record.e_score, outcome);
            escore::refresh_weight(record);
        }
    }

    /// Apply one command, returning the events it produced.
    pub fn handle(&mut self, command: ConsensusCommand) -> Result<Vec<ConsensusEvent>, EngineError> {
        match command {
            ConsensusCommand::Propose {
                slot,
                prev_hash,
                timestamp,
                judgments,
            } => {
                if !self.validators.contains_key(&self.self_id) {
                    return Err(EngineError::NotAValidator);
                }
                let block = signing::build_block(slot, prev_hash, self.self_id, timestamp, judgments)?;
                let mut events = vec![ConsensusEvent::BlockProposed(block.clone())];
                events.extend(self.handle_proposal(block)?);
                Ok(events)
            }
            ConsensusCommand::HandleProposal { block } => self.handle_proposal(block),
            ConsensusCommand::HandleVote { vote } => Ok(self.handle_vote(vote)),
            ConsensusCommand::Tick { now_ms } => Ok(self.tick(now_ms)),
            ConsensusCommand::UpsertValidator { record } => {
                self.upsert_validator(record);
                Ok(Vec::new())
            }
            ConsensusCommand::Stop => Ok(vec![ConsensusEvent::Stopped]),
        }
    }

    fn handle_proposal(&mut self, block: Block) -> Result<Vec<ConsensusEvent>, EngineError> {
        let mut events = Vec::new();

        if !signing::verify_block_hash(&block) {
            return Ok(events);
        }
        let expected_leader = self.weight_line().leader_for_slot(block.slot);
        if expected_leader != Some(block.proposer) {
            return Ok(events);
        }

        let key = (block.proposer, block.slot);
        if let Some(&existing_hash) = self.last_proposal.get(&key) {
            if existing_hash != block.hash {
                self.store.put_block(block.clone(), BlockStatus::Rejected)?;
                self.store.set_status(&existing_hash, BlockStatus::Rejected)?;
                self.pending_timeouts.remove(&(block.slot, existing_hash));
                self.penalize(&block.proposer, Outcome::Equivocated);
                events.push(ConsensusEvent::EquivocationDetected {
                    slot: block.slot,
                    proposer: block.proposer,
                });
                return Ok(events);
            }
            // Re-delivery of the same proposal; nothing new to do.
            return Ok(events);
        }

        if let Some(head) = self.store.head()? {
            if block.prev_hash != head.hash {
                return Err(EngineError::ChainIntegrityViolation);
            }
            if block.slot != head.slot + 1 {
                return Err(EngineError::SlotMismatch);
            }
        }

        self.last_proposal.insert(key, block.hash);
        self.store.put_block(block.clone(), BlockStatus::Proposed)?;
        self.pending_timeouts
            .insert((block.slot, block.hash), block.timestamp + self.config.proposal_timeout_ms as i64);

        if self.validators.contains_key(&self.self_id) {
            let vote = self.sign_vote(block.slot, block.hash, VoteDecision::Approve);
            events.push(ConsensusEvent::VoteCast(vote.clone()));
            events.extend(self.handle_vote(vote));
        }

        Ok(events)
    }

    fn sign_vote(&self, slot: u64, block_hash: H256, decision: VoteDecision) -> Vote {
        let bytes = signing::vote_signing_bytes(slot, block_hash, decision);
        let signature = self.self_keypair.sign(&bytes);
        Vote {
            slot,
            block_hash,
            decision,
            voter: self.self_id,
            signature,
        }
    }

    fn handle_vote(&mut self, vote: Vote) -> Vec<ConsensusEvent> {
        let mut events = Vec::new();

        if !self.validators.contains_key(&vote.voter) {
            return events;
        }
        let bytes = signing::vote_signing_bytes(vote.slot, vote.block_hash, vote.decision);
        if crypto::verify(&vote.voter, &bytes, &vote.signature).is_err() {
            return events;
        }

        let key = (vote.voter, vote.slot);
        if let Some(&prior_hash) = self.last_vote.get(&key) {
            if prior_hash != vote.block_hash {
                self.penalize(&vote.voter, Outcome::Equivocated);
                events.push(ConsensusEvent::EquivocationDetected {
                    slot: vote.slot,
                    proposer: vote.voter,
                });
            }
            return events;
        }
        self.last_vote.insert(key, vote.block_hash);

        let weight = self.weight_of(&vote.voter);
        let tally = self.tallies.entry((vote.slot, vote.block_hash)).or_default();
        match vote.decision {
            VoteDecision::Approve => {
                tally.approve.insert(vote.voter, weight);
            }
            VoteDecision::Reject => {
                tally.reject.insert(vote.voter, weight);
            }
        }
        let approve_weight = tally.approve_weight();
        let total = self.total_weight();

        if total > 0.0 && approve_weight / total >= PHI_INV {
            if let Ok(Some(BlockStatus::Proposed)) = self.store.get_status(&vote.block_hash) {
                if let Ok(Some(block)) = self.store.get_block(&vote.block_hash) {
                    let _ = self.store.set_status(&vote.block_hash, BlockStatus::Confirmed);
                    self.pending_timeouts.remove(&(block.slot, block.hash));
                    events.push(ConsensusEvent::BlockConfirmed {
                        slot: block.slot,
                        hash: block.hash,
                    });
                    events.extend(self.finality_walk(&block));
                }
            }
        }

        events
    }

    /// Walk the confirmed block's ancestor chain, crediting every
    /// Confirmed ancestor with one more confirmation and finalizing any
    /// that reach `finality_depth`.
    fn finality_walk(&mut self, confirmed: &Block) -> Vec<ConsensusEvent> {
        let mut events = Vec::new();
        let mut cursor = confirmed.prev_hash;
        while cursor != H256::ZERO {
            let Ok(Some(ancestor)) = self.store.get_block(&cursor) else {
                break;
            };
            let status = self.store.get_status(&cursor).ok().flatten();
            if matches!(status, Some(BlockStatus::Confirmed)) {
                let count = self.confirmations.entry(cursor).or_insert(0);
                *count += 1;
                if *count >= self.config.finality_depth {
                    let _ = self.store.set_status(&cursor, BlockStatus::Finalized);
                    events.push(ConsensusEvent::BlockFinalized {
                        slot: ancestor.slot,
                        hash: cursor,
                    });
                }
            }
            cursor = ancestor.prev_hash;
        }
        events
    }

    fn tick(&mut self, now_ms: i64) -> Vec<ConsensusEvent> {
        let mut events = Vec::new();
        let expired: Vec<(u64, H256)> = self
            .pending_timeouts
            .iter()
            .filter(|(_, &deadline)| deadline <= now_ms)
            .map(|(&k, _)| k)
            .collect();

        for (slot, hash) in expired {
            self.pending_timeouts.remove(&(slot, hash));
            if let Ok(Some(BlockStatus::Proposed)) = self.store.get_status(&hash) {
                events.push(ConsensusEvent::ProposalTimeout { slot, hash });
                let siblings_confirmed = self
                    .store
                    .hashes_at_slot(slot)
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|h| *h != hash)
                    .any(|h| matches!(self.store.get_status(&h), Ok(Some(BlockStatus::Confirmed))));
                if siblings_confirmed {
                    let _ = self.store.set_status(&hash, BlockStatus::Rejected);
                }
            }
        }
        events
    }
}

/// A dummy signature used only where a `Vote` must be constructed without
/// a real signing key (e.g. test fixtures exercising tally math directly).
#[cfg(test)]
fn unsigned(slot: u64, block_hash: H256, decision: VoteDecision, voter: ValidatorId) -> Vote {
    Vote {
        slot,
        block_hash,
        decision,
        voter,
        signature: Signature(vec![0u8; 64]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::InMemoryChainStore;

    fn validator(kp: &Keypair, weight: f64) -> ValidatorRecord {
        ValidatorRecord {
            public_key: kp.public_key(),
            e_score: 50.0,
            burned: 0,
            uptime: 1.0,
            weight,
        }
    }

    /// Three validators with weights {100, 60, 40}, mirroring S1 from the
    /// testable-property scenarios: node1 proposes, node2 and node3
    /// approve, and the block should confirm immediately (200/200 = 1.0).
    #[test]
    fn three_node_unanimous_vote_confirms_and_finalizes() {
        let kp1 = Keypair::generate().unwrap();
        let kp2 = Keypair::generate().unwrap();
        let kp3 = Keypair::generate().unwrap();
        let mut validators = CanonicalMap::new();
        validators.insert(kp1.public_key(), validator(&kp1, 100.0));
        validators.insert(kp2.public_key(), validator(&kp2, 60.0));
        validators.insert(kp3.public_key(), validator(&kp3, 40.0));

        let store: Arc<dyn ChainStore> = Arc::new(InMemoryChainStore::new());
        let mut engine = ConsensusEngine::new(
            Keypair::from_pkcs8(kp1.pkcs8_bytes()).unwrap(),
            validators,
            store.clone(),
            EngineConfig {
                finality_depth: 3,
                proposal_timeout_ms: 800,
            },
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

        let bytes = signing::vote_signing_bytes(1, block_hash, VoteDecision::Approve);
        let v2 = Vote {
            slot: 1,
            block_hash,
            decision: VoteDecision::Approve,
            voter: kp2.public_key(),
            signature: kp2.sign(&bytes),
        };
        let v3 = Vote {
            slot: 1,
            block_hash,
            decision: VoteDecision::Approve,
            voter: kp3.public_key(),
            signature: kp3.sign(&bytes),
        };

        let ev2 = engine.handle(ConsensusCommand::HandleVote { vote: v2 }).unwrap();
        assert!(ev2.iter().any(|e| matches!(e, ConsensusEvent::BlockConfirmed { .. })));
        let _ = engine.handle(ConsensusCommand::HandleVote { vote: v3 }).unwrap();

        assert_eq!(store.get_status(&block_hash).unwrap(), Some(BlockStatus::Confirmed));

        // Chain three further confirmed slots on top; the genesis block
        // should finalize once its confirmation counter reaches 3.
        let mut prev = block_hash;
        for slot in 2..=4u64 {
            let events = engine
                .handle(ConsensusCommand::Propose {
                    slot,
                    prev_hash: prev,
                    timestamp: 1_000 + slot as i64 * 400,
                    judgments: vec![],
                })
                .unwrap();
            let hash = events
                .iter()
                .find_map(|e| match e {
                    ConsensusEvent::VoteCast(v) => Some(v.block_hash),
                    _ => None,
                })
                .unwrap();
            let bytes = signing::vote_signing_bytes(slot, hash, VoteDecision::Approve);
            let v2 = Vote {
                slot,
                block_hash: hash,
                decision: VoteDecision::Approve,
                voter: kp2.public_key(),
                signature: kp2.sign(&bytes),
            };
            engine.handle(ConsensusCommand::HandleVote { vote: v2 }).unwrap();
            prev = hash;
        }

        assert_eq!(store.get_status(&block_hash).unwrap(), Some(BlockStatus::Finalized));
        assert_eq!(store.head_slot().unwrap(), Some(4));
    }

    #[test]
    fn equivocating_proposer_rejects_both_blocks() {
        let kp1 = Keypair::generate().unwrap();
        let kp2 = Keypair::generate().unwrap();
        let mut validators = CanonicalMap::new();
        validators.insert(kp1.public_key(), validator(&kp1, 100.0));
        validators.insert(kp2.public_key(), validator(&kp2, 1.0));

        let store: Arc<dyn ChainStore> = Arc::new(InMemoryChainStore::new());
        let mut engine = ConsensusEngine::new(
            Keypair::from_pkcs8(kp2.pkcs8_bytes()).unwrap(),
            validators,
            store.clone(),
            EngineConfig::default(),
        );

        let b1 = signing::build_block(
            5,
            H256::ZERO,
            kp1.public_key(),
            1_000,
            vec![Judgment {
                id: "a".into(),
                payload: vec![1],
                produced_at: 0,
            }],
        )
        .unwrap();
        let b2 = signing::build_block(
            5,
            H256::ZERO,
            kp1.public_key(),
            1_000,
            vec![Judgment {
                id: "b".into(),
                payload: vec![2],
                produced_at: 0,
            }],
        )
        .unwrap();

        engine.handle(ConsensusCommand::HandleProposal { block: b1.clone() }).unwrap();
        let events = engine
            .handle(ConsensusCommand::HandleProposal { block: b2.clone() })
            .unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, ConsensusEvent::EquivocationDetected { proposer, .. } if *proposer == kp1.public_key())));
        assert_eq!(store.get_status(&b1.hash).unwrap(), Some(BlockStatus::Rejected));
        assert_eq!(store.get_status(&b2.hash).unwrap(), Some(BlockStatus::Rejected));
    }

    #[test]
    fn proposal_with_wrong_prev_hash_is_rejected() {
        let kp1 = Keypair::generate().unwrap();
        let mut validators = CanonicalMap::new();
        validators.insert(kp1.public_key(), validator(&kp1, 100.0));

        let store: Arc<dyn ChainStore> = Arc::new(InMemoryChainStore::new());
        let mut engine = ConsensusEngine::new(
            Keypair::from_pkcs8(kp1.pkcs8_bytes()).unwrap(),
            validators,
            store.clone(),
            EngineConfig::default(),
        );

        let genesis = signing::build_block(1, H256::ZERO, kp1.public_key(), 1_000, vec![]).unwrap();
        engine
            .handle(ConsensusCommand::HandleProposal { block: genesis.clone() })
            .unwrap();

        let wrong_parent = signing::build_block(2, H256::ZERO, kp1.public_key(), 1_400, vec![]).unwrap();
        let err = engine
            .handle(ConsensusCommand::HandleProposal { block: wrong_parent })
            .unwrap_err();
        assert!(matches!(err, EngineError::ChainIntegrityViolation));
        assert_eq!(store.head_slot().unwrap(), Some(1));
    }

    #[test]
    fn proposal_that_skips_a_slot_is_rejected() {
        let kp1 = Keypair::generate().unwrap();
        let mut validators = CanonicalMap::new();
        validators.insert(kp1.public_key(), validator(&kp1, 100.0));

        let store: Arc<dyn ChainStore> = Arc::new(InMemoryChainStore::new());
        let mut engine = ConsensusEngine::new(
            Keypair::from_pkcs8(kp1.pkcs8_bytes()).unwrap(),
            validators,
            store.clone(),
            EngineConfig::default(),
        );

        let genesis = signing::build_block(1, H256::ZERO, kp1.public_key(), 1_000, vec![]).unwrap();
        engine
            .handle(ConsensusCommand::HandleProposal { block: genesis.clone() })
            .unwrap();

        let skipped = signing::build_block(3, genesis.hash, kp1.public_key(), 1_800, vec![]).unwrap();
        let err = engine
            .handle(ConsensusCommand::HandleProposal { block: skipped })
            .unwrap_err();
        assert!(matches!(err, EngineError::SlotMismatch));
        assert_eq!(store.head_slot().unwrap(), Some(1));
    }

    #[test]
    fn timeout_without_confirmed_sibling_just_reports() {
        let kp1 = Keypair::generate().unwrap();
        let kp2 = Keypair::generate().unwrap();
        let mut validators = CanonicalMap::new();
        // kp1 (the proposer) holds far too little weight to self-confirm;
        // kp2 never votes, so the block should still be Proposed at the
        // timeout deadline.
        validators.insert(kp1.public_key(), validator(&kp1, 10.0));
        validators.insert(kp2.public_key(), validator(&kp2, 100.0));

        let store: Arc<dyn ChainStore> = Arc::new(InMemoryChainStore::new());
        let mut engine = ConsensusEngine::new(
            Keypair::from_pkcs8(kp1.pkcs8_bytes()).unwrap(),
            validators,
            store.clone(),
            EngineConfig {
                finality_depth: 3,
                proposal_timeout_ms: 100,
            },
        );

        let events = engine
            .handle(ConsensusCommand::Propose {
                slot: 9,
                prev_hash: H256::ZERO,
                timestamp: 1_000,
                judgments: vec![],
            })
            .unwrap();
        let hash = events
            .iter()
            .find_map(|e| match e {
                ConsensusEvent::VoteCast(v) => Some(v.block_hash),
                _ => None,
            })
            .unwrap();
        assert_eq!(store.get_status(&hash).unwrap(), Some(BlockStatus::Proposed));

        let events = engine.handle(ConsensusCommand::Tick { now_ms: 1_200 }).unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, ConsensusEvent::ProposalTimeout { hash: h, .. } if *h == hash)));
        // No sibling reached Confirmed, so the block stays Proposed rather
        // than transitioning to Rejected.
        assert_eq!(store.get_status(&hash).unwrap(), Some(BlockStatus::Proposed));
    }

    #[test]
    fn unsigned_vote_helper_is_rejected_by_verification() {
        let kp1 = Keypair::generate().unwrap();
        let mut validators = CanonicalMap::new();
        validators.insert(kp1.public_key(), validator(&kp1, 10.0));
        let store: Arc<dyn ChainStore> = Arc::new(InMemoryChainStore::new());
        let mut engine = ConsensusEngine::new(
            Keypair::generate().unwrap(),
            validators,
            store,
            EngineConfig::default(),
        );
        let bogus = unsigned(1, H256::ZERO, VoteDecision::Approve, kp1.public_key());
        let events = engine.handle(ConsensusCommand::HandleVote { vote: bogus }).unwrap();
        assert!(events.is_empty());
    }
}
