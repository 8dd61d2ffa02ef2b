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

//! Translates gossip-delivered wire payloads into [`ConsensusCommand`]s
//! and CATCHUP responses into fork-detector reports.
//!
//! Kept as a thin, mostly-stateless translation layer (the shape the
//! teacher's own `ConsensusDriver` had) rather than owning the engine
//! itself: the engine is driven by whichever task holds its
//! `mpsc::Sender<ConsensusCommand>` (the orchestrator), so this module
//! never locks or blocks.

use crate::core::codec::Payload;
use crate::core::consensus::engine::ConsensusCommand;
use crate::core::types::{Block, H256};
use thiserror::Error;

/// Driver errors.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The payload variant carries no consensus-relevant content.
    #[error("payload is not a consensus message")]
    NotConsensusRelevant,
}

/// A CATCHUP response or gossip fork report reduced to the `(slot,
/// hash)` pair the fork detector consumes. CATCHUP responses are
/// advisory (SPEC_FULL.md's pinned "CATCHUP authority" answer): they flow
/// through the same `ForkDetector::observe` path as any peer's reported
/// fork claim and never force-apply a reorg by themselves.
#[derive(Clone, Debug, PartialEq)]
pub struct ForkReport {
    /// Slot being reported.
    pub slot: u64,
    /// Hash reported for that slot.
    pub hash: H256,
}

/// Translates inbound wire payloads into engine commands.
#[derive(Default)]
pub struct ConsensusDriver {
    proposals_seen: u64,
    votes_seen: u64,
}

impl ConsensusDriver {
    /// A fresh driver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate one inbound payload into a `ConsensusCommand`, if it
    /// carries consensus content. Non-consensus payloads (handshake,
    /// heartbeat, peer list, fork-resolution request/response, catchup)
    /// are routed by the gossip layer instead and returned as `Err` here.
    pub fn on_payload(&mut self, payload: Payload) -> Result<ConsensusCommand, DriverError> {
        match payload {
            Payload::BlockProposal(block) => {
                self.proposals_seen += 1;
                Ok(ConsensusCommand::HandleProposal { block })
            }
            Payload::BlockFinal(block) => {
                self.proposals_seen += 1;
                Ok(ConsensusCommand::HandleProposal { block })
            }
            Payload::Vote(vote) => {
                self.votes_seen += 1;
                Ok(ConsensusCommand::HandleVote { vote })
            }
            _ => Err(DriverError::NotConsensusRelevant),
        }
    }

    /// Reduce a CATCHUP response's blocks to fork reports: one
    /// `(slot, hash)` pair per block.
    pub fn catchup_to_fork_reports(blocks: &[Block]) -> Vec<ForkReport> {
        blocks
            .iter()
            .map(|b| ForkReport {
                slot: b.slot,
                hash: b.hash,
            })
            .collect()
    }

    /// Total proposals translated so far.
    pub fn proposals_seen(&self) -> u64 {
        self.proposals_seen
    }

    /// Total votes translated so far.
    pub fn votes_seen(&self) -> u64 {
        self.votes_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{PublicKey, Signature, Vote, VoteDecision};

    fn sample_block() -> Block {
        Block {
            slot: 1,
            prev_hash: H256::ZERO,
            proposer: PublicKey([1u8; 32]),
            timestamp: 0,
            judgments: vec![],
            merkle_root: H256::ZERO,
            hash: H256([2u8; 32]),
        }
    }

    #[test]
    fn block_proposal_translates_to_handle_proposal() {
        let mut driver = ConsensusDriver::new();
        let cmd = driver.on_payload(Payload::BlockProposal(sample_block())).unwrap();
        assert!(matches!(cmd, ConsensusCommand::HandleProposal { .. }));
        assert_eq!(driver.proposals_seen(), 1);
    }

    #[test]
    fn vote_translates_to_handle_vote() {
        let mut driver = ConsensusDriver::new();
        let vote = Vote {
            slot: 1,
            block_hash: H256::ZERO,
            decision: VoteDecision::Approve,
            voter: PublicKey([1u8; 32]),
            signature: Signature(vec![0u8; 64]),
        };
        let cmd = driver.on_payload(Payload::Vote(vote)).unwrap();
        assert!(matches!(cmd, ConsensusCommand::HandleVote { .. }));
        assert_eq!(driver.votes_seen(), 1);
    }

    #[test]
    fn heartbeat_is_not_consensus_relevant() {
        let mut driver = ConsensusDriver::new();
        let res = driver.on_payload(Payload::Heartbeat { slot: 1 });
        assert!(matches!(res, Err(DriverError::NotConsensusRelevant)));
    }

    #[test]
    fn catchup_blocks_become_fork_reports() {
        let block = sample_block();
        let reports = ConsensusDriver::catchup_to_fork_reports(&[block.clone()]);
        assert_eq!(
            reports,
            vec![ForkReport {
                slot: block.slot,
                hash: block.hash
            }]
        );
    }
}
