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

//! Domain-separated hashing and signing bytes for blocks and votes, and the
//! canonical Merkle root over a block's judgments.
//!
//! Pinned formulas (SPEC_FULL.md Data Model, Open Questions resolved):
//!
//! `merkle_root = 0x00..00` for an empty judgment list, else a binary tree
//! built over judgments sorted by `id`, leaf/node hashing domain-separated
//! the same way `core::state::merkle` does it for key/value pairs.
//!
//! `block_hash = H("phinet-block-v1" || slot_be || prev_hash || proposer ||
//! timestamp_be || merkle_root)` -- the hash never includes itself, and is
//! computed once at proposal time, then carried unchanged.

use crate::core::crypto::sha256;
use crate::core::types::{Block, H256, Judgment, ValidatorId, VoteDecision};
use thiserror::Error;

/// Signing/hashing errors. Mostly a placeholder today; kept as a `Result`
/// boundary so adding fallible encoding later doesn't change call sites.
#[derive(Debug, Error)]
pub enum SigningError {
    /// Judgment list could not be canonically ordered (duplicate ids).
    #[error("duplicate judgment id")]
    DuplicateJudgmentId,
}

const LEAF_DOMAIN: &[u8] = b"phinet-judgment-leaf-v1";
const NODE_DOMAIN: &[u8] = b"phinet-judgment-node-v1";
const BLOCK_DOMAIN: &[u8] = b"phinet-block-v1";
const VOTE_DOMAIN: &[u8] = b"phinet-vote-v1";
const IDENTITY_DOMAIN: &[u8] = b"phinet-identity-v1";

fn hash_leaf(judgment: &Judgment) -> H256 {
    let mut buf = Vec::with_capacity(LEAF_DOMAIN.len() + 64);
    buf.extend_from_slice(LEAF_DOMAIN);
    buf.extend_from_slice(sha256(judgment.id.as_bytes()).as_bytes());
    buf.extend_from_slice(sha256(&judgment.payload).as_bytes());
    sha256(&buf)
}

fn hash_node(left: H256, right: H256) -> H256 {
    let mut buf = Vec::with_capacity(NODE_DOMAIN.len() + 64);
    buf.extend_from_slice(NODE_DOMAIN);
    buf.extend_from_slice(left.as_bytes());
    buf.extend_from_slice(right.as_bytes());
    sha256(&buf)
}

/// Canonical Merkle root over `judgments`, sorted by `id` first so every
/// node computes the same root regardless of gossip arrival order.
pub fn merkle_root(judgments: &[Judgment]) -> Result<H256, SigningError> {
    if judgments.is_empty() {
        return Ok(H256::ZERO);
    }
    let mut sorted: Vec<&Judgment> = judgments.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));
    for pair in sorted.windows(2) {
        if pair[0].id == pair[1].id {
            return Err(SigningError::DuplicateJudgmentId);
        }
    }
    let mut level: Vec<H256> = sorted.iter().map(|j| hash_leaf(j)).collect();
    while level.len() > 1 {
        let mut next = Vec::with_capacity((level.len() + 1) / 2);
        let mut i = 0;
        while i < level.len() {
            let left = level[i];
            let right = if i + 1 < level.len() { level[i + 1] } else { level[i] };
            next.push(hash_node(left, right));
            i += 2;
        }
        level = next;
    }
    Ok(level[0])
}

/// Canonical block hash over every field except `hash` itself.
pub fn block_hash(
    slot: u64,
    prev_hash: H256,
    proposer: &ValidatorId,
    timestamp: i64,
    merkle_root: H256,
) -> H256 {
    let mut buf = Vec::with_capacity(BLOCK_DOMAIN.len() + 8 + 32 + 32 + 8 + 32);
    buf.extend_from_slice(BLOCK_DOMAIN);
    buf.extend_from_slice(&slot.to_be_bytes());
    buf.extend_from_slice(prev_hash.as_bytes());
    buf.extend_from_slice(&proposer.0);
    buf.extend_from_slice(&timestamp.to_be_bytes());
    buf.extend_from_slice(merkle_root.as_bytes());
    sha256(&buf)
}

/// Recompute `block.hash` and `block.merkle_root` and verify they match
/// what the block carries, without mutating it.
pub fn verify_block_hash(block: &Block) -> bool {
    let Ok(root) = merkle_root(&block.judgments) else {
        return false;
    };
    if root != block.merkle_root {
        return false;
    }
    let expected = block_hash(block.slot, block.prev_hash, &block.proposer, block.timestamp, root);
    expected == block.hash
}

/// Build a fully-hashed block from its constituent fields.
pub fn build_block(
    slot: u64,
    prev_hash: H256,
    proposer: ValidatorId,
    timestamp: i64,
    judgments: Vec<Judgment>,
) -> Result<Block, SigningError> {
    let root = merkle_root(&judgments)?;
    let hash = block_hash(slot, prev_hash, &proposer, timestamp, root);
    Ok(Block {
        slot,
        prev_hash,
        proposer,
        timestamp,
        judgments,
        merkle_root: root,
        hash,
    })
}

/// Domain-separated bytes a vote is signed over: everything that
/// identifies "what was voted on", so a signature cannot be replayed
/// across slots, blocks, or decisions.
pub fn vote_signing_bytes(slot: u64, block_hash: H256, decision: VoteDecision) -> Vec<u8> {
    let mut out = Vec::with_capacity(VOTE_DOMAIN.len() + 8 + 32 + 1);
    out.extend_from_slice(VOTE_DOMAIN);
    out.extend_from_slice(&slot.to_be_bytes());
    out.extend_from_slice(block_hash.as_bytes());
    out.push(match decision {
        VoteDecision::Approve => 1,
        VoteDecision::Reject => 0,
    });
    out
}

/// Domain-separated bytes an identity handshake proof is signed over:
/// `timestamp || nonce`, binding the proof to a single connection attempt.
pub fn identity_signing_bytes(timestamp: i64, nonce: &[u8; 16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(IDENTITY_DOMAIN.len() + 8 + 16);
    out.extend_from_slice(IDENTITY_DOMAIN);
    out.extend_from_slice(&timestamp.to_be_bytes());
    out.extend_from_slice(nonce);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn judgment(id: &str) -> Judgment {
        Judgment {
            id: id.to_string(),
            payload: id.as_bytes().to_vec(),
            produced_at: 0,
        }
    }

    #[test]
    fn empty_judgments_give_zero_root() {
        assert_eq!(merkle_root(&[]).unwrap(), H256::ZERO);
    }

    #[test]
    fn merkle_root_is_order_independent() {
        let a = merkle_root(&[judgment("b"), judgment("a"), judgment("c")]).unwrap();
        let b = merkle_root(&[judgment("a"), judgment("b"), judgment("c")]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let res = merkle_root(&[judgment("a"), judgment("a")]);
        assert!(matches!(res, Err(SigningError::DuplicateJudgmentId)));
    }

    #[test]
    fn build_block_round_trips_through_verify() {
        let proposer = ValidatorId([7u8; 32]);
        let block = build_block(3, H256::ZERO, proposer, 1_000, vec![judgment("a")]).unwrap();
        assert!(verify_block_hash(&block));
    }

    #[test]
    fn tampered_timestamp_fails_verification() {
        let proposer = ValidatorId([7u8; 32]);
        let mut block = build_block(3, H256::ZERO, proposer, 1_000, vec![judgment("a")]).unwrap();
        block.timestamp += 1;
        assert!(!verify_block_hash(&block));
    }

    #[test]
    fn vote_signing_bytes_differ_by_decision() {
        let approve = vote_signing_bytes(1, H256::ZERO, VoteDecision::Approve);
        let reject = vote_signing_bytes(1, H256::ZERO, VoteDecision::Reject);
        assert_ne!(approve, reject);
    }
}
