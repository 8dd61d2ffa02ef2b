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

//! Deterministic data model shared by every component: hashes, keys,
//! judgments, blocks, votes, validator records, fork records, and the
//! configuration shape accepted by the orchestrator.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// 256-bit hash (SHA-256 output).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct H256(pub [u8; 32]);

impl H256 {
    /// All-zero hash, used as "genesis zero" prev_hash and the empty
    /// Merkle root.
    pub const ZERO: H256 = H256([0u8; 32]);

    /// Construct from raw bytes.
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding.
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for H256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Ed25519 public key bytes (32 bytes), the canonical node identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    /// `"ed25519:<hex>"` display form used on the wire and in logs.
    pub fn format(&self) -> String {
        format!("ed25519:{}", hex::encode(self.0))
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format())
    }
}

/// Ed25519 signature bytes (64 bytes).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(pub Vec<u8>);

/// A validator/node identity, keyed by its Ed25519 public key. Ordering is
/// lexicographic on the key bytes, which pins the iteration order used to
/// build the leader schedule's cumulative-weight line.
pub type ValidatorId = PublicKey;

/// Canonical map alias: BTreeMap everywhere in wire types so serialization
/// order is deterministic (no `HashMap` in anything that gets hashed or
/// signed).
pub type CanonicalMap<K, V> = BTreeMap<K, V>;

/// An opaque judgment produced by the application layer. The core never
/// inspects `payload`; it only orders, hashes, and propagates judgments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Judgment {
    /// Application-defined identifier, used as the Merkle-tree sort key.
    pub id: String,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
    /// Producer-supplied timestamp (unix ms); not validated by the core.
    pub produced_at: i64,
}

/// A block: one slot's worth of judgments plus the chain-linking fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Slot this block was proposed for.
    pub slot: u64,
    /// Hash of the parent block (all-zero only for slot 0, "genesis zero").
    pub prev_hash: H256,
    /// Proposer's public key (the slot's expected leader).
    pub proposer: PublicKey,
    /// Proposal wall-clock timestamp (unix ms).
    pub timestamp: i64,
    /// Judgments packed into this block.
    pub judgments: Vec<Judgment>,
    /// Domain-separated Merkle root over `judgments` (see core::consensus::signing).
    pub merkle_root: H256,
    /// Canonical hash over every other field, in fixed order (see
    /// core::consensus::signing::block_hash).
    pub hash: H256,
}

/// Forward states of a block; `Rejected` is a sink state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockStatus {
    /// Proposed, self-voted, awaiting supermajority approval.
    Proposed,
    /// Approved by >= phi^-1 of total validator weight.
    Confirmed,
    /// Confirmed and chained-to by enough later finalized slots.
    Finalized,
    /// Rejected due to timeout-while-a-sibling-confirmed, or equivocation.
    Rejected,
}

/// A vote decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteDecision {
    /// Approve the referenced block.
    Approve,
    /// Reject the referenced block.
    Reject,
}

/// A consensus vote. Invariant: one vote per `(voter, slot)`; a second,
/// differing vote from the same voter at the same slot is equivocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    /// Slot being voted on.
    pub slot: u64,
    /// Block hash the vote refers to.
    pub block_hash: H256,
    /// Approve or reject.
    pub decision: VoteDecision,
    /// Voter identity.
    pub voter: ValidatorId,
    /// Signature over the domain-separated vote bytes.
    pub signature: Signature,
}

/// A validator's reputation/weight inputs, as tracked locally. The
/// registry is eventually consistent across nodes; weight is always read
/// from the local view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidatorRecord {
    /// Validator identity.
    pub public_key: PublicKey,
    /// E-Score in [0, 100].
    pub e_score: f64,
    /// Cumulative burned amount (smallest unit).
    pub burned: u64,
    /// Uptime ratio in [0, 1].
    pub uptime: f64,
    /// Deterministic function of the three fields above; see
    /// core::escore::validator_weight.
    pub weight: f64,
}

/// Per-slot fork bookkeeping: which hashes were reported, by whom, and
/// with how much aggregate reporting weight.
#[derive(Clone, Debug, Default)]
pub struct ForkSlotRecord {
    /// hash -> (peers who reported it, total reporting weight).
    pub hashes: CanonicalMap<H256, (BTreeSet<PublicKey>, f64)>,
}

impl ForkSlotRecord {
    /// A slot has a fork iff it holds >= 2 distinct hashes.
    pub fn is_fork(&self) -> bool {
        self.hashes.len() >= 2
    }

    /// Heaviest branch: greatest total reporting weight, ties broken by
    /// lexicographically smaller hash.
    pub fn heaviest(&self) -> Option<H256> {
        self.hashes
            .iter()
            .max_by(|(ha, (_, wa)), (hb, (_, wb))| {
                wa.partial_cmp(wb)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| hb.cmp(ha))
            })
            .map(|(h, _)| *h)
    }
}

/// Node configuration root, as accepted by `NetworkNode::start`. Parsing
/// this shape out of TOML/env/flags is an external concern; see
/// `src/main.rs` for the minimal env-var wiring used by the example binary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node-level settings.
    pub node: NodeSettings,
    /// Metrics/status HTTP endpoint settings.
    pub http: HttpConfig,
    /// P2P transport/gossip settings.
    pub p2p: P2pConfig,
    /// Consensus settings.
    pub consensus: ConsensusConfig,
}

/// Node-level settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Human-readable name.
    pub name: String,
    /// Data directory (sled DBs + keys + audit log).
    pub data_dir: String,
}

/// Metrics/status HTTP endpoint settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Listen address, e.g. "0.0.0.0:9090".
    pub listen_addr: String,
}

/// P2P transport + gossip settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct P2pConfig {
    /// Listen address, e.g. "0.0.0.0:4001".
    pub listen_addr: String,
    /// Gossip topic / network identifier (also used for registry binding).
    pub topic: String,
    /// Max inbound messages/sec accepted per peer before throttling.
    pub max_msg_per_sec: u32,
    /// Maximum number of peers the node will track at once.
    pub max_peers: usize,
    /// Seed peers to dial at startup ("host:port").
    #[serde(default)]
    pub seed_peers: Vec<String>,
    /// Heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
}

fn default_heartbeat_ms() -> u64 {
    10_000
}

/// Consensus settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Validator public keys (hex, 32 bytes each) known at startup.
    pub validators_hex: Vec<String>,
    /// Slot duration in milliseconds (default 400, per spec constants).
    #[serde(default = "default_slot_ms")]
    pub slot_ms: u64,
    /// Finality depth: confirmations required before Finalized (default 3).
    #[serde(default = "default_finality_depth")]
    pub finality_depth: u32,
    /// Per-slot proposal timeout in milliseconds.
    #[serde(default = "default_proposal_timeout_ms")]
    pub proposal_timeout_ms: u64,
    /// Unix-ms origin of slot 0. Defaults to the unix epoch, so every node
    /// derives the same slot number from wall-clock time alone with no
    /// out-of-band coordination.
    #[serde(default)]
    pub genesis_ms: i64,
}

fn default_slot_ms() -> u64 {
    400
}
fn default_finality_depth() -> u32 {
    3
}
fn default_proposal_timeout_ms() -> u64 {
    2 * default_slot_ms()
}
