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

//! Prometheus metrics surfaced over the status HTTP endpoint. Each error
//! kind in [`crate::error::ErrorKind`] that matters operationally gets its
//! own counter, incremented wherever that error is raised.

use prometheus::{IntCounter, IntGauge, Registry};
use thiserror::Error;

/// Metrics errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// A metric failed to construct or register with the registry.
    #[error("prometheus registration failed")]
    Prom,
}

/// Metrics container, registered once at node startup and cloned (cheaply:
/// every field is an `Arc`-backed prometheus handle) into every component
/// that needs to record an observation.
#[derive(Clone)]
pub struct Metrics {
    /// The registry these metrics were registered into.
    pub registry: Registry,

    /// Currently-connected peers.
    pub p2p_peers: IntGauge,
    /// Highest slot with any stored block.
    pub block_height: IntGauge,
    /// Judgments packed into proposed blocks so far.
    pub judgments_total: IntCounter,

    /// Outbound/inbound frames dropped for queue overflow.
    pub p2p_overflow_dropped_total: IntCounter,
    /// Frames that failed codec validation (shape/size/version/checksum/skew).
    pub p2p_invalid_frame_total: IntCounter,
    /// Frames whose signature failed to verify.
    pub p2p_bad_signature_total: IntCounter,
    /// Peer handshakes that failed.
    pub p2p_handshake_failed_total: IntCounter,
    /// Peer disconnects (heartbeat miss or I/O error).
    pub p2p_peer_disconnected_total: IntCounter,
    /// Gossip messages dropped as duplicates.
    pub gossip_duplicate_total: IntCounter,

    /// Votes cast by this node.
    pub consensus_votes_cast_total: IntCounter,
    /// Blocks that crossed the approval threshold.
    pub consensus_blocks_confirmed_total: IntCounter,
    /// Blocks that reached finality.
    pub consensus_blocks_finalized_total: IntCounter,
    /// Proposals that timed out before confirmation.
    pub consensus_proposal_timeouts_total: IntCounter,
    /// Equivocations detected (proposer or voter).
    pub consensus_equivocations_total: IntCounter,
    /// Forks detected by the fork detector.
    pub consensus_forks_detected_total: IntCounter,
    /// Forks resolved after a reorg.
    pub consensus_forks_resolved_total: IntCounter,
}

macro_rules! new_counter {
    ($name:literal, $help:literal) => {
        IntCounter::new($name, $help).map_err(|_| MetricsError::Prom)?
    };
}

macro_rules! new_gauge {
    ($name:literal, $help:literal) => {
        IntGauge::new($name, $help).map_err(|_| MetricsError::Prom)?
    };
}

impl Metrics {
    /// Construct and register every metric into a fresh [`Registry`].
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let p2p_peers = new_gauge!("phinet_p2p_peers", "Currently connected peers");
        let block_height = new_gauge!("phinet_block_height", "Highest slot with a stored block");
        let judgments_total = new_counter!("phinet_judgments_total", "Judgments packed into proposed blocks");

        let p2p_overflow_dropped_total =
            new_counter!("phinet_p2p_overflow_dropped_total", "Frames dropped for queue overflow");
        let p2p_invalid_frame_total =
            new_counter!("phinet_p2p_invalid_frame_total", "Frames that failed codec validation");
        let p2p_bad_signature_total =
            new_counter!("phinet_p2p_bad_signature_total", "Frames with an invalid signature");
        let p2p_handshake_failed_total =
            new_counter!("phinet_p2p_handshake_failed_total", "Failed Noise handshakes");
        let p2p_peer_disconnected_total =
            new_counter!("phinet_p2p_peer_disconnected_total", "Peer disconnect events");
        let gossip_duplicate_total =
            new_counter!("phinet_gossip_duplicate_total", "Gossip messages dropped as duplicates");

        let consensus_votes_cast_total = new_counter!("phinet_consensus_votes_cast_total", "Votes cast locally");
        let consensus_blocks_confirmed_total =
            new_counter!("phinet_consensus_blocks_confirmed_total", "Blocks confirmed");
        let consensus_blocks_finalized_total =
            new_counter!("phinet_consensus_blocks_finalized_total", "Blocks finalized");
        let consensus_proposal_timeouts_total =
            new_counter!("phinet_consensus_proposal_timeouts_total", "Proposal timeouts");
        let consensus_equivocations_total =
            new_counter!("phinet_consensus_equivocations_total", "Equivocations detected");
        let consensus_forks_detected_total =
            new_counter!("phinet_consensus_forks_detected_total", "Forks detected");
        let consensus_forks_resolved_total =
            new_counter!("phinet_consensus_forks_resolved_total", "Forks resolved after a reorg");

        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(p2p_peers.clone()),
            Box::new(block_height.clone()),
            Box::new(judgments_total.clone()),
            Box::new(p2p_overflow_dropped_total.clone()),
            Box::new(p2p_invalid_frame_total.clone()),
            Box::new(p2p_bad_signature_total.clone()),
            Box::new(p2p_handshake_failed_total.clone()),
            Box::new(p2p_peer_disconnected_total.clone()),
            Box::new(gossip_duplicate_total.clone()),
            Box::new(consensus_votes_cast_total.clone()),
            Box::new(consensus_blocks_confirmed_total.clone()),
            Box::new(consensus_blocks_finalized_total.clone()),
            Box::new(consensus_proposal_timeouts_total.clone()),
            Box::new(consensus_equivocations_total.clone()),
            Box::new(consensus_forks_detected_total.clone()),
            Box::new(consensus_forks_resolved_total.clone()),
        ];
        for collector in collectors {
            registry.register(collector).map_err(|_| MetricsError::Prom)?;
        }

        Ok(Self {
            registry,
            p2p_peers,
            block_height,
            judgments_total,
            p2p_overflow_dropped_total,
            p2p_invalid_frame_total,
            p2p_bad_signature_total,
            p2p_handshake_failed_total,
            p2p_peer_disconnected_total,
            gossip_duplicate_total,
            consensus_votes_cast_total,
            consensus_blocks_confirmed_total,
            consensus_blocks_finalized_total,
            consensus_proposal_timeouts_total,
            consensus_equivocations_total,
            consensus_forks_detected_total,
            consensus_forks_resolved_total,
        })
    }

    /// Increment the counter matching `kind`, if this node tracks one for
    /// it. Kinds with no dedicated counter (e.g. `Cancelled`) are no-ops.
    pub fn record_error(&self, kind: crate::error::ErrorKind) {
        use crate::error::ErrorKind;
        match kind {
            ErrorKind::BadFrame | ErrorKind::StaleOrSkewedTimestamp => self.p2p_invalid_frame_total.inc(),
            ErrorKind::BadSignature => self.p2p_bad_signature_total.inc(),
            ErrorKind::HandshakeFailed => self.p2p_handshake_failed_total.inc(),
            ErrorKind::PeerUnreachable => self.p2p_peer_disconnected_total.inc(),
            ErrorKind::PeerOverloadDrop => self.p2p_overflow_dropped_total.inc(),
            ErrorKind::EquivocationDetected => self.consensus_equivocations_total.inc(),
            ErrorKind::ProposalTimeout => self.consensus_proposal_timeouts_total.inc(),
            ErrorKind::ForkUnresolvable => {}
            ErrorKind::UnknownSender
            | ErrorKind::ChainIntegrityViolation
            | ErrorKind::SlotMismatch
            | ErrorKind::ValidatorUnknown
            | ErrorKind::StoreBackendUnavailable
            | ErrorKind::Cancelled => {}
        }
    }
}
