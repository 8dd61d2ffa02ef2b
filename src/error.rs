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

//! Crate-wide error kinds.
//!
//! Every module defines its own `thiserror` enum for precise local
//! matching; each converts into [`ErrorKind`] / [`NodeError`] so the
//! orchestrator can report a single, stable vocabulary across the
//! embedder boundary instead of raising exceptions.

use thiserror::Error;

/// Stable, testable error kinds (see spec "Error Handling Design").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Frame failed shape/size/version validation.
    BadFrame,
    /// Signature did not verify.
    BadSignature,
    /// Envelope timestamp outside the allowed skew window.
    StaleOrSkewedTimestamp,
    /// Sender is not a known validator/peer.
    UnknownSender,
    /// Identity handshake failed (bad signature, replay, or timeout).
    HandshakeFailed,
    /// Could not reach a peer.
    PeerUnreachable,
    /// Outbound or inbound queue dropped a message due to overload.
    PeerOverloadDrop,
    /// Appending a block would violate the chain's invariants.
    ChainIntegrityViolation,
    /// Block's slot does not follow the head's slot.
    SlotMismatch,
    /// A validator signed two conflicting votes at the same slot.
    EquivocationDetected,
    /// A proposed block's timeout fired before confirmation.
    ProposalTimeout,
    /// A fork could not be resolved.
    ForkUnresolvable,
    /// Reference to a validator not in the local registry.
    ValidatorUnknown,
    /// A pluggable storage backend is unavailable.
    StoreBackendUnavailable,
    /// The operation was cancelled during shutdown.
    Cancelled,
}

impl ErrorKind {
    /// Stable lowercase/underscore name, as used in spec/metrics/logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::BadFrame => "bad_frame",
            ErrorKind::BadSignature => "bad_signature",
            ErrorKind::StaleOrSkewedTimestamp => "stale_or_skewed_timestamp",
            ErrorKind::UnknownSender => "unknown_sender",
            ErrorKind::HandshakeFailed => "handshake_failed",
            ErrorKind::PeerUnreachable => "peer_unreachable",
            ErrorKind::PeerOverloadDrop => "peer_overload_drop",
            ErrorKind::ChainIntegrityViolation => "chain_integrity_violation",
            ErrorKind::SlotMismatch => "slot_mismatch",
            ErrorKind::EquivocationDetected => "equivocation_detected",
            ErrorKind::ProposalTimeout => "proposal_timeout",
            ErrorKind::ForkUnresolvable => "fork_unresolvable",
            ErrorKind::ValidatorUnknown => "validator_unknown",
            ErrorKind::StoreBackendUnavailable => "store_backend_unavailable",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Crate-level error: a stable [`ErrorKind`] plus human context
/// (slot/peer) for logs and subscription events.
#[derive(Debug, Error)]
#[error("{kind}: {context}")]
pub struct NodeError {
    /// Stable error kind.
    pub kind: ErrorKind,
    /// Human-readable context (e.g. "slot=42 peer=ed25519:ab..").
    pub context: String,
}

impl NodeError {
    /// Construct a new error with context.
    pub fn new(kind: ErrorKind, context: impl Into<String>) -> Self {
        Self {
            kind,
            context: context.into(),
        }
    }
}
