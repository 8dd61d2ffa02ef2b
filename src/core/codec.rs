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

//! Wire envelope: a compact JSON-like frame `{v, t, d, c}` with a checksum
//! over the payload, signed messages wrapping it, and the message payload
//! kinds exchanged between peers.

use crate::core::types::{Block, Judgment, PublicKey, Signature, Vote, H256};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Maximum accepted frame size (spec: 1 MiB).
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Maximum allowed clock skew between sender and receiver timestamps.
pub const MAX_SKEW_MS: i64 = 5 * 60 * 1000;

/// Wire codec errors, matching the spec's error-kind vocabulary.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Frame exceeds `MAX_FRAME_BYTES`.
    #[error("frame too large")]
    TooLarge,
    /// Frame failed to parse as the expected JSON shape, or `v != 1`.
    #[error("bad frame")]
    BadFrame,
    /// Envelope timestamp too far from receiver's clock.
    #[error("stale or skewed timestamp")]
    StaleOrSkewed,
    /// `c` did not match `H(d)[..8]`.
    #[error("checksum mismatch")]
    ChecksumMismatch,
    /// `SignedMessage.signature` did not verify against `sender_public_key`.
    #[error("bad signature")]
    BadSignature,
}

/// Message payload kinds exchanged between peers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Payload {
    /// Handshake identity proof.
    Identity {
        /// Claimed public key.
        public_key: PublicKey,
        /// Sender wall-clock timestamp (unix ms).
        timestamp: i64,
        /// Signature over `timestamp || nonce`.
        signature: Signature,
        /// Anti-replay nonce.
        nonce: [u8; 16],
    },
    /// Liveness/uptime heartbeat.
    Heartbeat {
        /// Sender's current slot, for coarse sync-state hints.
        slot: u64,
    },
    /// Advertises known peer addresses.
    PeerList {
        /// `"host:port"` strings.
        peers: Vec<String>,
    },
    /// A judgment to be buffered for the next proposal.
    Judgment(Judgment),
    /// A proposed block.
    BlockProposal(Block),
    /// A vote on a block.
    Vote(Vote),
    /// A finalized block, broadcast for late joiners.
    BlockFinal(Block),
    /// Ask a peer to resolve a detected fork at `slot`.
    ForkResolutionRequest {
        /// Slot in dispute.
        slot: u64,
        /// Hash believed to be heaviest.
        hash: H256,
    },
    /// Response to a fork resolution request.
    ForkResolutionResponse {
        /// Slot in dispute.
        slot: u64,
        /// Responder's local hash for that slot, if any.
        hash: Option<H256>,
    },
    /// Ask a peer for blocks at or after `from_slot`.
    CatchupRequest {
        /// First slot of interest.
        from_slot: u64,
    },
    /// Response carrying blocks from a catchup request. Advisory only --
    /// see SPEC_FULL.md's pinned "CATCHUP authority" decision.
    CatchupResponse {
        /// Blocks the responder has for the requested range.
        blocks: Vec<Block>,
    },
}

/// A signed wire envelope. `payload_bytes` is the canonical JSON encoding
/// of `payload`; `checksum` is the first 8 hex chars of `H(payload_bytes)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    /// Format version; always 1.
    pub v: u8,
    /// Sender wall-clock timestamp (unix ms).
    pub t: i64,
    /// Payload, opaque to everything except this module and its caller.
    pub d: Payload,
    /// 8 lowercase hex chars: `H(canonical_json(d))[..8]`.
    pub c: String,
}

/// A signed message: envelope plus sender identity and signature over the
/// canonical payload bytes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedMessage {
    /// The wire envelope.
    pub envelope: Envelope,
    /// Claimed sender public key.
    pub sender_public_key: PublicKey,
    /// Signature over `envelope.d`'s canonical bytes.
    pub signature: Signature,
}

fn canonical_payload_bytes(payload: &Payload) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(payload).map_err(|_| CodecError::BadFrame)
}

fn checksum_of(payload_bytes: &[u8]) -> String {
    let digest = crate::core::crypto::sha256(payload_bytes);
    hex::encode(digest.as_bytes())[..8].to_string()
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Build a fresh, correctly-checksummed envelope for `payload`.
pub fn build_envelope(payload: Payload) -> Result<Envelope, CodecError> {
    let bytes = canonical_payload_bytes(&payload)?;
    Ok(Envelope {
        v: 1,
        t: now_ms(),
        c: checksum_of(&bytes),
        d: payload,
    })
}

/// Serialize an envelope to wire bytes (UTF-8 JSON object).
pub fn serialize(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    if envelope.v != 1 {
        return Err(CodecError::BadFrame);
    }
    let bytes = serde_json::to_vec(envelope).map_err(|_| CodecError::BadFrame)?;
    if bytes.len() > MAX_FRAME_BYTES {
        return Err(CodecError::TooLarge);
    }
    Ok(bytes)
}

/// Parse wire bytes into an envelope, validating version, size, staleness
/// and checksum (in that order, cheapest first).
pub fn parse(bytes: &[u8], receiver_now_ms: i64) -> Result<Envelope, CodecError> {
    if bytes.len() > MAX_FRAME_BYTES {
        return Err(CodecError::TooLarge);
    }
    let envelope: Envelope = serde_json::from_slice(bytes).map_err(|_| CodecError::BadFrame)?;
    if envelope.v != 1 {
        return Err(CodecError::BadFrame);
    }
    if (envelope.t - receiver_now_ms).abs() > MAX_SKEW_MS {
        return Err(CodecError::StaleOrSkewed);
    }
    let payload_bytes = canonical_payload_bytes(&envelope.d)?;
    let expected = checksum_of(&payload_bytes);
    if !constant_time_eq(expected.as_bytes(), envelope.c.as_bytes()) {
        return Err(CodecError::ChecksumMismatch);
    }
    Ok(envelope)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.len() == b.len() && a.ct_eq(b).into()
}

/// Sign `envelope`'s canonical payload bytes with `keypair`, producing the
/// `SignedMessage` actually placed on the wire.
pub fn sign_message(envelope: Envelope, keypair: &crate::core::crypto::Keypair) -> Result<SignedMessage, CodecError> {
    let payload_bytes = canonical_payload_bytes(&envelope.d)?;
    Ok(SignedMessage {
        signature: keypair.sign(&payload_bytes),
        sender_public_key: keypair.public_key(),
        envelope,
    })
}

/// Verify a `SignedMessage`'s signature against its claimed sender. Does
/// not re-validate the envelope's checksum/staleness/version; callers
/// should run the inbound bytes through `parse` first (which already
/// rebuilds the `Envelope`) and then verify the signature over it here.
pub fn verify_signed_message(msg: &SignedMessage) -> Result<(), CodecError> {
    let payload_bytes = canonical_payload_bytes(&msg.envelope.d)?;
    crate::core::crypto::verify(&msg.sender_public_key, &payload_bytes, &msg.signature)
        .map_err(|_| CodecError::BadSignature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::crypto::Keypair;

    fn sample_payload() -> Payload {
        Payload::Vote(Vote {
            slot: 7,
            block_hash: H256([0xaa; 32]),
            decision: crate::core::types::VoteDecision::Approve,
            voter: Keypair::generate().unwrap().public_key(),
            signature: Signature(vec![0u8; 64]),
        })
    }

    #[test]
    fn round_trip_preserves_payload() {
        let envelope = build_envelope(sample_payload()).unwrap();
        let bytes = serialize(&envelope).unwrap();
        let parsed = parse(&bytes, envelope.t).unwrap();
        assert_eq!(parsed.d, envelope.d);
        assert_eq!(parsed.c, envelope.c);
    }

    #[test]
    fn tampered_payload_byte_fails_checksum() {
        let envelope = build_envelope(sample_payload()).unwrap();
        let mut bytes = serialize(&envelope).unwrap();
        // Flip a byte inside the JSON payload area (well past the `"v":1,` prefix).
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        let res = parse(&bytes, envelope.t);
        assert!(res.is_err());
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let envelope = build_envelope(sample_payload()).unwrap();
        let bytes = serialize(&envelope).unwrap();
        let far_future = envelope.t + MAX_SKEW_MS + 1_000;
        assert_eq!(parse(&bytes, far_future), Err(CodecError::StaleOrSkewed));
    }

    #[test]
    fn oversized_frame_is_rejected_before_parsing() {
        let huge = vec![b'a'; MAX_FRAME_BYTES + 1];
        assert_eq!(parse(&huge, now_ms()), Err(CodecError::TooLarge));
    }

    #[test]
    fn version_other_than_one_is_rejected() {
        let mut envelope = build_envelope(sample_payload()).unwrap();
        envelope.v = 2;
        let bytes = serde_json::to_vec(&envelope).unwrap();
        assert_eq!(parse(&bytes, envelope.t), Err(CodecError::BadFrame));
    }

    #[test]
    fn signed_message_round_trips() {
        let kp = Keypair::generate().unwrap();
        let envelope = build_envelope(sample_payload()).unwrap();
        let signed = sign_message(envelope, &kp).unwrap();
        assert!(verify_signed_message(&signed).is_ok());
    }

    #[test]
    fn signed_message_rejects_wrong_sender_key() {
        let kp = Keypair::generate().unwrap();
        let impostor = Keypair::generate().unwrap();
        let envelope = build_envelope(sample_payload()).unwrap();
        let mut signed = sign_message(envelope, &kp).unwrap();
        signed.sender_public_key = impostor.public_key();
        assert_eq!(verify_signed_message(&signed), Err(CodecError::BadSignature));
    }
}
