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

//! The gossip overlay (C4): a dedup ring buffer in front of the transport's
//! broadcast, so a flooded message is re-broadcast exactly once per peer
//! and never looped back to its sender or replayed after its TTL expires.

use crate::core::codec::{self, CodecError, Payload, SignedMessage};
use crate::core::crypto;
use crate::core::types::{PublicKey, H256};
use crate::networking::transport::Transport;
use std::collections::VecDeque;
use std::sync::Mutex;

/// How long a message id is remembered for dedup purposes.
pub const DEDUP_TTL_MS: i64 = 60_000;

/// Gossip-layer errors.
#[derive(Debug, thiserror::Error)]
pub enum GossipError {
    /// The inbound message's signature didn't verify.
    #[error("bad signature")]
    BadSignature,
    /// The inbound message's envelope failed codec validation.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// The outcome of handing the gossip layer an inbound message.
#[derive(Debug)]
pub enum Delivery {
    /// First time this message id has been seen: deliver to the local
    /// application/consensus layer and re-broadcast to other peers. The
    /// verified sender is carried alongside so a caller can address a
    /// targeted reply (e.g. a fork-resolution or catchup response) instead
    /// of flooding one back.
    Fresh {
        /// The payload to deliver.
        payload: Payload,
        /// The message's verified sender.
        sender: PublicKey,
    },
    /// Already seen (or expired-then-reseen within the same sweep window);
    /// dropped without delivery or re-broadcast.
    Duplicate,
}

fn message_id(sender: &PublicKey, payload_bytes: &[u8]) -> H256 {
    let mut buf = Vec::with_capacity(32 + payload_bytes.len());
    buf.extend_from_slice(&sender.0);
    buf.extend_from_slice(payload_bytes);
    crypto::sha256(&buf)
}

struct SeenEntry {
    id: H256,
    seen_at_ms: i64,
}

/// Ring buffer of recently-seen message ids, swept on every insert so no
/// background task is needed to bound its size.
struct Dedup {
    order: Mutex<VecDeque<SeenEntry>>,
}

impl Dedup {
    fn new() -> Self {
        Self { order: Mutex::new(VecDeque::new()) }
    }

    /// Returns `true` if `id` had already been seen within the TTL window
    /// (and therefore should be treated as a duplicate); otherwise records
    /// it as seen and returns `false`.
    fn check_and_insert(&self, id: H256, now_ms: i64) -> bool {
        let mut order = self.order.lock().expect("dedup mutex poisoned");
        while let Some(front) = order.front() {
            if now_ms - front.seen_at_ms > DEDUP_TTL_MS {
                order.pop_front();
            } else {
                break;
            }
        }
        if order.iter().any(|e| e.id == id) {
            return true;
        }
        order.push_back(SeenEntry { id, seen_at_ms: now_ms });
        false
    }
}

/// Wraps a [`Transport`] with dedup and broadcast fan-out, so callers only
/// ever see each distinct message once.
pub struct Gossip {
    transport: std::sync::Arc<Transport>,
    dedup: Dedup,
}

impl Gossip {
    /// Wrap `transport` with a fresh dedup buffer.
    pub fn new(transport: std::sync::Arc<Transport>) -> Self {
        Self { transport, dedup: Dedup::new() }
    }

    /// Handle one inbound signed message: verify its signature, dedup it,
    /// and -- if fresh -- re-broadcast it to every other connected peer
    /// (limited flood, one hop of suppression at the sender).
    pub fn handle_inbound(&self, msg: SignedMessage, now_ms: i64) -> Result<Delivery, GossipError> {
        codec::verify_signed_message(&msg).map_err(|_| GossipError::BadSignature)?;

        let payload_bytes =
            serde_json::to_vec(&msg.envelope.d).map_err(|_| GossipError::Codec(CodecError::BadFrame))?;
        let id = message_id(&msg.sender_public_key, &payload_bytes);

        if self.dedup.check_and_insert(id, now_ms) {
            return Ok(Delivery::Duplicate);
        }

        self.transport.broadcast(&msg, Some(&msg.sender_public_key));
        Ok(Delivery::Fresh {
            payload: msg.envelope.d,
            sender: msg.sender_public_key,
        })
    }

    /// Originate a new message locally: sign it, mark its id as seen (so a
    /// flooded copy bouncing back doesn't get re-delivered), and broadcast
    /// to every connected peer.
    pub fn publish(&self, payload: Payload, keypair: &crypto::Keypair, now_ms: i64) -> Result<(), GossipError> {
        let envelope = codec::build_envelope(payload)?;
        let signed = codec::sign_message(envelope, keypair)?;
        let payload_bytes =
            serde_json::to_vec(&signed.envelope.d).map_err(|_| GossipError::Codec(CodecError::BadFrame))?;
        let id = message_id(&signed.sender_public_key, &payload_bytes);
        self.dedup.check_and_insert(id, now_ms);
        self.transport.broadcast(&signed, None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Vote, VoteDecision};
    use crate::networking::transport::TransportConfig;

    fn sample_signed(keypair: &crypto::Keypair) -> SignedMessage {
        let payload = Payload::Vote(Vote {
            slot: 1,
            block_hash: H256::ZERO,
            decision: VoteDecision::Approve,
            voter: keypair.public_key(),
            signature: crate::core::types::Signature(vec![0u8; 64]),
        });
        let envelope = codec::build_envelope(payload).unwrap();
        codec::sign_message(envelope, keypair).unwrap()
    }

    fn sample_gossip() -> Gossip {
        let identity = crypto::Keypair::generate().unwrap();
        let config = TransportConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            heartbeat_ms: 10_000,
            max_peers: 8,
        };
        let (transport, _events_rx) = Transport::new(config, identity);
        Gossip::new(std::sync::Arc::new(transport))
    }

    #[test]
    fn fresh_message_is_delivered_once() {
        let gossip = sample_gossip();
        let kp = crypto::Keypair::generate().unwrap();
        let msg = sample_signed(&kp);
        let first = gossip.handle_inbound(msg.clone(), 0).unwrap();
        assert!(matches!(first, Delivery::Fresh { .. }));
        let second = gossip.handle_inbound(msg, 0).unwrap();
        assert!(matches!(second, Delivery::Duplicate));
    }

    #[test]
    fn message_reappears_after_ttl_expires() {
        let gossip = sample_gossip();
        let kp = crypto::Keypair::generate().unwrap();
        let msg = sample_signed(&kp);
        assert!(matches!(gossip.handle_inbound(msg.clone(), 0).unwrap(), Delivery::Fresh { .. }));
        assert!(matches!(
            gossip.handle_inbound(msg.clone(), DEDUP_TTL_MS + 1).unwrap(),
            Delivery::Fresh { .. }
        ));
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let gossip = sample_gossip();
        let kp = crypto::Keypair::generate().unwrap();
        let mut msg = sample_signed(&kp);
        msg.signature.0[0] ^= 0xFF;
        assert!(matches!(gossip.handle_inbound(msg, 0), Err(GossipError::BadSignature)));
    }

    #[test]
    fn publish_marks_own_message_as_seen() {
        let gossip = sample_gossip();
        let kp = crypto::Keypair::generate().unwrap();
        gossip.publish(Payload::Heartbeat { slot: 1 }, &kp, 0).unwrap();
        let envelope = codec::build_envelope(Payload::Heartbeat { slot: 1 }).unwrap();
        let signed = codec::sign_message(envelope, &kp).unwrap();
        // Same payload bytes as what publish() just sent -> same id -> duplicate.
        let id_bytes = serde_json::to_vec(&signed.envelope.d).unwrap();
        let id = message_id(&kp.public_key(), &id_bytes);
        assert!(gossip.dedup.check_and_insert(id, 0));
    }
}
