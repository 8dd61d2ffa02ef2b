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

//! The typed event bus `NetworkNode` publishes to its embedder.
//!
//! There is no module-level singleton: the bus lives as a field on
//! `NetworkNode`, and every subscriber gets a handle it can drop (or call
//! [`Subscription::unsubscribe`] on) to stop receiving events.

use crate::core::consensus::signals::Signals;
use crate::core::types::{PublicKey, H256};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// The event kinds an embedder can subscribe to, matching `spec.md` §6's
/// `eventType` enumeration.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeEvent {
    /// This node proposed a new block.
    BlockProposed {
        /// Slot the block was proposed for.
        slot: u64,
        /// Proposed block's hash.
        hash: H256,
    },
    /// A block crossed the approval threshold.
    BlockConfirmed {
        /// Confirmed slot.
        slot: u64,
        /// Confirmed block's hash.
        hash: H256,
    },
    /// A block reached finality.
    BlockFinalized {
        /// Finalized slot.
        slot: u64,
        /// Finalized block's hash.
        hash: H256,
    },
    /// A fork was first observed at a slot.
    ForkDetected {
        /// Slot with competing branches.
        slot: u64,
    },
    /// A previously-detected fork was resolved via reorg.
    ForkResolved {
        /// Slot whose fork was resolved.
        slot: u64,
    },
    /// A peer completed the transport handshake.
    PeerConnected {
        /// Peer identity.
        peer: PublicKey,
    },
    /// A peer's signed identity proof verified (distinct from the Noise
    /// channel handshake: this confirms the application-level key).
    PeerIdentified {
        /// Peer identity.
        peer: PublicKey,
    },
    /// A peer connection was lost.
    PeerDisconnected {
        /// Peer identity.
        peer: PublicKey,
    },
    /// Periodic signal-layer + E-Score snapshot.
    MetricsReported {
        /// Cognitive-thermodynamic signal snapshot.
        signals: Signals,
        /// This node's own current E-Score.
        e_score: f64,
    },
}

/// A handle returned from [`EventBus::subscribe`]. Dropping it is enough
/// to stop delivery; `unsubscribe` just makes the intent explicit and
/// frees the slot immediately instead of waiting for the next failed send.
pub struct Subscription {
    id: u64,
    bus: std::sync::Weak<EventBusInner>,
}

impl Subscription {
    /// Stop receiving events on the channel this subscription came from.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.subscribers.lock().expect("event bus mutex poisoned").remove(&self.id);
        }
    }
}

struct EventBusInner {
    next_id: AtomicU64,
    subscribers: Mutex<BTreeMap<u64, mpsc::Sender<NodeEvent>>>,
}

/// Fan-out publisher for [`NodeEvent`]s. Cheap to clone (an `Arc` around a
/// mutex-guarded subscriber table); the background task holds one clone to
/// publish from, the public handle holds another so embedders can
/// subscribe without routing through the command channel.
#[derive(Clone)]
pub struct EventBus {
    inner: std::sync::Arc<EventBusInner>,
}

/// Per-subscriber channel capacity. A slow subscriber drops events rather
/// than backing up the publishing task.
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;

impl EventBus {
    /// A fresh bus with no subscribers.
    pub fn new() -> Self {
        Self {
            inner: std::sync::Arc::new(EventBusInner {
                next_id: AtomicU64::new(0),
                subscribers: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Register a new subscriber, returning its receiver and an
    /// unsubscribe handle.
    pub fn subscribe(&self) -> (mpsc::Receiver<NodeEvent>, Subscription) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.lock().expect("event bus mutex poisoned").insert(id, tx);
        (
            rx,
            Subscription {
                id,
                bus: std::sync::Arc::downgrade(&self.inner),
            },
        )
    }

    /// Publish `event` to every live subscriber. A subscriber whose
    /// channel is full or closed is dropped from the table rather than
    /// blocking the publisher.
    pub fn publish(&self, event: NodeEvent) {
        let mut subscribers = self.inner.subscribers.lock().expect("event bus mutex poisoned");
        subscribers.retain(|_, tx| tx.try_send(event.clone()).is_ok() || !tx.is_closed());
    }

    /// Number of currently-registered subscribers, for tests/status.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().expect("event bus mutex poisoned").len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let (mut rx, _sub) = bus.subscribe();
        bus.publish(NodeEvent::ForkDetected { slot: 7 });
        let event = rx.recv().await.unwrap();
        assert_eq!(event, NodeEvent::ForkDetected { slot: 7 });
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery_and_frees_the_slot() {
        let bus = EventBus::new();
        let (_rx, sub) = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        sub.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_their_own_copy() {
        let bus = EventBus::new();
        let (mut rx1, _s1) = bus.subscribe();
        let (mut rx2, _s2) = bus.subscribe();
        bus.publish(NodeEvent::PeerConnected {
            peer: PublicKey([1u8; 32]),
        });
        assert_eq!(rx1.recv().await.unwrap(), NodeEvent::PeerConnected { peer: PublicKey([1u8; 32]) });
        assert_eq!(rx2.recv().await.unwrap(), NodeEvent::PeerConnected { peer: PublicKey([1u8; 32]) });
    }
}
