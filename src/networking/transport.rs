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
#![allow(missing_docs)]

//! Peer transport (C3): one Tokio task per connected peer, Noise-encrypted
//! framing, reconnect with jittered backoff, heartbeats, and a bounded
//! drop-oldest outbound queue.
//!
//! Channel security and peer identity are deliberately separate concerns.
//! `snow` (Noise `XX`) establishes an encrypted, authenticated-by-ephemeral-
//! key channel to whatever is on the other end of the socket; binding that
//! channel to a validator's Ed25519 identity happens one layer up, via an
//! application-level [`crate::core::codec::Payload::Identity`] proof signed
//! with the validator's long-lived signing key (`core::consensus::signing`).
//! This mirrors the split the teacher's libp2p stack had (`libp2p-noise`
//! for the wire, identify/gossipsub for who-is-this), now driven directly
//! because the custom backoff/heartbeat/outbound-queue semantics below
//! don't fit the gossipsub abstraction (see DESIGN.md).

use crate::core::codec::{self, SignedMessage};
use crate::core::consensus::signing::identity_signing_bytes;
use crate::core::crypto::{self, sha256, Keypair};
use crate::core::types::{PublicKey, Signature};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

/// Maximum single frame size, matching the wire codec's cap.
const MAX_FRAME_BYTES: usize = crate::core::codec::MAX_FRAME_BYTES;
/// Handshake timeout (spec: ~10s per-connection handshake timeout).
const HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
/// Upper bound on reconnect backoff.
const MAX_BACKOFF_MS: u64 = 60_000;
/// Starting backoff before the first jittered doubling.
const BASE_BACKOFF_MS: u64 = 500;
/// Outbound queue capacity before the oldest pending frame is dropped.
const OUTBOUND_QUEUE_CAPACITY: usize = 256;
/// Heartbeat misses tolerated before a connection is considered dead.
const HEARTBEAT_MISS_LIMIT: u32 = 3;
/// Replay guard on the identity handshake's timestamp: stricter than the
/// general wire envelope's skew tolerance (spec: handshake proofs older
/// than 60s are rejected outright).
const HANDSHAKE_SKEW_MS: i64 = 60_000;

const NOISE_PATTERN: &str = "Noise_XX_25519_ChaChaPoly_SHA256";

/// Transport errors surfaced to the caller (recovered locally by
/// reconnecting; see `spec.md` §7 propagation policy).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("noise handshake failed")]
    HandshakeFailed,
    #[error("peer unreachable")]
    PeerUnreachable,
    #[error("frame too large")]
    FrameTooLarge,
    #[error("unknown peer")]
    UnknownPeer,
}

/// Connection lifecycle state for one peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Handshaking,
    Connected,
    Backoff,
}

/// Events delivered to whatever owns the transport (the gossip overlay).
#[derive(Debug)]
pub enum TransportEvent {
    /// A peer completed the identity handshake.
    PeerConnected(PublicKey),
    /// A peer's connection was lost (read/write error, or heartbeat timeout).
    PeerDisconnected(PublicKey),
    /// A frame arrived, Noise-decrypted and ready for the codec/gossip layer.
    Message(SignedMessage),
    /// An inbound frame was dropped: bad noise frame, oversized, or failed
    /// envelope/signature validation.
    InvalidFrame { from: Option<PublicKey> },
}

/// Transport configuration.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Local listen address.
    pub listen_addr: SocketAddr,
    /// Heartbeat interval, in milliseconds.
    pub heartbeat_ms: u64,
    /// Maximum number of peers to track.
    pub max_peers: usize,
}

struct OutboundQueue {
    items: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
    dropped_overflow: AtomicU64,
}

impl OutboundQueue {
    fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            dropped_overflow: AtomicU64::new(0),
        }
    }

    fn push(&self, frame: Vec<u8>) {
        let mut items = self.items.lock().expect("outbound queue mutex poisoned");
        if items.len() >= OUTBOUND_QUEUE_CAPACITY {
            items.pop_front();
            self.dropped_overflow.fetch_add(1, Ordering::Relaxed);
        }
        items.push_back(frame);
        drop(items);
        self.notify.notify_one();
    }

    async fn wait_for_batch(&self) -> Vec<Vec<u8>> {
        loop {
            {
                let mut items = self.items.lock().expect("outbound queue mutex poisoned");
                if !items.is_empty() {
                    return items.drain(..).collect();
                }
            }
            self.notify.notified().await;
        }
    }

    fn dropped_overflow(&self) -> u64 {
        self.dropped_overflow.load(Ordering::Relaxed)
    }
}

struct PeerRecord {
    state: ConnectionState,
    outbound: Arc<OutboundQueue>,
    cancel: CancellationToken,
}

/// Tracks per-peer connection state. Iteration releases the lock before
/// any awaited I/O, per the shared-state mutation discipline in the
/// concurrency model.
#[derive(Default)]
struct PeerTable {
    peers: Mutex<BTreeMap<PublicKey, PeerRecord>>,
}

impl PeerTable {
    fn connected_peers(&self) -> Vec<PublicKey> {
        self.peers
            .lock()
            .expect("peer table mutex poisoned")
            .iter()
            .filter(|(_, r)| r.state == ConnectionState::Connected)
            .map(|(id, _)| *id)
            .collect()
    }

    fn outbound_queue_for(&self, peer: &PublicKey) -> Option<Arc<OutboundQueue>> {
        self.peers
            .lock()
            .expect("peer table mutex poisoned")
            .get(peer)
            .map(|r| r.outbound.clone())
    }

    fn set_connected(&self, peer: PublicKey, outbound: Arc<OutboundQueue>, cancel: CancellationToken) {
        self.peers.lock().expect("peer table mutex poisoned").insert(
            peer,
            PeerRecord {
                state: ConnectionState::Connected,
                outbound,
                cancel,
            },
        );
    }

    fn set_disconnected(&self, peer: &PublicKey) {
        if let Some(record) = self.peers.lock().expect("peer table mutex poisoned").get_mut(peer) {
            record.state = ConnectionState::Disconnected;
        }
    }
}

/// The peer transport: owns the listener and every outbound dial/reconnect
/// loop, and funnels decrypted, envelope-validated frames to its caller
/// through a single `mpsc` channel.
pub struct Transport {
    config: TransportConfig,
    identity: Arc<Keypair>,
    peers: Arc<PeerTable>,
    events_tx: mpsc::Sender<TransportEvent>,
    cancel: CancellationToken,
    last_known_slot: Arc<AtomicU64>,
}

impl Transport {
    /// Construct a transport bound to `identity`. Returns the transport
    /// plus the receiving half of its event channel.
    pub fn new(config: TransportConfig, identity: Keypair) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::channel(1024);
        (
            Self {
                config,
                identity: Arc::new(identity),
                peers: Arc::new(PeerTable::default()),
                events_tx,
                cancel: CancellationToken::new(),
                last_known_slot: Arc::new(AtomicU64::new(0)),
            },
            events_rx,
        )
    }

    /// Record the current slot, surfaced in outgoing heartbeat payloads.
    pub fn note_slot(&self, slot: u64) {
        self.last_known_slot.store(slot, Ordering::Relaxed);
    }

    /// Currently-connected peer identities.
    pub fn connected_peers(&self) -> Vec<PublicKey> {
        self.peers.connected_peers()
    }

    /// Bind the listener and spawn the accept loop.
    pub async fn listen(&self) -> Result<(), TransportError> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        let local_addr = listener.local_addr().unwrap_or(self.config.listen_addr);
        tracing::info!(addr = %local_addr, "transport listening");

        let peers = self.peers.clone();
        let identity = self.identity.clone();
        let events_tx = self.events_tx.clone();
        let cancel = self.cancel.clone();
        let heartbeat_ms = self.config.heartbeat_ms;
        let slot = self.last_known_slot.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, addr)) => {
                                let peers = peers.clone();
                                let identity = identity.clone();
                                let events_tx = events_tx.clone();
                                let cancel = cancel.child_token();
                                let slot = slot.clone();
                                tokio::spawn(async move {
                                    if let Err(err) = run_responder(stream, addr, identity, peers, events_tx, cancel, heartbeat_ms, slot).await {
                                        tracing::debug!(%addr, error = %err, "inbound connection ended");
                                    }
                                });
                            }
                            Err(err) => {
                                tracing::warn!(error = %err, "accept failed");
                            }
                        }
                    }
                }
            }
        });
        Ok(())
    }

    /// Dial `addr`, reconnecting with jittered exponential backoff
    /// (capped at ~60s) until `stop()` is called.
    pub fn dial(&self, addr: SocketAddr) {
        let peers = self.peers.clone();
        let identity = self.identity.clone();
        let events_tx = self.events_tx.clone();
        let cancel = self.cancel.child_token();
        let heartbeat_ms = self.config.heartbeat_ms;
        let slot = self.last_known_slot.clone();

        tokio::spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                if cancel.is_cancelled() {
                    return;
                }
                match TcpStream::connect(addr).await {
                    Ok(stream) => {
                        attempt = 0;
                        let conn_cancel = cancel.child_token();
                        if let Err(err) = run_initiator(
                            stream,
                            addr,
                            identity.clone(),
                            peers.clone(),
                            events_tx.clone(),
                            conn_cancel,
                            heartbeat_ms,
                            slot.clone(),
                        )
                        .await
                        {
                            tracing::debug!(%addr, error = %err, "outbound connection ended");
                        }
                    }
                    Err(err) => {
                        tracing::debug!(%addr, error = %err, "dial failed");
                    }
                }
                if cancel.is_cancelled() {
                    return;
                }
                let backoff = backoff_with_jitter(addr, attempt);
                attempt = attempt.saturating_add(1);
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        });
    }

    /// Enqueue `message` for `peer`; drops the oldest pending frame if the
    /// peer's outbound queue is full. No-op if `peer` is not connected.
    pub fn send_to(&self, peer: &PublicKey, message: SignedMessage) -> Result<(), TransportError> {
        let queue = self.peers.outbound_queue_for(peer).ok_or(TransportError::UnknownPeer)?;
        let bytes = serde_json::to_vec(&message).map_err(|_| TransportError::FrameTooLarge)?;
        if bytes.len() > MAX_FRAME_BYTES {
            return Err(TransportError::FrameTooLarge);
        }
        queue.push(bytes);
        Ok(())
    }

    /// Send `message` to every connected peer except `exclude`.
    pub fn broadcast(&self, message: &SignedMessage, exclude: Option<&PublicKey>) {
        for peer in self.peers.connected_peers() {
            if Some(&peer) == exclude {
                continue;
            }
            let _ = self.send_to(&peer, message.clone());
        }
    }

    /// Total frames dropped across all peers due to outbound overflow.
    pub fn dropped_overflow_total(&self) -> u64 {
        self.peers
            .peers
            .lock()
            .expect("peer table mutex poisoned")
            .values()
            .map(|r| r.outbound.dropped_overflow())
            .sum()
    }

    /// Cancel every listener/dial/connection task. Committed state is
    /// untouched; callers should await their own join handles if they
    /// need a hard guarantee tasks have exited.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

fn backoff_with_jitter(addr: SocketAddr, attempt: u32) -> Duration {
    let base = BASE_BACKOFF_MS.saturating_mul(1u64 << attempt.min(7));
    let capped = base.min(MAX_BACKOFF_MS);
    // Deterministic jitter derived from the address and attempt count
    // rather than a global RNG, keeping reconnect behavior reproducible
    // in tests while still avoiding synchronized thundering-herd retries.
    let mut buf = Vec::with_capacity(32);
    buf.extend_from_slice(b"phinet-backoff-jitter-v1");
    buf.extend_from_slice(addr.to_string().as_bytes());
    buf.extend_from_slice(&attempt.to_be_bytes());
    let digest = sha256(&buf);
    let jitter_frac = (digest.as_bytes()[0] as u64) as f64 / 255.0;
    let jitter_ms = (capped as f64 * 0.25 * jitter_frac) as u64;
    Duration::from_millis(capped.saturating_add(jitter_ms))
}

async fn run_initiator(
    stream: TcpStream,
    addr: SocketAddr,
    identity: Arc<Keypair>,
    peers: Arc<PeerTable>,
    events_tx: mpsc::Sender<TransportEvent>,
    cancel: CancellationToken,
    heartbeat_ms: u64,
    slot: Arc<AtomicU64>,
) -> Result<(), TransportError> {
    let mut framed = Framed::new(stream, framing_codec());
    let params: snow::params::NoiseParams = NOISE_PATTERN.parse().expect("static noise pattern parses");
    let builder = snow::Builder::new(params);
    let static_key = builder.generate_keypair().map_err(|_| TransportError::HandshakeFailed)?;
    let mut handshake = builder
        .local_private_key(&static_key.private)
        .build_initiator()
        .map_err(|_| TransportError::HandshakeFailed)?;

    run_noise_handshake(&mut framed, &mut handshake, true).await?;
    let mut transport = handshake.into_transport_mode().map_err(|_| TransportError::HandshakeFailed)?;

    let remote = exchange_identity(&mut framed, &mut transport, &identity, true).await?;
    run_connection_body(framed, transport, remote, peers, events_tx, cancel, heartbeat_ms, slot).await
}

async fn run_responder(
    stream: TcpStream,
    _addr: SocketAddr,
    identity: Arc<Keypair>,
    peers: Arc<PeerTable>,
    events_tx: mpsc::Sender<TransportEvent>,
    cancel: CancellationToken,
    heartbeat_ms: u64,
    slot: Arc<AtomicU64>,
) -> Result<(), TransportError> {
    let mut framed = Framed::new(stream, framing_codec());
    let params: snow::params::NoiseParams = NOISE_PATTERN.parse().expect("static noise pattern parses");
    let builder = snow::Builder::new(params);
    let static_key = builder.generate_keypair().map_err(|_| TransportError::HandshakeFailed)?;
    let mut handshake = builder
        .local_private_key(&static_key.private)
        .build_responder()
        .map_err(|_| TransportError::HandshakeFailed)?;

    run_noise_handshake(&mut framed, &mut handshake, false).await?;
    let mut transport = handshake.into_transport_mode().map_err(|_| TransportError::HandshakeFailed)?;

    let remote = exchange_identity(&mut framed, &mut transport, &identity, false).await?;
    run_connection_body(framed, transport, remote, peers, events_tx, cancel, heartbeat_ms, slot).await
}

fn framing_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder().max_frame_length(MAX_FRAME_BYTES).new_codec()
}

/// Drive the 3-message Noise `XX` handshake over an already-framed stream.
/// `is_initiator` picks who writes first.
async fn run_noise_handshake(
    framed: &mut Framed<TcpStream, LengthDelimitedCodec>,
    handshake: &mut snow::HandshakeState,
    is_initiator: bool,
) -> Result<(), TransportError> {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(HANDSHAKE_TIMEOUT_MS);
    let mut write_turn = is_initiator;
    while !handshake.is_handshake_finished() {
        let step = tokio::time::timeout_at(deadline, async {
            if write_turn {
                let mut buf = vec![0u8; MAX_FRAME_BYTES.min(65535)];
                let len = handshake.write_message(&[], &mut buf).map_err(|_| TransportError::HandshakeFailed)?;
                buf.truncate(len);
                framed
                    .send(Bytes::from(buf))
                    .await
                    .map_err(|_| TransportError::HandshakeFailed)?;
            } else {
                let msg = framed
                    .next()
                    .await
                    .ok_or(TransportError::HandshakeFailed)?
                    .map_err(|_| TransportError::HandshakeFailed)?;
                let mut buf = vec![0u8; MAX_FRAME_BYTES.min(65535)];
                handshake.read_message(&msg, &mut buf).map_err(|_| TransportError::HandshakeFailed)?;
            }
            Ok::<(), TransportError>(())
        })
        .await
        .map_err(|_| TransportError::HandshakeFailed)?;
        step?;
        write_turn = !write_turn;
    }
    Ok(())
}

/// Exchange and verify the application-level identity proof over the now
/// Noise-encrypted channel, returning the verified remote public key.
async fn exchange_identity(
    framed: &mut Framed<TcpStream, LengthDelimitedCodec>,
    transport: &mut snow::TransportState,
    identity: &Keypair,
    is_initiator: bool,
) -> Result<PublicKey, TransportError> {
    let nonce = identity_nonce();
    let now = system_now_ms();
    let proof_bytes = identity_signing_bytes(now, &nonce);
    let signature = identity.sign(&proof_bytes);
    let envelope = codec::build_envelope(crate::core::codec::Payload::Identity {
        public_key: identity.public_key(),
        timestamp: now,
        signature,
        nonce,
    })
    .map_err(|_| TransportError::HandshakeFailed)?;
    let plaintext = serde_json::to_vec(&envelope).map_err(|_| TransportError::HandshakeFailed)?;

    let send_identity = |framed: &mut Framed<TcpStream, LengthDelimitedCodec>, transport: &mut snow::TransportState| async move {
        let mut ciphertext = vec![0u8; plaintext.len() + 64];
        let len = transport
            .write_message(&plaintext, &mut ciphertext)
            .map_err(|_| TransportError::HandshakeFailed)?;
        ciphertext.truncate(len);
        framed
            .send(Bytes::from(ciphertext))
            .await
            .map_err(|_| TransportError::HandshakeFailed)
    };

    let recv_identity = |framed: &mut Framed<TcpStream, LengthDelimitedCodec>, transport: &mut snow::TransportState| async move {
        let frame = framed
            .next()
            .await
            .ok_or(TransportError::HandshakeFailed)?
            .map_err(|_| TransportError::HandshakeFailed)?;
        let mut buf = vec![0u8; frame.len() + 64];
        let len = transport.read_message(&frame, &mut buf).map_err(|_| TransportError::HandshakeFailed)?;
        buf.truncate(len);
        let env: crate::core::codec::Envelope =
            serde_json::from_slice(&buf).map_err(|_| TransportError::HandshakeFailed)?;
        Ok::<_, TransportError>(env)
    };

    let remote_envelope = if is_initiator {
        send_identity(framed, transport).await?;
        recv_identity(framed, transport).await?
    } else {
        let remote = recv_identity(framed, transport).await?;
        send_identity(framed, transport).await?;
        remote
    };

    match remote_envelope.d {
        crate::core::codec::Payload::Identity {
            public_key,
            timestamp,
            signature,
            nonce,
        } => {
            let bytes = identity_signing_bytes(timestamp, &nonce);
            crypto::verify(&public_key, &bytes, &signature).map_err(|_| TransportError::HandshakeFailed)?;
            if (timestamp - system_now_ms()).abs() > HANDSHAKE_SKEW_MS {
                return Err(TransportError::HandshakeFailed);
            }
            Ok(public_key)
        }
        _ => Err(TransportError::HandshakeFailed),
    }
}

fn identity_nonce() -> [u8; 16] {
    let mut buf = [0u8; 16];
    let now = system_now_ms().to_be_bytes();
    buf[..8].copy_from_slice(&now);
    let addr_entropy = sha256(&now);
    buf[8..].copy_from_slice(&addr_entropy.as_bytes()[..8]);
    buf
}

fn system_now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

async fn run_connection_body(
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    mut transport: snow::TransportState,
    remote: PublicKey,
    peers: Arc<PeerTable>,
    events_tx: mpsc::Sender<TransportEvent>,
    cancel: CancellationToken,
    heartbeat_ms: u64,
    slot: Arc<AtomicU64>,
) -> Result<(), TransportError> {
    let (mut sink, mut stream) = framed.split();
    let outbound = Arc::new(OutboundQueue::new());
    peers.set_connected(remote, outbound.clone(), cancel.clone());
    let _ = events_tx.send(TransportEvent::PeerConnected(remote)).await;
    tracing::info!(peer = %remote.format(), "peer connected");

    let mut missed_heartbeats: u32 = 0;
    let heartbeat_interval = Duration::from_millis(heartbeat_ms.max(100));
    let mut heartbeat_tick = tokio::time::interval(heartbeat_interval);

    let result = loop {
        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            _ = heartbeat_tick.tick() => {
                missed_heartbeats += 1;
                if missed_heartbeats > HEARTBEAT_MISS_LIMIT {
                    break Err(TransportError::PeerUnreachable);
                }
                let envelope = match codec::build_envelope(crate::core::codec::Payload::Heartbeat { slot: slot.load(Ordering::Relaxed) }) {
                    Ok(e) => e,
                    Err(_) => continue,
                };
                let plaintext = match serde_json::to_vec(&envelope) { Ok(b) => b, Err(_) => continue };
                let mut ciphertext = vec![0u8; plaintext.len() + 64];
                if let Ok(len) = transport.write_message(&plaintext, &mut ciphertext) {
                    ciphertext.truncate(len);
                    if sink.send(Bytes::from(ciphertext)).await.is_err() {
                        break Err(TransportError::PeerUnreachable);
                    }
                }
            }
            batch = outbound.wait_for_batch() => {
                for frame in batch {
                    let mut ciphertext = vec![0u8; frame.len() + 64];
                    match transport.write_message(&frame, &mut ciphertext) {
                        Ok(len) => {
                            ciphertext.truncate(len);
                            if sink.send(Bytes::from(ciphertext)).await.is_err() {
                                break;
                            }
                        }
                        Err(_) => continue,
                    }
                }
            }
            next = stream.next() => {
                match next {
                    Some(Ok(frame)) => {
                        missed_heartbeats = 0;
                        let mut buf = vec![0u8; frame.len() + 64];
                        let Ok(len) = transport.read_message(&frame, &mut buf) else {
                            let _ = events_tx.send(TransportEvent::InvalidFrame { from: Some(remote) }).await;
                            continue;
                        };
                        buf.truncate(len);
                        match serde_json::from_slice::<SignedMessage>(&buf) {
                            Ok(signed) => {
                                if let Err(err) = validate_signed_message(&signed) {
                                    tracing::debug!(peer = %remote.format(), error = %err, "dropping invalid frame");
                                    let _ = events_tx.send(TransportEvent::InvalidFrame { from: Some(remote) }).await;
                                } else {
                                    let _ = events_tx.send(TransportEvent::Message(signed)).await;
                                }
                            }
                            Err(_) => {
                                let _ = events_tx.send(TransportEvent::InvalidFrame { from: Some(remote) }).await;
                            }
                        }
                    }
                    Some(Err(_)) | None => break Ok(()),
                }
            }
        }
    };

    peers.set_disconnected(&remote);
    let _ = events_tx.send(TransportEvent::PeerDisconnected(remote)).await;
    tracing::info!(peer = %remote.format(), "peer disconnected");
    result
}

fn validate_signed_message(signed: &SignedMessage) -> Result<(), crate::core::codec::CodecError> {
    let bytes = serde_json::to_vec(&signed.envelope).map_err(|_| crate::core::codec::CodecError::BadFrame)?;
    let now = system_now_ms();
    codec::parse(&bytes, now)?;
    codec::verify_signed_message(signed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let addr: SocketAddr = "127.0.0.1:4001".parse().unwrap();
        let first = backoff_with_jitter(addr, 0);
        let later = backoff_with_jitter(addr, 10);
        assert!(first.as_millis() >= BASE_BACKOFF_MS as u128);
        assert!(later.as_millis() <= (MAX_BACKOFF_MS as f64 * 1.25) as u128);
    }

    #[test]
    fn backoff_is_deterministic_for_same_inputs() {
        let addr: SocketAddr = "127.0.0.1:4001".parse().unwrap();
        assert_eq!(backoff_with_jitter(addr, 3), backoff_with_jitter(addr, 3));
    }

    #[tokio::test]
    async fn outbound_queue_drops_oldest_on_overflow() {
        let queue = OutboundQueue::new();
        for i in 0..(OUTBOUND_QUEUE_CAPACITY + 10) {
            queue.push(vec![i as u8]);
        }
        assert_eq!(queue.dropped_overflow(), 10);
    }

    #[tokio::test]
    async fn identity_round_trips_over_a_loopback_pair() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let kp_a = Keypair::generate().unwrap();
        let kp_b = Keypair::generate().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, framing_codec());
            let params: snow::params::NoiseParams = NOISE_PATTERN.parse().unwrap();
            let builder = snow::Builder::new(params);
            let keys = builder.generate_keypair().unwrap();
            let mut hs = builder.local_private_key(&keys.private).build_responder().unwrap();
            run_noise_handshake(&mut framed, &mut hs, false).await.unwrap();
            let mut ts = hs.into_transport_mode().unwrap();
            exchange_identity(&mut framed, &mut ts, &kp_b, false).await.unwrap()
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(stream, framing_codec());
        let params: snow::params::NoiseParams = NOISE_PATTERN.parse().unwrap();
        let builder = snow::Builder::new(params);
        let keys = builder.generate_keypair().unwrap();
        let mut hs = builder.local_private_key(&keys.private).build_initiator().unwrap();
        run_noise_handshake(&mut framed, &mut hs, true).await.unwrap();
        let mut ts = hs.into_transport_mode().unwrap();
        let remote_of_client = exchange_identity(&mut framed, &mut ts, &kp_a, true).await.unwrap();

        let remote_of_server = server.await.unwrap();
        assert_eq!(remote_of_client, kp_b.public_key());
        assert_eq!(remote_of_server, kp_a.public_key());
    }
}
