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

//! `NetworkNode` (C9): the orchestrator that wires transport, gossip, slot
//! clock, E-Score, consensus engine, and chain store into one running node,
//! and exposes the embedder-facing API (`start`/`stop`/`add_seed_peer`/
//! `submit_judgment`/`subscribe`/`status`/`add_validator`/`set_e_score`).
//!
//! Every consensus-adjacent piece of mutable state (the engine itself, the
//! fork detector, the signal tracker, the E-Score provider) lives on a
//! single task, driven by an `mpsc` command channel (`EngineInput`). No
//! lock is ever held across an `.await`; state mutation only ever happens
//! on that one task.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::codec::{self, CodecError, Payload, SignedMessage};
use crate::core::consensus::driver::ConsensusDriver;
use crate::core::consensus::engine::{ConsensusCommand, ConsensusEngine, ConsensusEvent, EngineConfig, EngineError};
use crate::core::consensus::fork::{ForkDetector, ForkEvent, ForkRecommendation};
use crate::core::consensus::signals::SignalTracker;
use crate::core::crypto::Keypair;
use crate::core::escore::{self, EScoreProvider};
use crate::core::security::keystore::SecretStore;
use crate::core::slot;
use crate::core::snapshot::{ChainSnapshot, SnapshotStore};
use crate::core::store::{ChainStore, StoreError};
use crate::core::types::{Block, CanonicalMap, Judgment, NodeConfig, PublicKey, ValidatorId, ValidatorRecord, H256};
use crate::error::{ErrorKind, NodeError};
use crate::monitoring::metrics::Metrics;
use crate::networking::gossip::{Delivery, Gossip};
use crate::networking::peer_score::{Decision, PeerScore};
use crate::networking::transport::{Transport, TransportConfig, TransportEvent};
use crate::orchestrator::events::{EventBus, NodeEvent, Subscription};

/// Fixed-capacity judgment buffer. Accepts until full, then drops the
/// newest incoming judgment and counts the drop, per the back-pressure
/// policy pinned for this buffer specifically (every other queue in the
/// node drops the *oldest* entry instead).
const JUDGMENT_BUFFER_CAPACITY: usize = 10_000;

/// Upper bound on how many buffered judgments a single proposed block may
/// carry.
const MAX_JUDGMENTS_PER_BLOCK: usize = 256;

/// How many slots of lead a peer's reported slot may have over ours before
/// we consider ourselves still catching up.
const CATCHUP_SLOT_WINDOW: u64 = 3;

const FORK_SWEEP_INTERVAL_MS: u64 = 30_000;

/// Cap on how many blocks a single CATCHUP response will carry, so a
/// large slot gap can't produce a frame that blows past the codec's
/// maximum frame size.
const MAX_CATCHUP_BLOCKS: u64 = 1_000;

/// Persist a warm-restart snapshot after this many finalizations.
const SNAPSHOT_EVERY_N_FINALIZATIONS: u32 = 5;

/// Chain store high-water mark: once the head slot exceeds this, compact
/// truncates the oldest half of history (provided it's all finalized).
const COMPACT_HIGH_WATER_MARK: u64 = 100_000;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Coarse node lifecycle, per the embedder status contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// `start()` has not yet been called.
    Offline,
    /// `start()` is running: transport bound, tasks spawning.
    Bootstrapping,
    /// Waiting to catch up to the network's head slot.
    Syncing,
    /// Caught up, not a registered validator.
    Online,
    /// Caught up and actively proposing/voting as a registered validator.
    Participating,
    /// An unrecoverable local condition (e.g. chain store unavailable).
    Error,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeState::Offline => "offline",
            NodeState::Bootstrapping => "bootstrapping",
            NodeState::Syncing => "syncing",
            NodeState::Online => "online",
            NodeState::Participating => "participating",
            NodeState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Snapshot of node status, as returned by `NetworkNode::status()`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct NodeStatus {
    /// Current lifecycle state.
    pub state: NodeState,
    /// Current slot, by local wall clock.
    pub slot: u64,
    /// Number of currently connected peers.
    pub peers: usize,
    /// Number of known validators.
    pub validators: usize,
    /// Number of slots with an open (unresolved) fork.
    pub forks_open: u64,
}

struct StatusShared {
    state: NodeState,
    slot: u64,
    highest_peer_slot: u64,
    forks_open: u64,
    peers_ever_connected: bool,
    has_seed_peers: bool,
}

/// Nudge `status` toward the next reachable lifecycle state, given the
/// current facts. Idempotent: calling it when nothing has changed is a
/// no-op. Transition triggers: at least one seed peer connected (or none
/// configured, in which case bootstrapping completes immediately); caught
/// up to within `CATCHUP_SLOT_WINDOW` of the highest slot any peer has
/// reported; registered as a validator.
fn advance_if_possible(status: &mut StatusShared, self_is_validator: bool) {
    match status.state {
        NodeState::Offline => {}
        NodeState::Bootstrapping => {
            if status.peers_ever_connected || !status.has_seed_peers {
                status.state = NodeState::Syncing;
            }
        }
        NodeState::Syncing => {}
        NodeState::Online | NodeState::Participating => {}
        NodeState::Error => return,
    }
    if status.state == NodeState::Syncing {
        let caught_up = status.highest_peer_slot == 0 || status.slot + CATCHUP_SLOT_WINDOW >= status.highest_peer_slot;
        if caught_up {
            status.state = if self_is_validator {
                NodeState::Participating
            } else {
                NodeState::Online
            };
        }
    } else if status.state == NodeState::Online && self_is_validator {
        status.state = NodeState::Participating;
    }
}

/// Commands fed into the single task that owns the consensus engine and
/// its adjacent state (fork detector, signal tracker, E-Score provider).
enum EngineInput {
    /// An inbound, gossip-delivered (and dedup'd) payload from `sender`.
    Payload { payload: Payload, sender: PublicKey },
    /// Local slot tick: drive proposal/timeout logic and re-check the
    /// lifecycle state machine.
    Tick { now_ms: i64 },
    /// Add or update a validator's registry entry.
    AddValidator(ValidatorRecord),
    /// Override a validator's E-Score and recompute its weight.
    SetEScore { who: PublicKey, score: f64 },
    /// Sweep fork records older than the current finalized tip.
    Sweep,
    /// Recompute and publish the periodic metrics/signals snapshot.
    ReportMetrics { now_ms: i64 },
    /// Shut the engine down cleanly.
    Stop,
}

/// Fixed-capacity judgment inbox. Push drops the newest arrival once full
/// (and counts the drop); this is the one queue in the node that is
/// drop-newest rather than drop-oldest.
struct JudgmentBuffer {
    capacity: usize,
    inner: std::sync::Mutex<VecDeque<Judgment>>,
    dropped: std::sync::atomic::AtomicU64,
}

impl JudgmentBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: std::sync::Mutex::new(VecDeque::new()),
            dropped: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn push(&self, judgment: Judgment) -> bool {
        let mut guard = self.inner.lock().expect("judgment buffer mutex poisoned");
        if guard.len() >= self.capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        guard.push_back(judgment);
        true
    }

    fn drain_up_to(&self, n: usize) -> Vec<Judgment> {
        let mut guard = self.inner.lock().expect("judgment buffer mutex poisoned");
        let take = n.min(guard.len());
        guard.drain(..take).collect()
    }

    fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Shared handles threaded through every helper function the engine task
/// calls into. Cloneable pieces only; the truly single-owner state
/// (engine, driver, fork detector, signal tracker, E-Score provider) is
/// kept as locals in `engine_task` instead.
struct EngineContext {
    store: Arc<dyn ChainStore>,
    snapshot_store: Arc<dyn SnapshotStore>,
    gossip: Arc<Gossip>,
    transport: Arc<Transport>,
    gossip_identity: Keypair,
    judgments: Arc<JudgmentBuffer>,
    metrics: Metrics,
    events: EventBus,
    status: Arc<RwLock<StatusShared>>,
    validators_count: Arc<AtomicUsize>,
    self_is_validator: Arc<AtomicBool>,
    slot_ms: u64,
    genesis_ms: i64,
}

fn sign_payload(payload: Payload, keypair: &Keypair) -> Result<SignedMessage, CodecError> {
    let envelope = codec::build_envelope(payload)?;
    codec::sign_message(envelope, keypair)
}

fn reply_to(ctx: &EngineContext, to: &PublicKey, payload: Payload) {
    match sign_payload(payload, &ctx.gossip_identity) {
        Ok(signed) => {
            if let Err(err) = ctx.transport.send_to(to, signed) {
                tracing::debug!(?err, peer = %to, "failed to send targeted reply");
            }
        }
        Err(err) => tracing::warn!(?err, "failed to sign targeted reply"),
    }
}

fn collect_catchup_blocks(store: &Arc<dyn ChainStore>, from_slot: u64) -> Vec<Block> {
    let Ok(Some(head_slot)) = store.head_slot() else {
        return Vec::new();
    };
    let mut blocks = Vec::new();
    let mut slot = from_slot;
    while slot <= head_slot && (blocks.len() as u64) < MAX_CATCHUP_BLOCKS {
        if let Ok(Some(block)) = store.by_slot(slot) {
            blocks.push(block);
        }
        slot += 1;
    }
    blocks
}

fn note_fork_detected(ctx: &EngineContext, signals: &mut SignalTracker, slot: u64) {
    ctx.metrics.consensus_forks_detected_total.inc();
    signals.record_entropy(1.0);
    {
        let mut st = ctx.status.write().expect("status lock poisoned");
        st.forks_open = st.forks_open.saturating_add(1);
    }
    ctx.events.publish(NodeEvent::ForkDetected { slot });
}

fn note_fork_resolved(ctx: &EngineContext, slot: u64) {
    ctx.metrics.consensus_forks_resolved_total.inc();
    {
        let mut st = ctx.status.write().expect("status lock poisoned");
        st.forks_open = st.forks_open.saturating_sub(1);
    }
    ctx.events.publish(NodeEvent::ForkResolved { slot });
}

/// React to a freshly-detected fork: record it, and if our local view
/// needs to change, open (or continue) a resolution round by asking the
/// resolution target (or, absent one, every peer) which hash it holds at
/// this slot. Reorg *execution* -- actually rewriting the local store to
/// adopt a heavier branch -- is not implemented; only the Stay case (our
/// branch already was the heaviest) is auto-resolved.
fn handle_fork_detected(ctx: &EngineContext, fork_detector: &mut ForkDetector, signals: &mut SignalTracker, slot: u64) {
    note_fork_detected(ctx, signals, slot);
    if fork_detector.is_resolution_in_progress(slot) {
        return;
    }
    let local_hash = ctx.store.by_slot(slot).ok().flatten().map(|b| b.hash).unwrap_or(H256::ZERO);
    if let ForkRecommendation::ReorgNeeded { heaviest } = fork_detector.recommend(slot, local_hash) {
        fork_detector.begin_resolution(slot);
        let request = Payload::ForkResolutionRequest { slot, hash: heaviest };
        match fork_detector.resolution_target(slot) {
            Some(peer) => reply_to(ctx, &peer, request),
            None => {
                if let Err(err) = ctx.gossip.publish(request, &ctx.gossip_identity, now_ms()) {
                    tracing::warn!(?err, "failed to broadcast fork resolution request");
                }
            }
        }
    }
}

fn observe_block_for_fork(block: &Block, engine: &ConsensusEngine, fork_detector: &mut ForkDetector, signals: &mut SignalTracker, ctx: &EngineContext) {
    let weight = engine.validators().get(&block.proposer).map(|v| v.weight).unwrap_or(0.0);
    if let Some(ForkEvent::ForkDetected { slot }) = fork_detector.observe(block.slot, block.hash, block.proposer, weight) {
        handle_fork_detected(ctx, fork_detector, signals, slot);
    }
}

fn dispatch_consensus_payload(
    payload: Payload,
    driver: &mut ConsensusDriver,
    engine: &mut ConsensusEngine,
    ctx: &EngineContext,
    signals: &mut SignalTracker,
    now_ms: i64,
) -> bool {
    let Ok(cmd) = driver.on_payload(payload) else {
        return false;
    };
    match engine.handle(cmd) {
        Ok(evs) => apply_consensus_events(evs, ctx, signals, now_ms),
        Err(EngineError::ChainIntegrityViolation) => {
            ctx.metrics.record_error(ErrorKind::ChainIntegrityViolation);
            tracing::warn!("rejected proposal: does not extend the local head");
            false
        }
        Err(EngineError::SlotMismatch) => {
            ctx.metrics.record_error(ErrorKind::SlotMismatch);
            tracing::warn!("rejected proposal: slot does not follow head.slot + 1");
            false
        }
        Err(err) => {
            tracing::warn!(?err, "consensus command failed");
            false
        }
    }
}

/// Apply one batch of `ConsensusEvent`s: publish the corresponding node
/// events, update metrics and signals, and gossip anything that needs to
/// reach the rest of the network. Returns whether a finalization
/// occurred, so the caller can decide whether a snapshot is due.
fn apply_consensus_events(events: Vec<ConsensusEvent>, ctx: &EngineContext, signals: &mut SignalTracker, now_ms: i64) -> bool {
    let mut any_finalized = false;
    for ev in events {
        match ev {
            ConsensusEvent::BlockProposed(block) => {
                ctx.metrics.judgments_total.inc_by(block.judgments.len() as u64);
                ctx.events.publish(NodeEvent::BlockProposed { slot: block.slot, hash: block.hash });
                if let Err(err) = ctx.gossip.publish(Payload::BlockProposal(block), &ctx.gossip_identity, now_ms) {
                    tracing::warn!(?err, "failed to gossip block proposal");
                }
            }
            ConsensusEvent::VoteCast(vote) => {
                ctx.metrics.consensus_votes_cast_total.inc();
                if let Err(err) = ctx.gossip.publish(Payload::Vote(vote), &ctx.gossip_identity, now_ms) {
                    tracing::warn!(?err, "failed to gossip vote");
                }
            }
            ConsensusEvent::BlockConfirmed { slot, hash } => {
                ctx.metrics.consensus_blocks_confirmed_total.inc();
                signals.record_work(1.0);
                ctx.events.publish(NodeEvent::BlockConfirmed { slot, hash });
            }
            ConsensusEvent::BlockFinalized { slot, hash } => {
                ctx.metrics.consensus_blocks_finalized_total.inc();
                signals.record_work(1.0);
                ctx.events.publish(NodeEvent::BlockFinalized { slot, hash });
                any_finalized = true;
                if let Ok(Some(block)) = ctx.store.get_block(&hash) {
                    if let Err(err) = ctx.gossip.publish(Payload::BlockFinal(block), &ctx.gossip_identity, now_ms) {
                        tracing::warn!(?err, "failed to gossip finalized block");
                    }
                }
            }
            ConsensusEvent::ProposalTimeout { slot, hash } => {
                ctx.metrics.record_error(ErrorKind::ProposalTimeout);
                signals.record_heat(1.0);
                tracing::debug!(slot, hash = %hash, "proposal timed out");
            }
            ConsensusEvent::EquivocationDetected { slot, proposer } => {
                ctx.metrics.record_error(ErrorKind::EquivocationDetected);
                signals.record_entropy(1.0);
                tracing::warn!(slot, proposer = %proposer, "equivocation detected");
            }
            ConsensusEvent::Stopped => {}
        }
    }
    any_finalized
}

fn handle_payload(
    payload: Payload,
    sender: PublicKey,
    now_ms: i64,
    engine: &mut ConsensusEngine,
    driver: &mut ConsensusDriver,
    fork_detector: &mut ForkDetector,
    signals: &mut SignalTracker,
    ctx: &EngineContext,
) {
    match payload {
        Payload::Identity { .. } => {
            // Consumed by the transport's own handshake before a peer is
            // ever reported connected; should not reach the gossip layer.
        }
        Payload::Heartbeat { slot } => {
            let mut st = ctx.status.write().expect("status lock poisoned");
            if slot > st.highest_peer_slot {
                st.highest_peer_slot = slot;
            }
            advance_if_possible(&mut st, ctx.self_is_validator.load(Ordering::Relaxed));
        }
        Payload::PeerList { peers } => {
            for addr in peers {
                match addr.parse() {
                    Ok(sock) => ctx.transport.dial(sock),
                    Err(_) => tracing::debug!(%addr, "ignoring malformed peer address"),
                }
            }
        }
        Payload::Judgment(judgment) => {
            if !ctx.judgments.push(judgment) {
                tracing::debug!(dropped_total = ctx.judgments.dropped_total(), "judgment buffer full, dropped newest");
            }
        }
        Payload::BlockProposal(block) => {
            observe_block_for_fork(&block, engine, fork_detector, signals, ctx);
            dispatch_consensus_payload(Payload::BlockProposal(block), driver, engine, ctx, signals, now_ms);
        }
        Payload::BlockFinal(block) => {
            observe_block_for_fork(&block, engine, fork_detector, signals, ctx);
            dispatch_consensus_payload(Payload::BlockFinal(block), driver, engine, ctx, signals, now_ms);
        }
        Payload::Vote(vote) => {
            dispatch_consensus_payload(Payload::Vote(vote), driver, engine, ctx, signals, now_ms);
        }
        Payload::ForkResolutionRequest { slot, .. } => {
            let local_hash = ctx.store.by_slot(slot).ok().flatten().map(|b| b.hash);
            reply_to(ctx, &sender, Payload::ForkResolutionResponse { slot, hash: local_hash });
        }
        Payload::ForkResolutionResponse { slot, hash } => {
            if let Some(h) = hash {
                let weight = engine.validators().get(&sender).map(|v| v.weight).unwrap_or(1.0);
                if let Some(ForkEvent::ForkDetected { slot }) = fork_detector.observe(slot, h, sender, weight) {
                    handle_fork_detected(ctx, fork_detector, signals, slot);
                }
            }
            if fork_detector.is_resolution_in_progress(slot) {
                let local_hash = ctx.store.by_slot(slot).ok().flatten().map(|b| b.hash).unwrap_or(H256::ZERO);
                if matches!(fork_detector.recommend(slot, local_hash), ForkRecommendation::Stay) {
                    fork_detector.mark_fork_resolved(slot);
                    note_fork_resolved(ctx, slot);
                }
            }
        }
        Payload::CatchupRequest { from_slot } => {
            let blocks = collect_catchup_blocks(&ctx.store, from_slot);
            reply_to(ctx, &sender, Payload::CatchupResponse { blocks });
        }
        Payload::CatchupResponse { blocks } => {
            for report in ConsensusDriver::catchup_to_fork_reports(&blocks) {
                let weight = engine.validators().get(&sender).map(|v| v.weight).unwrap_or(1.0);
                if let Some(ForkEvent::ForkDetected { slot }) = fork_detector.observe(report.slot, report.hash, sender, weight) {
                    handle_fork_detected(ctx, fork_detector, signals, slot);
                }
            }
        }
    }
}

async fn engine_task(mut rx: mpsc::Receiver<EngineInput>, mut engine: ConsensusEngine, ctx: EngineContext) {
    let mut driver = ConsensusDriver::new();
    let mut fork_detector = ForkDetector::new();
    let mut signals = SignalTracker::new();
    let mut escore = EScoreProvider::new(engine.self_id());
    let mut last_proposed_slot: Option<u64> = None;
    let mut finalized_since_snapshot: u32 = 0;

    while let Some(input) = rx.recv().await {
        match input {
            EngineInput::Tick { now_ms } => {
                let slot = slot::slot_at(now_ms, ctx.genesis_ms, ctx.slot_ms);
                ctx.transport.note_slot(slot);
                {
                    let mut st = ctx.status.write().expect("status lock poisoned");
                    st.slot = slot;
                    advance_if_possible(&mut st, ctx.self_is_validator.load(Ordering::Relaxed));
                }

                if last_proposed_slot != Some(slot) && engine.is_self_leader(slot) {
                    last_proposed_slot = Some(slot);
                    let prev_hash = ctx.store.head().ok().flatten().map(|b| b.hash).unwrap_or(H256::ZERO);
                    let batch = ctx.judgments.drain_up_to(MAX_JUDGMENTS_PER_BLOCK);
                    match engine.handle(ConsensusCommand::Propose {
                        slot,
                        prev_hash,
                        timestamp: now_ms,
                        judgments: batch,
                    }) {
                        Ok(evs) => {
                            if apply_consensus_events(evs, &ctx, &mut signals, now_ms) {
                                finalized_since_snapshot += 1;
                            }
                        }
                        Err(EngineError::ChainIntegrityViolation) => {
                            ctx.metrics.record_error(ErrorKind::ChainIntegrityViolation);
                            tracing::warn!(slot, "self-proposal does not extend the local head");
                        }
                        Err(EngineError::SlotMismatch) => {
                            ctx.metrics.record_error(ErrorKind::SlotMismatch);
                            tracing::warn!(slot, "self-proposal slot does not follow head.slot + 1");
                        }
                        Err(err) => tracing::warn!(?err, slot, "proposal failed"),
                    }
                }

                match engine.handle(ConsensusCommand::Tick { now_ms }) {
                    Ok(evs) => {
                        if apply_consensus_events(evs, &ctx, &mut signals, now_ms) {
                            finalized_since_snapshot += 1;
                        }
                    }
                    Err(EngineError::Store(StoreError::BackendUnavailable)) => {
                        let mut st = ctx.status.write().expect("status lock poisoned");
                        st.state = NodeState::Error;
                        tracing::error!("chain store backend unavailable, entering error state");
                    }
                    Err(err) => tracing::warn!(?err, "tick processing failed"),
                }

                if finalized_since_snapshot >= SNAPSHOT_EVERY_N_FINALIZATIONS {
                    finalized_since_snapshot = 0;
                    if let Ok(Some(tip)) = ctx.store.finalized_tip() {
                        let snapshot = ChainSnapshot {
                            finalized_tip: tip,
                            validators: engine.validators().clone(),
                            captured_at_ms: now_ms,
                        };
                        if let Err(err) = ctx.snapshot_store.save(&snapshot) {
                            tracing::warn!(?err, "failed to persist chain snapshot");
                        }
                    }
                    match ctx.store.compact(COMPACT_HIGH_WATER_MARK) {
                        Ok(0) => {}
                        Ok(truncated) => tracing::info!(truncated, "compacted finalized chain history"),
                        Err(err) => tracing::warn!(?err, "chain store compaction failed"),
                    }
                }
            }
            EngineInput::Payload { payload, sender } => {
                handle_payload(payload, sender, now_ms(), &mut engine, &mut driver, &mut fork_detector, &mut signals, &ctx);
            }
            EngineInput::AddValidator(mut record) => {
                escore::refresh_weight(&mut record);
                let is_self = record.public_key == engine.self_id();
                engine.upsert_validator(record);
                ctx.validators_count.store(engine.validators().len(), Ordering::Relaxed);
                if is_self {
                    let now_validator = engine.validators().get(&engine.self_id()).map(|r| r.weight > 0.0).unwrap_or(false);
                    ctx.self_is_validator.store(now_validator, Ordering::Relaxed);
                    let mut st = ctx.status.write().expect("status lock poisoned");
                    advance_if_possible(&mut st, now_validator);
                }
            }
            EngineInput::SetEScore { who, score } => {
                if let Some(existing) = engine.validators().get(&who) {
                    let mut updated = existing.clone();
                    updated.e_score = score.clamp(0.0, 100.0);
                    escore::refresh_weight(&mut updated);
                    engine.upsert_validator(updated);
                } else {
                    ctx.metrics.record_error(ErrorKind::ValidatorUnknown);
                    tracing::warn!(validator = %who, "set_e_score for unknown validator");
                }
            }
            EngineInput::Sweep => {
                let last_finalized = ctx.store.finalized_tip().ok().flatten().map(|b| b.slot).unwrap_or(0);
                fork_detector.sweep(last_finalized);
            }
            EngineInput::ReportMetrics { now_ms } => {
                ctx.metrics.p2p_peers.set(ctx.transport.connected_peers().len() as i64);
                if let Ok(Some(height)) = ctx.store.head_slot() {
                    ctx.metrics.block_height.set(height as i64);
                }
                let snapshot = signals.snapshot();
                let e_score = escore.score_of(&engine.self_id(), now_ms).unwrap_or(0.0);
                ctx.events.publish(NodeEvent::MetricsReported { signals: snapshot, e_score });
            }
            EngineInput::Stop => {
                let _ = engine.handle(ConsensusCommand::Stop);
                break;
            }
        }
    }
}

async fn inbound_task(
    mut transport_events: mpsc::Receiver<TransportEvent>,
    gossip: Arc<Gossip>,
    engine_tx: mpsc::Sender<EngineInput>,
    metrics: Metrics,
    events: EventBus,
    status: Arc<RwLock<StatusShared>>,
    self_is_validator: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let mut peer_score = PeerScore::new(Default::default());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            maybe_ev = transport_events.recv() => {
                let Some(ev) = maybe_ev else { break };
                match ev {
                    TransportEvent::PeerConnected(peer) => {
                        events.publish(NodeEvent::PeerConnected { peer });
                        // The transport's own handshake already performs
                        // application-level identity verification before
                        // this event is emitted, so the peer is identified
                        // the moment it's connected.
                        events.publish(NodeEvent::PeerIdentified { peer });
                        let mut st = status.write().expect("status lock poisoned");
                        st.peers_ever_connected = true;
                        advance_if_possible(&mut st, self_is_validator.load(Ordering::Relaxed));
                    }
                    TransportEvent::PeerDisconnected(peer) => {
                        metrics.record_error(ErrorKind::PeerUnreachable);
                        events.publish(NodeEvent::PeerDisconnected { peer });
                    }
                    TransportEvent::InvalidFrame { from } => {
                        metrics.record_error(ErrorKind::BadFrame);
                        if let Some(peer) = from {
                            score_peer(&mut peer_score, peer, false);
                        }
                        tracing::debug!(?from, "dropped invalid frame");
                    }
                    TransportEvent::Message(signed) => {
                        let claimed_sender = signed.sender_public_key;
                        match gossip.handle_inbound(signed, now_ms()) {
                            Ok(Delivery::Fresh { payload, sender }) => {
                                score_peer(&mut peer_score, sender, true);
                                if engine_tx.send(EngineInput::Payload { payload, sender }).await.is_err() {
                                    break;
                                }
                            }
                            Ok(Delivery::Duplicate) => metrics.gossip_duplicate_total.inc(),
                            Err(_) => {
                                metrics.record_error(ErrorKind::BadSignature);
                                score_peer(&mut peer_score, claimed_sender, false);
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Record one observation for `peer` and log if it has crossed into
/// throttle/ban territory. There is no transport-level enforcement yet
/// (the transport exposes no per-peer disconnect primitive); this is
/// telemetry a future throttling pass can act on.
fn score_peer(peer_score: &mut PeerScore, peer: PublicKey, good: bool) {
    let key = peer.0.to_vec();
    let decision = if good {
        peer_score.observe_good(key, std::time::Instant::now(), 1)
    } else {
        peer_score.observe_bad(key, std::time::Instant::now(), 1)
    };
    match decision {
        Decision::Ban => tracing::warn!(%peer, "peer score crossed ban threshold"),
        Decision::Throttle => tracing::debug!(%peer, "peer score in throttle range"),
        Decision::Allow => {}
    }
}

async fn ticker_task(engine_tx: mpsc::Sender<EngineInput>, slot_ms: u64, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_millis(slot_ms.max(10)));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if engine_tx.send(EngineInput::Tick { now_ms: now_ms() }).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn fork_sweep_task(engine_tx: mpsc::Sender<EngineInput>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_millis(FORK_SWEEP_INTERVAL_MS));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if engine_tx.send(EngineInput::Sweep).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn metrics_task(engine_tx: mpsc::Sender<EngineInput>, interval_ms: u64, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1_000)));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if engine_tx.send(EngineInput::ReportMetrics { now_ms: now_ms() }).await.is_err() {
                    break;
                }
            }
        }
    }
}

struct HttpState {
    metrics: Metrics,
    status: Arc<RwLock<StatusShared>>,
    validators_count: Arc<AtomicUsize>,
    transport: Arc<Transport>,
}

async fn metrics_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let families = state.metrics.registry.gather();
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, String::new());
    }
    match String::from_utf8(buf) {
        Ok(body) => (StatusCode::OK, body),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, String::new()),
    }
}

#[derive(Serialize)]
struct StatusBody {
    state: NodeState,
    slot: u64,
    peers: usize,
    validators: usize,
    forks_open: u64,
}

async fn status_handler(State(state): State<Arc<HttpState>>) -> Json<StatusBody> {
    let st = state.status.read().expect("status lock poisoned");
    Json(StatusBody {
        state: st.state,
        slot: st.slot,
        peers: state.transport.connected_peers().len(),
        validators: state.validators_count.load(Ordering::Relaxed),
        forks_open: st.forks_open,
    })
}

async fn run_http_server(listen_addr: SocketAddr, state: Arc<HttpState>, cancel: CancellationToken) {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/status", get(status_handler))
        .with_state(state);
    match tokio::net::TcpListener::bind(listen_addr).await {
        Ok(listener) => {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                cancel.cancelled().await;
            });
            if let Err(err) = server.await {
                tracing::warn!(%err, "http server exited with error");
            }
        }
        Err(err) => tracing::warn!(%err, %listen_addr, "failed to bind http listener"),
    }
}

fn validator_record_from_pubkey(public_key: PublicKey) -> ValidatorRecord {
    let mut record = ValidatorRecord {
        public_key,
        e_score: 50.0,
        burned: 0,
        uptime: 1.0,
        weight: 0.0,
    };
    escore::refresh_weight(&mut record);
    record
}

fn parse_validators(hexes: &[String]) -> Result<CanonicalMap<ValidatorId, ValidatorRecord>, NodeError> {
    let mut map = CanonicalMap::new();
    for h in hexes {
        let bytes = hex::decode(h).map_err(|_| NodeError::new(ErrorKind::ValidatorUnknown, format!("invalid validator hex {h}")))?;
        if bytes.len() != 32 {
            return Err(NodeError::new(ErrorKind::ValidatorUnknown, format!("validator key {h} is not 32 bytes")));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        let public_key = PublicKey(arr);
        map.insert(public_key, validator_record_from_pubkey(public_key));
    }
    Ok(map)
}

/// The running node: an embeddable handle over every C1-C8 component,
/// wired together and spawned as a set of cooperating tasks.
pub struct NetworkNode {
    transport: Arc<Transport>,
    events: EventBus,
    metrics: Metrics,
    status: Arc<RwLock<StatusShared>>,
    validators_count: Arc<AtomicUsize>,
    judgments: Arc<JudgmentBuffer>,
    engine_tx: mpsc::Sender<EngineInput>,
    cancel: CancellationToken,
    tasks: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl NetworkNode {
    /// Start a node: bind the P2P listener, dial any configured seed
    /// peers, restore a warm-restart snapshot if one exists, and spawn
    /// every background task. Returns once the listener is bound; peer
    /// connection and catch-up continue asynchronously (see `status()`).
    pub async fn start(
        config: NodeConfig,
        secret_store: Box<dyn SecretStore>,
        store: Arc<dyn ChainStore>,
        snapshot_store: Arc<dyn SnapshotStore>,
    ) -> Result<Self, NodeError> {
        let identity = secret_store
            .export_keypair()
            .map_err(|_| NodeError::new(ErrorKind::HandshakeFailed, "could not export local identity keypair"))?;
        let pkcs8 = identity.pkcs8_bytes().to_vec();
        drop(identity);
        let rederive = |purpose: &'static str| {
            Keypair::from_pkcs8(&pkcs8).map_err(|_| NodeError::new(ErrorKind::HandshakeFailed, format!("failed to derive {purpose} identity")))
        };
        let transport_identity = rederive("transport")?;
        let engine_identity = rederive("engine")?;
        let gossip_identity = rederive("gossip")?;
        let self_public_key = transport_identity.public_key();

        let mut validators = parse_validators(&config.consensus.validators_hex)?;
        let self_is_validator = validators.get(&self_public_key).map(|r| r.weight > 0.0).unwrap_or(false);

        let p2p_addr: SocketAddr = config
            .p2p
            .listen_addr
            .parse()
            .map_err(|_| NodeError::new(ErrorKind::PeerUnreachable, format!("invalid p2p listen_addr {}", config.p2p.listen_addr)))?;
        let (transport, transport_events_rx) = Transport::new(
            TransportConfig {
                listen_addr: p2p_addr,
                heartbeat_ms: config.p2p.heartbeat_ms,
                max_peers: config.p2p.max_peers,
            },
            transport_identity,
        );
        let transport = Arc::new(transport);
        transport
            .listen()
            .await
            .map_err(|_| NodeError::new(ErrorKind::PeerUnreachable, "failed to bind p2p listener"))?;

        for seed in &config.p2p.seed_peers {
            match seed.parse() {
                Ok(addr) => transport.dial(addr),
                Err(_) => tracing::warn!(seed = %seed, "ignoring malformed seed peer address"),
            }
        }

        let gossip = Arc::new(Gossip::new(transport.clone()));
        let metrics = Metrics::new().map_err(|_| NodeError::new(ErrorKind::StoreBackendUnavailable, "failed to register metrics"))?;
        let events = EventBus::new();

        if let Ok(Some(snapshot)) = snapshot_store.load() {
            for record in snapshot.validators.into_values() {
                validators.insert(record.public_key, record);
            }
            let _ = store.put_block(snapshot.finalized_tip.clone(), crate::core::types::BlockStatus::Finalized);
            tracing::info!(slot = snapshot.finalized_tip.slot, "restored chain snapshot");
        }

        let validators_count = Arc::new(AtomicUsize::new(validators.len()));
        let self_is_validator = Arc::new(AtomicBool::new(self_is_validator));

        let engine = ConsensusEngine::new(
            engine_identity,
            validators,
            store.clone(),
            EngineConfig {
                finality_depth: config.consensus.finality_depth,
                proposal_timeout_ms: config.consensus.proposal_timeout_ms,
            },
        );

        let status = Arc::new(RwLock::new(StatusShared {
            state: NodeState::Bootstrapping,
            slot: 0,
            highest_peer_slot: 0,
            forks_open: 0,
            peers_ever_connected: false,
            has_seed_peers: !config.p2p.seed_peers.is_empty(),
        }));
        {
            let mut st = status.write().expect("status lock poisoned");
            advance_if_possible(&mut st, self_is_validator.load(Ordering::Relaxed));
        }

        let judgments = Arc::new(JudgmentBuffer::new(JUDGMENT_BUFFER_CAPACITY));
        let cancel = CancellationToken::new();
        let (engine_tx, engine_rx) = mpsc::channel(1024);

        let ctx = EngineContext {
            store: store.clone(),
            snapshot_store,
            gossip: gossip.clone(),
            transport: transport.clone(),
            gossip_identity,
            judgments: judgments.clone(),
            metrics: metrics.clone(),
            events: events.clone(),
            status: status.clone(),
            validators_count: validators_count.clone(),
            self_is_validator: self_is_validator.clone(),
            slot_ms: config.consensus.slot_ms,
            genesis_ms: config.consensus.genesis_ms,
        };

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        tasks.push(tokio::spawn(engine_task(engine_rx, engine, ctx)));
        tasks.push(tokio::spawn(inbound_task(
            transport_events_rx,
            gossip,
            engine_tx.clone(),
            metrics.clone(),
            events.clone(),
            status.clone(),
            self_is_validator,
            cancel.child_token(),
        )));
        tasks.push(tokio::spawn(ticker_task(engine_tx.clone(), config.consensus.slot_ms, cancel.child_token())));
        tasks.push(tokio::spawn(fork_sweep_task(engine_tx.clone(), cancel.child_token())));
        tasks.push(tokio::spawn(metrics_task(engine_tx.clone(), config.p2p.heartbeat_ms, cancel.child_token())));

        let http_addr: SocketAddr = config
            .http
            .listen_addr
            .parse()
            .map_err(|_| NodeError::new(ErrorKind::StoreBackendUnavailable, format!("invalid http listen_addr {}", config.http.listen_addr)))?;
        let http_state = Arc::new(HttpState {
            metrics: metrics.clone(),
            status: status.clone(),
            validators_count: validators_count.clone(),
            transport: transport.clone(),
        });
        tasks.push(tokio::spawn(run_http_server(http_addr, http_state, cancel.child_token())));

        Ok(Self {
            transport,
            events,
            metrics,
            status,
            validators_count,
            judgments,
            engine_tx,
            cancel,
            tasks: AsyncMutex::new(tasks),
        })
    }

    /// Dial an additional peer at runtime.
    pub fn add_seed_peer(&self, address: &str) -> Result<(), NodeError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|_| NodeError::new(ErrorKind::PeerUnreachable, format!("invalid peer address {address}")))?;
        self.transport.dial(addr);
        Ok(())
    }

    /// Submit an application judgment for inclusion in a future block.
    /// Returns an error (but does not panic) if the buffer is full; the
    /// judgment is then dropped rather than displacing older entries.
    pub fn submit_judgment(&self, judgment: Judgment) -> Result<(), NodeError> {
        if self.judgments.push(judgment) {
            Ok(())
        } else {
            Err(NodeError::new(ErrorKind::PeerOverloadDrop, "judgment buffer full, dropped newest"))
        }
    }

    /// Subscribe to the node's event stream.
    pub fn subscribe(&self) -> (mpsc::Receiver<NodeEvent>, Subscription) {
        self.events.subscribe()
    }

    /// Current node status.
    pub fn status(&self) -> NodeStatus {
        let st = self.status.read().expect("status lock poisoned");
        NodeStatus {
            state: st.state,
            slot: st.slot,
            peers: self.transport.connected_peers().len(),
            validators: self.validators_count.load(Ordering::Relaxed),
            forks_open: st.forks_open,
        }
    }

    /// Add or update a validator's registry entry.
    pub async fn add_validator(&self, record: ValidatorRecord) -> Result<(), NodeError> {
        self.engine_tx
            .send(EngineInput::AddValidator(record))
            .await
            .map_err(|_| NodeError::new(ErrorKind::Cancelled, "node is stopped"))
    }

    /// Override a known validator's E-Score.
    pub async fn set_e_score(&self, who: PublicKey, score: f64) -> Result<(), NodeError> {
        self.engine_tx
            .send(EngineInput::SetEScore { who, score })
            .await
            .map_err(|_| NodeError::new(ErrorKind::Cancelled, "node is stopped"))
    }

    /// Access the Prometheus metrics registry, for embedders that want to
    /// serve or scrape it through their own HTTP stack in addition to (or
    /// instead of) the node's built-in `/metrics` endpoint.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Stop the node: cancel every background task, tear down the
    /// transport, and drain the consensus engine.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let _ = self.engine_tx.send(EngineInput::Stop).await;
        self.transport.stop();
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::security::keystore::InMemorySecretStore;
    use crate::core::snapshot::InMemorySnapshotStore;
    use crate::core::store::InMemoryChainStore;
    use crate::core::types::{ConsensusConfig, HttpConfig, NodeSettings, P2pConfig};

    fn sample_config() -> NodeConfig {
        NodeConfig {
            node: NodeSettings {
                name: "test".into(),
                data_dir: "./data".into(),
            },
            http: HttpConfig {
                listen_addr: "127.0.0.1:0".into(),
            },
            p2p: P2pConfig {
                listen_addr: "127.0.0.1:0".into(),
                topic: "test".into(),
                max_msg_per_sec: 100,
                max_peers: 8,
                seed_peers: vec![],
                heartbeat_ms: 1_000,
            },
            consensus: ConsensusConfig {
                validators_hex: vec![],
                slot_ms: 20,
                finality_depth: 3,
                proposal_timeout_ms: 800,
                genesis_ms: 0,
            },
        }
    }

    fn judgment(id: &str) -> Judgment {
        Judgment {
            id: id.to_string(),
            payload: vec![],
            produced_at: 0,
        }
    }

    #[test]
    fn judgment_buffer_drops_newest_when_full() {
        let buf = JudgmentBuffer::new(2);
        assert!(buf.push(judgment("a")));
        assert!(buf.push(judgment("b")));
        assert!(!buf.push(judgment("c")));
        assert_eq!(buf.dropped_total(), 1);
        let drained = buf.drain_up_to(10);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].id, "a");
    }

    fn fresh_status(has_seed_peers: bool) -> StatusShared {
        StatusShared {
            state: NodeState::Bootstrapping,
            slot: 0,
            highest_peer_slot: 0,
            forks_open: 0,
            peers_ever_connected: false,
            has_seed_peers,
        }
    }

    #[test]
    fn bootstrapping_advances_straight_through_without_seed_peers() {
        let mut status = fresh_status(false);
        advance_if_possible(&mut status, false);
        assert_eq!(status.state, NodeState::Online);
    }

    #[test]
    fn bootstrapping_waits_for_a_seed_peer_connection() {
        let mut status = fresh_status(true);
        advance_if_possible(&mut status, false);
        assert_eq!(status.state, NodeState::Bootstrapping);
        status.peers_ever_connected = true;
        advance_if_possible(&mut status, false);
        assert_eq!(status.state, NodeState::Online);
    }

    #[test]
    fn syncing_node_waits_to_catch_up_to_peer_slot() {
        let mut status = fresh_status(false);
        advance_if_possible(&mut status, false);
        status.state = NodeState::Syncing;
        status.highest_peer_slot = 1_000;
        status.slot = 5;
        advance_if_possible(&mut status, false);
        assert_eq!(status.state, NodeState::Syncing);
        status.slot = 998;
        advance_if_possible(&mut status, false);
        assert_eq!(status.state, NodeState::Online);
    }

    #[test]
    fn registered_validator_reaches_participating() {
        let mut status = fresh_status(false);
        advance_if_possible(&mut status, true);
        assert_eq!(status.state, NodeState::Participating);
    }

    #[tokio::test]
    async fn start_with_no_peers_reaches_online_and_stops_cleanly() {
        let secret_store: Box<dyn SecretStore> = Box::new(InMemorySecretStore::generate().unwrap());
        let node = NetworkNode::start(
            sample_config(),
            secret_store,
            Arc::new(InMemoryChainStore::new()),
            Arc::new(InMemorySnapshotStore::new()),
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(node.status().state, NodeState::Online);
        node.stop().await;
    }

    #[tokio::test]
    async fn add_seed_peer_rejects_unparseable_address() {
        let secret_store: Box<dyn SecretStore> = Box::new(InMemorySecretStore::generate().unwrap());
        let node = NetworkNode::start(
            sample_config(),
            secret_store,
            Arc::new(InMemoryChainStore::new()),
            Arc::new(InMemorySnapshotStore::new()),
        )
        .await
        .unwrap();
        assert!(node.add_seed_peer("not-an-address").is_err());
        node.stop().await;
    }

    #[tokio::test]
    async fn submit_judgment_is_accepted_until_the_buffer_fills() {
        let secret_store: Box<dyn SecretStore> = Box::new(InMemorySecretStore::generate().unwrap());
        let node = NetworkNode::start(
            sample_config(),
            secret_store,
            Arc::new(InMemoryChainStore::new()),
            Arc::new(InMemorySnapshotStore::new()),
        )
        .await
        .unwrap();
        assert!(node.submit_judgment(judgment("a")).is_ok());
        node.stop().await;
    }
}
