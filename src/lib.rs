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

//! Phinet - a byzantine-fault-tolerant, peer-to-peer replicated log of
//! judgments, anchored periodically to an external ledger.
//!
//! This crate provides:
//! - Deterministic types & canonical wire encoding
//! - A phi-threshold BFT consensus engine with weighted voting, finality,
//!   and fork detection
//! - An encrypted, reconnecting peer transport (Noise over framed TCP) with
//!   a gossip overlay on top
//! - A deterministic, weighted leader schedule driven by a monotonic slot
//!   clock
//! - An E-Score reputation calculator that feeds validator weight
//! - A persistent, append-only block store with bounded history
//!
//! The application-level judgment producers, the dashboard, configuration
//! *loading*, the file-based KV fallback store, and the external-ledger
//! anchoring client are external collaborators; only their interfaces are
//! reached from here.

/// Crate-wide error kinds and the top-level [`NodeError`](error::NodeError).
pub mod error;

/// Core protocol primitives: types, crypto, codec, slot/leader
/// schedule, E-Score, consensus, block store, snapshot and secret-key
/// storage boundaries.
pub mod core;

/// Observability: Prometheus metrics.
pub mod monitoring;

/// P2P networking stack: encrypted transport, gossip overlay, peer
/// registry and scoring.
pub mod networking;

/// Orchestrator wiring C3-C8 into a single embeddable network node.
pub mod orchestrator;
