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

//! Core protocol primitives.

/// Pure Ed25519/SHA-256 primitives (C1): keygen, sign, verify, hashing, ids.
pub mod crypto;
/// Wire envelope schema and canonical (de)serialization (C2).
pub mod codec;
/// Monotonic slot number and weighted deterministic leader schedule (C5).
pub mod slot;
/// Seven-dimension weighted reputation calculator (C6).
pub mod escore;
/// Append-only block store used by consensus (C8).
pub mod store;
/// Chain-snapshot persistence boundary used for warm restart.
pub mod snapshot;
/// Secret-key storage boundary (the "external key store").
pub mod security;
/// Consensus engine: proposal, weighted voting, finality, fork detection (C7).
pub mod consensus;
/// Deterministic data model: judgments, blocks, votes, validators, config.
pub mod types;
