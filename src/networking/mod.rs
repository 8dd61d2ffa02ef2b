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

//! Networking: encrypted peer transport, gossip overlay, and peer scoring.

/// Encrypted peer transport (C3): Noise-XX handshake over length-delimited
/// framed TCP, reconnecting with jittered backoff.
pub mod transport;
/// Gossip overlay (C4): dedup + limited-flood broadcast on top of the transport.
pub mod gossip;
/// Generic integer peer scoring used to throttle or ban misbehaving peers.
pub mod peer_score;
