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

//! The orchestrator (C9): `NetworkNode` wires the transport, gossip,
//! consensus engine, chain store and E-Score tracking into one running
//! node and exposes the embedder-facing API plus a typed event bus.

pub mod events;
pub mod node;

pub use events::{EventBus, NodeEvent, Subscription};
pub use node::{NetworkNode, NodeState, NodeStatus};
