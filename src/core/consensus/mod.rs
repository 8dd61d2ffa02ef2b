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

//! The BFT consensus engine (C7): block proposal, weighted voting,
//! confirmation, finality, fork detection and the cognitive-thermodynamic
//! signal layer, all driven through a single-owner command channel.

pub mod driver;
pub mod engine;
pub mod fork;
pub mod signals;
pub mod signing;

pub use driver::{ConsensusDriver, DriverError};
pub use engine::{ConsensusCommand, ConsensusEngine, ConsensusEvent, EngineConfig};
pub use fork::{ForkDetector, ForkRecommendation};
pub use signals::SignalTracker;

/// Golden ratio, φ = (1 + √5) / 2.
pub const PHI: f64 = 1.618_033_988_749_895;
/// φ⁻¹ ≈ 0.618: the consensus approval threshold and the efficiency cap.
pub const PHI_INV: f64 = PHI - 1.0;
/// φ⁻² ≈ 0.382: the low-efficiency threshold.
pub const PHI_INV2: f64 = PHI_INV * PHI_INV;
