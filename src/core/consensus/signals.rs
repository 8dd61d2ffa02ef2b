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

//! The cognitive-thermodynamic signal layer: a read-only efficiency
//! gauge derived from how much consensus work succeeds versus stalls.
//!
//! `SignalTracker` is signals-only. Nothing in `consensus::engine` reads
//! it; it exists purely to be surfaced through the orchestrator's event
//! stream as `metrics:reported` fields, per SPEC_FULL.md §4.7.

use crate::core::consensus::{PHI, PHI_INV, PHI_INV2};

/// Accumulates heat/work/entropy from consensus outcomes and derives an
/// efficiency figure capped at the Carnot bound φ⁻¹.
#[derive(Clone, Copy, Debug, Default)]
pub struct SignalTracker {
    heat: f64,
    work: f64,
    entropy: f64,
}

/// Point-in-time snapshot of the signal layer, for reporting.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Signals {
    /// Accumulated heat (wasted effort: timeouts, rejections).
    pub heat: f64,
    /// Accumulated work (useful effort: confirmations, finalizations).
    pub work: f64,
    /// Accumulated entropy (disorder: equivocations, forks).
    pub entropy: f64,
    /// η = work / (work + heat), capped at φ⁻¹.
    pub efficiency: f64,
    /// True iff `heat > φ * 50`.
    pub critical: bool,
    /// True iff `efficiency < φ⁻²`.
    pub low_efficiency: bool,
}

impl SignalTracker {
    /// A fresh tracker with no accumulated history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a unit of useful work (a block confirmed or finalized).
    pub fn record_work(&mut self, amount: f64) {
        self.work += amount.max(0.0);
    }

    /// Record a unit of wasted heat (a proposal timeout or rejection).
    pub fn record_heat(&mut self, amount: f64) {
        self.heat += amount.max(0.0);
    }

    /// Record a unit of entropy (an equivocation or detected fork).
    pub fn record_entropy(&mut self, amount: f64) {
        self.entropy += amount.max(0.0);
    }

    /// η = work / (work + heat), capped at the Carnot bound φ⁻¹. The cap
    /// is an invariant of the formula itself: dividing work by (work +
    /// heat) can only approach 1.0 as heat -> 0, so the `min` below never
    /// actually triggers for well-formed, non-negative inputs, but is
    /// kept as an enforced ceiling per the pinned invariant.
    pub fn efficiency(&self) -> f64 {
        if self.work + self.heat <= 0.0 {
            return 0.0;
        }
        (self.work / (self.work + self.heat)).min(PHI_INV)
    }

    /// True iff accumulated heat exceeds `φ * 50`.
    pub fn is_critical(&self) -> bool {
        self.heat > PHI * 50.0
    }

    /// True iff current efficiency is below the low-efficiency threshold φ⁻².
    pub fn is_low_efficiency(&self) -> bool {
        self.efficiency() < PHI_INV2
    }

    /// A full snapshot, for building a `metrics:reported` event.
    pub fn snapshot(&self) -> Signals {
        Signals {
            heat: self.heat,
            work: self.work,
            entropy: self.entropy,
            efficiency: self.efficiency(),
            critical: self.is_critical(),
            low_efficiency: self.is_low_efficiency(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_activity_has_zero_efficiency_and_is_not_critical() {
        let tracker = SignalTracker::new();
        assert_eq!(tracker.efficiency(), 0.0);
        assert!(!tracker.is_critical());
    }

    #[test]
    fn efficiency_never_exceeds_the_carnot_bound() {
        let mut tracker = SignalTracker::new();
        tracker.record_work(1_000_000.0);
        tracker.record_heat(0.000_001);
        assert!(tracker.efficiency() <= PHI_INV + 1e-12);
    }

    #[test]
    fn pure_heat_with_no_work_is_low_efficiency() {
        let mut tracker = SignalTracker::new();
        tracker.record_heat(10.0);
        assert!(tracker.is_low_efficiency());
    }

    #[test]
    fn large_accumulated_heat_is_critical() {
        let mut tracker = SignalTracker::new();
        tracker.record_heat(PHI * 50.0 + 1.0);
        assert!(tracker.is_critical());
    }

    #[test]
    fn balanced_work_and_heat_gives_half_efficiency() {
        let mut tracker = SignalTracker::new();
        tracker.record_work(10.0);
        tracker.record_heat(10.0);
        assert!((tracker.efficiency() - 0.5).abs() < 1e-9);
    }
}
