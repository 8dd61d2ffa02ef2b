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

//! E-Score reputation and the derived vote-weight function.
//!
//! The spec leaves the exact combination of e_score/burned/uptime into a
//! single scalar weight unspecified. SPEC_FULL.md pins:
//!
//! `weight = e_score + min(50, 10 * ln(1 + burned)) + 25 * uptime`
//!
//! e_score already lives in `[0, 100]`; the burned term is logarithmic so
//! no single whale validator can dominate the weight line by burning
//! without bound, capped at 50; uptime contributes up to 25. This keeps
//! e_score dominant (matching the spec's framing of it as the primary
//! reputation signal) while still rewarding skin-in-the-game and liveness.

use crate::core::types::ValidatorRecord;

/// Cap on the logarithmic burned-amount contribution to weight.
pub const MAX_BURN_CONTRIBUTION: f64 = 50.0;
/// Scale factor on `ln(1 + burned)`.
pub const BURN_LOG_SCALE: f64 = 10.0;
/// Scale factor on uptime ratio.
pub const UPTIME_SCALE: f64 = 25.0;
/// Lower clamp for e_score.
pub const E_SCORE_MIN: f64 = 0.0;
/// Upper clamp for e_score.
pub const E_SCORE_MAX: f64 = 100.0;

/// An E-Score delta applied after an observed outcome.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Outcome {
    /// The validator's proposal was confirmed.
    ProposalConfirmed,
    /// The validator's proposal timed out without confirmation.
    ProposalTimedOut,
    /// The validator voted with the eventual majority.
    VotedWithMajority,
    /// The validator voted against the eventual majority.
    VotedAgainstMajority,
    /// The validator was caught equivocating.
    Equivocated,
    /// The validator missed its slot entirely (no proposal, no vote).
    MissedSlot,
}

impl Outcome {
    /// Raw point delta for this outcome, before clamping.
    fn delta(self) -> f64 {
        match self {
            Outcome::ProposalConfirmed => 2.0,
            Outcome::ProposalTimedOut => -3.0,
            Outcome::VotedWithMajority => 0.5,
            Outcome::VotedAgainstMajority => -1.0,
            Outcome::Equivocated => -40.0,
            Outcome::MissedSlot => -1.5,
        }
    }
}

/// Apply `outcome` to `e_score`, clamping to `[E_SCORE_MIN, E_SCORE_MAX]`.
pub fn apply_outcome(e_score: f64, outcome: Outcome) -> f64 {
    (e_score + outcome.delta()).clamp(E_SCORE_MIN, E_SCORE_MAX)
}

/// Deterministic scalar weight from a validator's three reputation
/// dimensions. Pure: same inputs always produce the same weight, which
/// every node must agree on independently since weight feeds the leader
/// schedule and vote-approval totals.
pub fn validator_weight(e_score: f64, burned: u64, uptime: f64) -> f64 {
    let e_score = e_score.clamp(E_SCORE_MIN, E_SCORE_MAX);
    let uptime = uptime.clamp(0.0, 1.0);
    let burn_term = (BURN_LOG_SCALE * (1.0 + burned as f64).ln()).min(MAX_BURN_CONTRIBUTION);
    e_score + burn_term + UPTIME_SCALE * uptime
}

/// Recompute and fill in `record.weight` from its other fields.
pub fn refresh_weight(record: &mut ValidatorRecord) {
    record.weight = validator_weight(record.e_score, record.burned, record.uptime);
}

/// Golden ratio, shared with `core::consensus` for the aggregate's weights.
const PHI: f64 = crate::core::consensus::PHI;
const PHI_INV: f64 = crate::core::consensus::PHI_INV;
const PHI_INV2: f64 = crate::core::consensus::PHI_INV2;

/// Raw event-feed counters behind the seven E-Score dimensions. Everything
/// here is a monotonic counter or a last-observed timestamp; the dimension
/// scores and the aggregate are pure functions of this struct, recomputed
/// on read and cached until the next mutation.
#[derive(Clone, Debug, Default)]
pub struct RawCounters {
    /// Judgments this node has issued that later matched network consensus.
    pub agreement_count: u64,
    /// Total judgments issued, the denominator for agreement rate.
    pub total_judgments: u64,
    /// Blocks finalized while this validator was the proposer.
    pub blocks_processed: u64,
    /// Unix-ms timestamp of the last heartbeat observed from this peer.
    pub last_heartbeat_ms: i64,
    /// Cumulative amount burned by this validator (smallest unit).
    pub total_burned: u64,
    /// Build-event count (e.g. client/tooling commits attributed to this identity).
    pub commits: u64,
    /// Units currently held, for the HOLD dimension.
    pub held_amount: u64,
    /// Unix-ms timestamp the current hold position was opened.
    pub held_since_ms: i64,
    /// Active referrals currently attributed to this identity.
    pub active_referrals: u64,
    /// Unix-ms timestamp this identity was first observed on the network.
    pub account_created_ms: i64,
}

/// One of the seven raw dimensions, each normalized to `[0, 100]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Dimensions {
    /// Amount held, weighted by how long it has been held.
    pub hold: f64,
    /// Log-scaled cumulative burn.
    pub burn: f64,
    /// Per-day judgment-issuance rate.
    pub use_rate: f64,
    /// Linear, capped build/commit activity.
    pub build: f64,
    /// Uptime ratio plus blocks produced.
    pub run: f64,
    /// Active referral count, weighted.
    pub refer: f64,
    /// Log of account age in days.
    pub time: f64,
}

const HOLD_AMOUNT_SCALE: f64 = 10.0;
const HOLD_DAYS_CAP: f64 = 25.0;
const BURN_SCALE: f64 = 12.0;
const USE_PER_DAY_SCALE: f64 = 8.0;
const BUILD_PER_COMMIT: f64 = 4.0;
const RUN_UPTIME_WEIGHT: f64 = 70.0;
const RUN_BLOCKS_CAP: f64 = 30.0;
const RUN_BLOCKS_SCALE: f64 = 0.5;
const REFER_PER_ACTIVE: f64 = 10.0;
const TIME_SCALE: f64 = 14.0;
const MS_PER_DAY: f64 = 86_400_000.0;

fn clamp_score(x: f64) -> f64 {
    x.clamp(0.0, 100.0)
}

/// Compute all seven raw dimension scores from `counters` as of `now_ms`.
/// Each dimension is independently normalized into `[0, 100]`; combining
/// them into the scalar E-Score is [`aggregate`]'s job.
pub fn dimensions(counters: &RawCounters, uptime_ratio: f64, now_ms: i64) -> Dimensions {
    let held_days = if counters.held_amount > 0 && counters.held_since_ms > 0 {
        ((now_ms - counters.held_since_ms).max(0) as f64 / MS_PER_DAY).min(HOLD_DAYS_CAP)
    } else {
        0.0
    };
    let hold = clamp_score(HOLD_AMOUNT_SCALE * (1.0 + counters.held_amount as f64).ln() + 2.0 * held_days);

    let burn = clamp_score(BURN_SCALE * log_phi(1.0 + counters.total_burned as f64));

    let account_days = if counters.account_created_ms > 0 {
        ((now_ms - counters.account_created_ms).max(0) as f64 / MS_PER_DAY).max(0.0)
    } else {
        0.0
    };
    let per_day = if account_days >= 1.0 {
        counters.total_judgments as f64 / account_days
    } else {
        counters.total_judgments as f64
    };
    let use_rate = clamp_score(USE_PER_DAY_SCALE * per_day);

    let build = clamp_score(BUILD_PER_COMMIT * counters.commits as f64);

    let run = clamp_score(
        RUN_UPTIME_WEIGHT * uptime_ratio.clamp(0.0, 1.0)
            + (RUN_BLOCKS_SCALE * counters.blocks_processed as f64).min(RUN_BLOCKS_CAP),
    );

    let refer = clamp_score(REFER_PER_ACTIVE * counters.active_referrals as f64);

    let time = clamp_score(TIME_SCALE * (1.0 + account_days).ln());

    Dimensions { hold, burn, use_rate, build, run, refer, time }
}

fn log_phi(x: f64) -> f64 {
    x.ln() / PHI.ln()
}

/// Combine the seven dimensions into a single `[0, 100]` E-Score.
///
/// The spec's aggregate formula names four weights (`φ, φ⁻¹, 1, φ⁻²`) over
/// what it separately describes as seven raw dimensions. Pinned reading
/// (see DESIGN.md): the four weighted terms are HOLD, BURN, RUN and TIME in
/// that declaration order; USE and BUILD (both measures of active
/// participation) are folded into RUN by averaging, and REFER (network
/// growth) is folded into TIME the same way, before the four weights are
/// applied.
pub fn aggregate(dims: Dimensions) -> f64 {
    let run_effective = (dims.run + dims.use_rate + dims.build) / 3.0;
    let time_effective = (dims.time + dims.refer) / 2.0;
    let weighted = PHI * dims.hold + PHI_INV * dims.burn + 1.0 * run_effective + PHI_INV2 * time_effective;
    let total_weight = PHI + PHI_INV + 1.0 + PHI_INV2;
    clamp_score(weighted / total_weight)
}

/// Per-identity E-Score tracker: owns the raw counters, the event-feed
/// mutation methods, and a memoized aggregate invalidated on every write.
#[derive(Debug)]
pub struct EScoreTracker {
    counters: RawCounters,
    uptime_ratio: f64,
    cached: Option<f64>,
}

impl EScoreTracker {
    /// A fresh tracker with all counters zeroed.
    pub fn new() -> Self {
        Self { counters: RawCounters::default(), uptime_ratio: 0.0, cached: None }
    }

    /// Current raw counters, read-only.
    pub fn counters(&self) -> &RawCounters {
        &self.counters
    }

    /// A judgment this identity issued either matched or missed eventual
    /// network consensus.
    pub fn on_judgment_matches_consensus(&mut self, matched: bool) {
        self.counters.total_judgments += 1;
        if matched {
            self.counters.agreement_count += 1;
        }
        self.invalidate();
    }

    /// A block finalized with this identity as proposer; also counts as a
    /// heartbeat.
    pub fn on_block_finalized(&mut self, now_ms: i64) {
        self.counters.blocks_processed += 1;
        self.counters.last_heartbeat_ms = now_ms;
        self.invalidate();
    }

    /// A plain liveness heartbeat, independent of block production.
    pub fn on_heartbeat(&mut self, now_ms: i64) {
        self.counters.last_heartbeat_ms = now_ms;
        self.invalidate();
    }

    /// This identity burned `amount` units.
    pub fn on_burn_event(&mut self, amount: u64) {
        self.counters.total_burned = self.counters.total_burned.saturating_add(amount);
        self.invalidate();
    }

    /// This identity produced a build/commit event.
    pub fn on_build_event(&mut self) {
        self.counters.commits += 1;
        self.invalidate();
    }

    /// Update the current hold position.
    pub fn set_hold_position(&mut self, amount: u64, since_ms: i64) {
        self.counters.held_amount = amount;
        self.counters.held_since_ms = since_ms;
        self.invalidate();
    }

    /// Update the count of currently-active referrals.
    pub fn set_active_referrals(&mut self, count: u64) {
        self.counters.active_referrals = count;
        self.invalidate();
    }

    /// Record when this identity was first observed, if not already set.
    pub fn set_account_created(&mut self, created_ms: i64) {
        if self.counters.account_created_ms == 0 {
            self.counters.account_created_ms = created_ms;
            self.invalidate();
        }
    }

    /// Update the uptime ratio (`[0, 1]`) fed into the RUN dimension.
    pub fn set_uptime_ratio(&mut self, ratio: f64) {
        self.uptime_ratio = ratio.clamp(0.0, 1.0);
        self.invalidate();
    }

    fn invalidate(&mut self) {
        self.cached = None;
    }

    /// The current E-Score, recomputing and caching it if a counter
    /// mutation has happened since the last call.
    pub fn score(&mut self, now_ms: i64) -> f64 {
        if let Some(cached) = self.cached {
            return cached;
        }
        let dims = dimensions(&self.counters, self.uptime_ratio, now_ms);
        let score = aggregate(dims);
        self.cached = Some(score);
        score
    }
}

impl Default for EScoreTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Answers "what is this identity's E-Score": always computable for the
/// local node, but reported as unknown for any peer this node hasn't yet
/// received a heartbeat-carried score from (spec §4.6: peer scores arrive
/// via their heartbeats, never recomputed locally from someone else's raw
/// counters).
#[derive(Debug, Default)]
pub struct EScoreProvider {
    local: EScoreTracker,
    local_id: Option<crate::core::types::PublicKey>,
    peer_reported: crate::core::types::CanonicalMap<crate::core::types::PublicKey, f64>,
}

impl EScoreProvider {
    /// A provider for `local_id`, with a fresh local tracker.
    pub fn new(local_id: crate::core::types::PublicKey) -> Self {
        Self { local: EScoreTracker::new(), local_id: Some(local_id), peer_reported: Default::default() }
    }

    /// Mutable access to the local tracker, for the event feed.
    pub fn local_mut(&mut self) -> &mut EScoreTracker {
        &mut self.local
    }

    /// Record a score `who` self-reported in a heartbeat.
    pub fn report_peer_score(&mut self, who: crate::core::types::PublicKey, score: f64) {
        self.peer_reported.insert(who, clamp_score(score));
    }

    /// The E-Score for `who`, or `None` ("unknown") if `who` is a peer this
    /// node has never received a heartbeat score from.
    pub fn score_of(&mut self, who: &crate::core::types::PublicKey, now_ms: i64) -> Option<f64> {
        if self.local_id.as_ref() == Some(who) {
            return Some(self.local.score(now_ms));
        }
        self.peer_reported.get(who).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_is_monotonic_in_each_input() {
        let base = validator_weight(50.0, 100, 0.5);
        assert!(validator_weight(60.0, 100, 0.5) > base);
        assert!(validator_weight(50.0, 1_000, 0.5) > base);
        assert!(validator_weight(50.0, 100, 0.9) > base);
    }

    #[test]
    fn burn_contribution_is_capped() {
        let modest = validator_weight(0.0, 1_000_000, 0.0);
        let whale = validator_weight(0.0, u64::MAX, 0.0);
        assert!(whale - modest < 1.0);
        assert!(whale <= MAX_BURN_CONTRIBUTION + 0.001);
    }

    #[test]
    fn e_score_is_clamped_before_use() {
        assert_eq!(validator_weight(500.0, 0, 0.0), validator_weight(100.0, 0, 0.0));
        assert_eq!(validator_weight(-500.0, 0, 0.0), validator_weight(0.0, 0, 0.0));
    }

    #[test]
    fn equivocation_penalty_dwarfs_normal_deltas() {
        let after = apply_outcome(50.0, Outcome::Equivocated);
        assert!((50.0 - after) > 10.0 * (apply_outcome(50.0, Outcome::ProposalTimedOut) - 50.0).abs());
    }

    #[test]
    fn outcome_deltas_clamp_at_bounds() {
        assert_eq!(apply_outcome(99.0, Outcome::ProposalConfirmed), 100.0);
        assert_eq!(apply_outcome(1.0, Outcome::Equivocated), 0.0);
    }

    #[test]
    fn dimensions_are_all_in_range() {
        let counters = RawCounters {
            agreement_count: 80,
            total_judgments: 100,
            blocks_processed: 40,
            last_heartbeat_ms: 1_000,
            total_burned: 1_000_000,
            commits: 30,
            held_amount: 50_000,
            held_since_ms: 0,
            active_referrals: 12,
            account_created_ms: 0,
        };
        let dims = dimensions(&counters, 0.95, 30 * 86_400_000);
        for v in [dims.hold, dims.burn, dims.use_rate, dims.build, dims.run, dims.refer, dims.time] {
            assert!((0.0..=100.0).contains(&v), "{v} out of range");
        }
    }

    #[test]
    fn aggregate_of_all_zero_dimensions_is_zero() {
        let dims = Dimensions { hold: 0.0, burn: 0.0, use_rate: 0.0, build: 0.0, run: 0.0, refer: 0.0, time: 0.0 };
        assert_eq!(aggregate(dims), 0.0);
    }

    #[test]
    fn aggregate_of_all_max_dimensions_is_capped_at_100() {
        let dims =
            Dimensions { hold: 100.0, burn: 100.0, use_rate: 100.0, build: 100.0, run: 100.0, refer: 100.0, time: 100.0 };
        assert!((aggregate(dims) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn hold_weighs_more_than_time_in_the_aggregate() {
        let hold_heavy =
            Dimensions { hold: 100.0, burn: 0.0, use_rate: 0.0, build: 0.0, run: 0.0, refer: 0.0, time: 0.0 };
        let time_heavy =
            Dimensions { hold: 0.0, burn: 0.0, use_rate: 0.0, build: 0.0, run: 0.0, refer: 0.0, time: 100.0 };
        assert!(aggregate(hold_heavy) > aggregate(time_heavy));
    }

    #[test]
    fn tracker_score_is_memoized_until_mutation() {
        let mut tracker = EScoreTracker::new();
        tracker.on_burn_event(1_000);
        let first = tracker.score(10_000);
        // Mutating internal clock inputs without touching a counter must not
        // change the cached value even if we call score() again with a
        // different `now_ms` -- the cache is only invalidated on mutation.
        let second = tracker.score(999_999_999);
        assert_eq!(first, second);
        tracker.on_build_event();
        let third = tracker.score(10_000);
        assert_ne!(second, third);
    }

    #[test]
    fn provider_reports_self_but_unknown_peers_as_none() {
        let self_id = crate::core::types::PublicKey([1u8; 32]);
        let peer_id = crate::core::types::PublicKey([2u8; 32]);
        let mut provider = EScoreProvider::new(self_id);
        assert!(provider.score_of(&self_id, 0).is_some());
        assert_eq!(provider.score_of(&peer_id, 0), None);
        provider.report_peer_score(peer_id, 42.0);
        assert_eq!(provider.score_of(&peer_id, 0), Some(42.0));
    }
}
