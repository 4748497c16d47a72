//! Multi-knob bundle decider (C5 supplement): preset update bundles with a
//! cooldown-driven round-robin, grounded in `brain/multi_knob_decider.py`.
//!
//! The bandit-exploration and complex-step-scaling paths in the original
//! module are gated behind feature flags that ship off; this port keeps
//! only the always-on behavior (bundle selection by SLO margin, a
//! micro-step during cooldown, simple `max(0.5, scale)` scaling) and drops
//! the round-robin fallback for the ambiguous case down to a plain no-op,
//! matching the flags' default-off state.

use std::collections::BTreeMap;

use super::contracts::{Action, ActionKind, ApplyMode, TuningInput};

const COOLDOWN_TICKS: u32 = 2;

fn bundle(name: &str) -> BTreeMap<String, f64> {
    let mut b = BTreeMap::new();
    match name {
        "latency_drop" => {
            b.insert("ef_search".to_string(), -32.0);
            b.insert("candidate_k".to_string(), -25.0);
            b.insert("threshold_T".to_string(), 0.01);
        }
        "recall_gain" => {
            b.insert("ef_search".to_string(), 32.0);
            b.insert("rerank_k".to_string(), 6.0);
            b.insert("threshold_T".to_string(), -0.01);
        }
        "steady_nudge" => {
            b.insert("ef_search".to_string(), -16.0);
            b.insert("candidate_k".to_string(), -12.0);
            b.insert("threshold_T".to_string(), 0.005);
        }
        _ => {}
    }
    b
}

/// Owns the cooldown/round-robin bookkeeping that the original module kept
/// as module-level globals. An explicit struct keeps `tuner_core` free of
/// hidden mutable statics; callers hold one instance per tuning session.
#[derive(Debug, Default)]
pub struct MultiKnobDecider {
    round_robin_index: usize,
    cooldown_remaining: u32,
}

impl MultiKnobDecider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.round_robin_index = 0;
        self.cooldown_remaining = 0;
    }

    pub fn cooldown_remaining(&self) -> u32 {
        self.cooldown_remaining
    }

    pub fn decide(&mut self, inp: &TuningInput) -> Action {
        if self.cooldown_remaining > 0 {
            self.cooldown_remaining -= 1;
            return match self.cooldown_micro_step(inp) {
                Some(micro_step) => Action {
                    kind: ActionKind::MultiKnob,
                    step: 0.0,
                    reason: format!("COOLDOWN_MICRO_STEP_{}", self.cooldown_remaining),
                    age_sec: 0.0,
                    updates: Some(micro_step),
                    mode: ApplyMode::Sequential,
                },
                None => Action::noop(&format!("BUNDLE_COOLDOWN_REMAINING_{}", self.cooldown_remaining)),
            };
        }

        let memory_hit = self.check_memory_sweet_spot(inp);
        let (bundle_name, scale_factor) = self.select_bundle_with_rr(inp, memory_hit);

        if bundle_name == "noop" {
            return Action::noop("within_slo_or_uncertain");
        }

        let base_updates = bundle(bundle_name);
        let scaled = scale_updates(&base_updates, scale_factor.max(0.5));

        let mut reason = format!("MULTI_KNOB_{}", bundle_name.to_uppercase());
        if memory_hit {
            reason.push_str("_MEMORY_HIT");
        }

        self.cooldown_remaining = COOLDOWN_TICKS;

        Action {
            kind: ActionKind::MultiKnob,
            step: 0.0,
            reason,
            age_sec: 0.0,
            updates: Some(scaled),
            mode: ApplyMode::Sequential,
        }
    }

    fn check_memory_sweet_spot(&self, inp: &TuningInput) -> bool {
        let p95_margin = inp.slo.p95_ms - inp.p95_ms;
        let recall_margin = inp.recall_at10 - inp.slo.recall_at10;
        (-50.0..50.0).contains(&p95_margin) && (-0.02..0.02).contains(&recall_margin)
    }

    fn select_bundle_with_rr(&mut self, inp: &TuningInput, memory_hit: bool) -> (&'static str, f64) {
        if memory_hit {
            return ("steady_nudge", 0.5);
        }

        let p95_margin = inp.p95_ms - inp.slo.p95_ms;
        let recall_margin = inp.recall_at10 - inp.slo.recall_at10;

        if p95_margin > 0.0 && recall_margin >= 0.01 {
            return ("latency_drop", 1.0);
        }
        if recall_margin < 0.0 && p95_margin <= -10.0 {
            return ("recall_gain", 1.0);
        }

        // Bandit exploration and its round-robin fallback ship disabled;
        // the ambiguous case resolves to a plain no-op.
        ("noop", 1.0)
    }

    fn cooldown_micro_step(&self, inp: &TuningInput) -> Option<BTreeMap<String, f64>> {
        let p95_margin = inp.p95_ms - inp.slo.p95_ms;
        let recall_margin = inp.recall_at10 - inp.slo.recall_at10;

        let mut step = BTreeMap::new();
        if p95_margin > 5.0 {
            step.insert("ef_search".to_string(), -8.0);
        } else if recall_margin < -0.02 {
            step.insert("ef_search".to_string(), 8.0);
        } else if self.round_robin_index == 0 {
            step.insert("ef_search".to_string(), -8.0);
        } else {
            step.insert("ef_search".to_string(), 8.0);
        }
        Some(step)
    }
}

fn scale_updates(updates: &BTreeMap<String, f64>, scale_factor: f64) -> BTreeMap<String, f64> {
    updates.iter().map(|(k, v)| (k.clone(), v * scale_factor)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::contracts::{Guards, Slo};
    use crate::params;

    fn input(p95: f64, recall: f64) -> TuningInput {
        TuningInput {
            p95_ms: p95,
            recall_at10: recall,
            qps: 100.0,
            params: params::params(128, 500, 1000, 3),
            slo: Slo { p95_ms: 200.0, recall_at10: 0.9 },
            guards: Guards { cooldown: false, stable: true },
            near_t: false,
            last_action: None,
            adjustment_count: 0,
        }
    }

    #[test]
    fn latency_drop_selected_on_high_latency_good_recall() {
        let mut decider = MultiKnobDecider::new();
        let action = decider.decide(&input(300.0, 0.95));
        assert_eq!(action.reason, "MULTI_KNOB_LATENCY_DROP");
        assert_eq!(action.kind, ActionKind::MultiKnob);
    }

    #[test]
    fn recall_gain_selected_on_low_recall_good_latency() {
        let mut decider = MultiKnobDecider::new();
        let action = decider.decide(&input(150.0, 0.7));
        assert_eq!(action.reason, "MULTI_KNOB_RECALL_GAIN");
    }

    #[test]
    fn ambiguous_case_is_noop_without_bandit() {
        let mut decider = MultiKnobDecider::new();
        let action = decider.decide(&input(205.0, 0.91));
        assert_eq!(action.reason, "within_slo_or_uncertain");
    }

    #[test]
    fn cooldown_follows_a_selected_bundle() {
        let mut decider = MultiKnobDecider::new();
        let _ = decider.decide(&input(300.0, 0.95));
        assert_eq!(decider.cooldown_remaining(), COOLDOWN_TICKS);
        let next = decider.decide(&input(300.0, 0.95));
        assert!(next.reason.starts_with("COOLDOWN_MICRO_STEP"));
    }
}
