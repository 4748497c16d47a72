//! Pure-function Brain decision logic (C5): minimal rule ladder with a
//! memory pre-hook and anti-oscillation guard, grounded in `brain/decider.py`.

use super::contracts::{Action, ActionKind, TuningInput};
use super::hook::pre_decide_with_memory;
use super::memory::Memory;
use crate::params::EF;

/// Decide the next tuning action. `mem`/`now` are optional: passing `None`
/// for `mem` skips the memory pre-hook entirely (equivalent to
/// `MEMORY_ENABLED=0`), which keeps this function callable without any
/// memory state when a caller doesn't want it.
pub fn decide_tuning_action(inp: &TuningInput, mem: Option<&mut Memory>, now: f64) -> Action {
    if let Some(mem) = mem {
        if let Some(action) = pre_decide_with_memory(inp, mem, now) {
            return action;
        }
    }

    if inp.guards.cooldown {
        return Action::noop("cooldown");
    }

    if (inp.p95_ms - inp.slo.p95_ms).abs() < 100.0 && (inp.recall_at10 - inp.slo.recall_at10).abs() < 0.02 {
        return Action::noop("within_hysteresis_band");
    }

    if inp.p95_ms > inp.slo.p95_ms && inp.recall_at10 >= inp.slo.recall_at10 + 0.05 {
        let ef = inp.params.get(EF).copied().unwrap_or(128);
        let (kind, base_step, reason) = if ef > 64 {
            (ActionKind::DropEf, -32.0, "high_latency_with_recall_redundancy")
        } else {
            (ActionKind::DropNcand, -200.0, "high_latency_ef_at_min_drop_ncand")
        };
        if let Some(action) = apply_anti_oscillation_logic(inp, kind, base_step, reason) {
            return action;
        }
    }

    if inp.recall_at10 < inp.slo.recall_at10 && inp.p95_ms <= inp.slo.p95_ms - 100.0 {
        let ef = inp.params.get(EF).copied().unwrap_or(128);
        let (kind, base_step, reason) = if ef < 256 {
            (ActionKind::BumpEf, 32.0, "low_recall_with_latency_margin")
        } else {
            (ActionKind::BumpRerank, 1.0, "low_recall_ef_at_max_bump_rerank")
        };
        if let Some(action) = apply_anti_oscillation_logic(inp, kind, base_step, reason) {
            return action;
        }
    }

    if inp.near_t && inp.p95_ms > inp.slo.p95_ms && inp.guards.stable {
        if let Some(action) =
            apply_anti_oscillation_logic(inp, ActionKind::BumpT, 100.0, "near_T_boundary_optimization")
        {
            return action;
        }
    }

    Action::noop("within_slo_or_uncertain")
}

fn apply_anti_oscillation_logic(
    inp: &TuningInput,
    kind: ActionKind,
    base_step: f64,
    reason: &str,
) -> Option<Action> {
    if let Some(last) = &inp.last_action {
        if last.kind == kind && last.age_sec < 10.0 {
            return Some(Action::noop("cooldown_active"));
        }
    }

    let step = if inp.adjustment_count >= 2 { base_step * 0.5 } else { base_step };
    Some(Action::single(kind, step, reason))
}

/// Diagnostic snapshot explaining *why* a decision landed where it did —
/// used by tests and the `/status` endpoint's diagnostic field, never by
/// the decision logic itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Analysis {
    pub latency_violation: bool,
    pub recall_violation: bool,
    pub recall_redundancy: bool,
    pub latency_margin: bool,
    pub cooldown_active: bool,
    pub stable_state: bool,
    pub near_boundary: bool,
    pub ef_at_min: bool,
    pub ef_at_max: bool,
}

pub fn analyze_tuning_input(inp: &TuningInput) -> Analysis {
    let ef = inp.params.get(EF).copied().unwrap_or(128);
    Analysis {
        latency_violation: inp.p95_ms > inp.slo.p95_ms,
        recall_violation: inp.recall_at10 < inp.slo.recall_at10,
        recall_redundancy: inp.recall_at10 >= inp.slo.recall_at10 + 0.05,
        latency_margin: inp.p95_ms <= inp.slo.p95_ms - 100.0,
        cooldown_active: inp.guards.cooldown,
        stable_state: inp.guards.stable,
        near_boundary: inp.near_t,
        ef_at_min: ef <= 64,
        ef_at_max: ef >= 256,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::contracts::{Guards, Slo};
    use crate::params;

    fn base_input() -> TuningInput {
        TuningInput {
            p95_ms: 150.0,
            recall_at10: 0.9,
            qps: 100.0,
            params: params::params(128, 500, 1000, 3),
            slo: Slo { p95_ms: 200.0, recall_at10: 0.85 },
            guards: Guards { cooldown: false, stable: true },
            near_t: false,
            last_action: None,
            adjustment_count: 0,
        }
    }

    #[test]
    fn cooldown_guard_forces_noop() {
        let mut inp = base_input();
        inp.guards.cooldown = true;
        let action = decide_tuning_action(&inp, None, 0.0);
        assert_eq!(action.reason, "cooldown");
    }

    #[test]
    fn within_hysteresis_band_is_noop() {
        let mut inp = base_input();
        inp.p95_ms = 210.0;
        inp.recall_at10 = 0.86;
        let action = decide_tuning_action(&inp, None, 0.0);
        assert_eq!(action.reason, "within_hysteresis_band");
    }

    #[test]
    fn high_latency_with_recall_redundancy_drops_ef() {
        let mut inp = base_input();
        inp.p95_ms = 400.0;
        inp.recall_at10 = 0.95;
        let action = decide_tuning_action(&inp, None, 0.0);
        assert_eq!(action.kind, ActionKind::DropEf);
        assert_eq!(action.step, -32.0);
    }

    #[test]
    fn low_recall_with_latency_margin_bumps_ef() {
        let mut inp = base_input();
        inp.p95_ms = 50.0;
        inp.recall_at10 = 0.5;
        let action = decide_tuning_action(&inp, None, 0.0);
        assert_eq!(action.kind, ActionKind::BumpEf);
        assert_eq!(action.step, 32.0);
    }

    #[test]
    fn repeated_action_within_cooldown_window_is_suppressed() {
        let mut inp = base_input();
        inp.p95_ms = 400.0;
        inp.recall_at10 = 0.95;
        inp.last_action = Some(Action::single(ActionKind::DropEf, -32.0, "high_latency_with_recall_redundancy"));
        // age_sec defaults to 0.0 in Action::single -- definitely within 10s
        let action = decide_tuning_action(&inp, None, 0.0);
        assert_eq!(action.reason, "cooldown_active");
    }

    #[test]
    fn adjustment_count_halves_step_after_two_same_direction_moves() {
        let mut inp = base_input();
        inp.p95_ms = 400.0;
        inp.recall_at10 = 0.95;
        inp.adjustment_count = 2;
        let action = decide_tuning_action(&inp, None, 0.0);
        assert_eq!(action.step, -16.0);
    }

    #[test]
    fn near_t_boundary_bumps_t_when_stable_and_over_target() {
        let mut inp = base_input();
        inp.p95_ms = 350.0;
        inp.recall_at10 = 0.87;
        inp.near_t = true;
        let action = decide_tuning_action(&inp, None, 0.0);
        assert_eq!(action.kind, ActionKind::BumpT);
    }
}
