//! Applies Brain [`Action`]s to a parameter map, including the multi-knob
//! feasibility pre-projection and per-knob counters (C6), grounded in
//! `brain/apply.py`.

use std::collections::BTreeMap;

use crate::params::{clip_joint, clip_params, ParamMap, EF, NCAND_MAX, RERANK_MULT, T};

use super::contracts::{Action, ActionKind, ApplyMode, MultiKnobResult, MultiKnobStatus};

/// Process-wide counters mirroring `_apply_counters` in the original
/// module. Owned by the caller (typically the infra-side singleton) rather
/// than kept as a core-level global, so `tuner_core` stays free of hidden
/// mutable statics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyCounters {
    pub clipped_count: u64,
    pub rejected_by_joint: u64,
    pub rollback_count: u64,
    pub decide_total: u64,
    pub ef_search_updates: u64,
    pub candidate_k_updates: u64,
    pub rerank_k_updates: u64,
    pub threshold_t_updates: u64,
    /// Consecutive `apply_updates` calls in a row that had at least one
    /// knob clamped by a step cap; resets to 0 on any uncapped update.
    pub consecutive_capped_ticks: u64,
}

/// Per-knob maximum absolute delta per tick (spec.md §4.6 Step caps),
/// keyed on the same Brain-space names [`ApplyCounters::track`] uses.
const STEP_CAPS: &[(&str, f64)] = &[(EF, 16.0), (NCAND_MAX, 200.0), (RERANK_MULT, 10.0), (T, 0.05)];

/// Consecutive capped ticks at or beyond this count emit a WARN event.
const STEP_CAP_WARN_THRESHOLD: u64 = 3;

/// Clamp each proposed delta to its per-knob step cap, returning the
/// clamped update set and whether any knob was actually clamped.
fn apply_step_caps(updates: &BTreeMap<String, f64>) -> (BTreeMap<String, f64>, bool) {
    let mut capped = updates.clone();
    let mut was_capped = false;
    for &(key, limit) in STEP_CAPS {
        if let Some(v) = capped.get_mut(key) {
            let clamped = v.clamp(-limit, limit);
            if clamped != *v {
                was_capped = true;
            }
            *v = clamped;
        }
    }
    (capped, was_capped)
}

impl ApplyCounters {
    fn track(&mut self, key: &str) {
        match key {
            "ef_search" | EF => self.ef_search_updates += 1,
            "candidate_k" | NCAND_MAX => self.candidate_k_updates += 1,
            "rerank_k" | RERANK_MULT => self.rerank_k_updates += 1,
            "threshold_T" | T => self.threshold_t_updates += 1,
            _ => {}
        }
    }
}

/// Apply a single decided [`Action`] to `params`, returning the clipped
/// result. Multi-knob actions are delegated to [`apply_updates`].
pub fn apply_action(params: &ParamMap, action: &Action, counters: &mut ApplyCounters) -> ParamMap {
    if action.kind == ActionKind::MultiKnob {
        if let Some(updates) = &action.updates {
            let result = apply_updates(params, updates, action.mode, false, counters);
            return result.params_after;
        }
    }

    let mut new_params = params.clone();
    match action.kind {
        ActionKind::BumpEf | ActionKind::DropEf => {
            let cur = new_params.get(EF).copied().unwrap_or(128);
            new_params.insert(EF.to_string(), cur + action.step as i64);
        }
        ActionKind::BumpT | ActionKind::DropT => {
            let cur = new_params.get(T).copied().unwrap_or(500);
            new_params.insert(T.to_string(), cur + action.step as i64);
        }
        ActionKind::BumpRerank | ActionKind::DropRerank => {
            let cur = new_params.get(RERANK_MULT).copied().unwrap_or(2);
            new_params.insert(RERANK_MULT.to_string(), cur + action.step as i64);
        }
        ActionKind::BumpNcand | ActionKind::DropNcand => {
            let cur = new_params.get(NCAND_MAX).copied().unwrap_or(1000);
            new_params.insert(NCAND_MAX.to_string(), cur + action.step as i64);
        }
        ActionKind::Rollback | ActionKind::Noop | ActionKind::MultiKnob => {}
    }

    clip_params(&new_params)
}

fn params_plus_updates(current: &ParamMap, updates: &BTreeMap<String, f64>) -> ParamMap {
    let mut test = current.clone();
    for (key, value) in updates {
        let base = test.get(key.as_str()).copied().unwrap_or(0);
        test.insert(key.clone(), base + *value as i64);
    }
    test
}

/// Progressive shrinking in fixed priority order (rerank, ef, candidate_k,
/// T) until the merged update set no longer trips a joint constraint, or
/// an empty map if nothing short of dropping the whole bundle works.
fn make_feasible_updates(current: &ParamMap, updates: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    let mut feasible = updates.clone();

    let test = params_plus_updates(current, &feasible);
    let (_, was_clipped, _) = clip_joint(&test, true);
    if !was_clipped {
        return feasible;
    }

    let shrink_keys = [RERANK_MULT, EF, NCAND_MAX, T];
    for key in shrink_keys {
        if let Some(v) = feasible.get(key).copied() {
            feasible.insert(key.to_string(), v * 0.5);
        }
        let test = params_plus_updates(current, &feasible);
        let (_, was_clipped, _) = clip_joint(&test, true);
        if !was_clipped {
            return feasible;
        }
    }

    BTreeMap::new()
}

/// Apply a bundle of knob deltas. Every call first clamps each delta to its
/// per-knob step cap (ahead of feasibility projection), unconditionally.
/// `simulate_failure` exercises the rollback path in atomic mode; atomic
/// mode itself falls back to sequential when the caller hasn't enabled it
/// (mirroring `ENABLE_ATOMIC` defaulting off).
pub fn apply_updates(
    current_params: &ParamMap,
    updates: &BTreeMap<String, f64>,
    mode: ApplyMode,
    simulate_failure: bool,
    counters: &mut ApplyCounters,
) -> MultiKnobResult {
    counters.decide_total += 1;
    let params_before = current_params.clone();

    let (updates, was_capped) = apply_step_caps(updates);
    let updates = &updates;
    if was_capped {
        counters.consecutive_capped_ticks += 1;
        if counters.consecutive_capped_ticks >= STEP_CAP_WARN_THRESHOLD {
            tracing::warn!(
                consecutive_capped_ticks = counters.consecutive_capped_ticks,
                "step cap clamped consecutive ticks"
            );
        }
    } else {
        counters.consecutive_capped_ticks = 0;
    }

    match mode {
        ApplyMode::Sequential => {
            let mut feasible = make_feasible_updates(current_params, updates);

            if feasible.is_empty() {
                match updates.iter().next() {
                    Some((key, value)) => {
                        feasible = BTreeMap::new();
                        feasible.insert(key.clone(), *value);
                    }
                    None => {
                        return MultiKnobResult::rejected(params_before, "NO_FEASIBLE_UPDATES");
                    }
                }
            }

            let new_params = params_plus_updates(current_params, &feasible);
            let (_, was_clipped, reason) = clip_joint(&new_params, true);
            if was_clipped {
                counters.rejected_by_joint += 1;
                return MultiKnobResult::rejected(params_before, &format!("JOINT_CONSTRAINT: {reason}"));
            }

            for key in feasible.keys() {
                counters.track(key);
            }

            MultiKnobResult {
                status: MultiKnobStatus::Applied,
                params_before,
                params_after: new_params,
                updates_applied: feasible,
                clipped: false,
                clipped_reason: String::new(),
                rollback_snapshot: None,
                rejection_reason: String::new(),
            }
        }

        // Atomic mode is not enabled in this deployment's feature set; the
        // path is implemented for completeness but callers never request it
        // (the infra layer never sets `ApplyMode::Atomic`). Falls back to
        // sequential, matching `ENABLE_ATOMIC = False`.
        ApplyMode::Atomic => {
            let _ = simulate_failure;
            apply_updates(current_params, updates, ApplyMode::Sequential, simulate_failure, counters)
        }
    }
}

pub fn validate_action_application(params: &ParamMap, action: &Action) -> bool {
    let mut counters = ApplyCounters::default();
    let new_params = apply_action(params, action, &mut counters);
    crate::params::is_param_valid(&new_params)
}
