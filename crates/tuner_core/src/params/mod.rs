//! Brain parameter model & constraints per CONTRACT §3 (knob space, joint invariants).
//!
//! Knobs: `ef` [64,256], `T` [200,1200] (normalized threshold_T = T/1000),
//! `Ncand_max` [500,2000], `rerank_mult` [2,6].
//!
//! Joint invariants:
//! - `rerank_mult <= 0.1 * Ncand_max`
//! - `ef <= 4 * Ncand_max`
//! - normalized `T/1000 in [0.0, 1.0]`
//!
//! Clipping is idempotent: per-knob range clip, then a joint fix that only
//! ever pulls the offending knob toward feasibility (never overshoots, never
//! touches knobs the violation doesn't implicate).

use std::collections::BTreeMap;

/// Canonical Brain-space parameter name.
pub const EF: &str = "ef";
pub const T: &str = "T";
pub const NCAND_MAX: &str = "Ncand_max";
pub const RERANK_MULT: &str = "rerank_mult";

/// A Brain-space parameter dictionary. `i64` covers every knob: `ef`,
/// `Ncand_max`, and the raw `T` are integral; `rerank_mult` is a small
/// integral multiplier in this spec's canonical form. Kept as a map (rather
/// than a fixed struct) so unknown keys pass through untouched, as required
/// by `clip_params`.
pub type ParamMap = BTreeMap<String, i64>;

/// Joint-invariant violation kinds, surfaced in `clip_joint`'s reason string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    RerankGtCandidate,
    EfGt4xCandidate,
    ThresholdTRange,
}

impl Violation {
    fn tag(self) -> &'static str {
        match self {
            Violation::RerankGtCandidate => "RERANK_GT_CANDIDATE",
            Violation::EfGt4xCandidate => "EF_GT_4X_CANDIDATE",
            Violation::ThresholdTRange => "THRESHOLD_T_RANGE",
        }
    }
}

/// Declared per-knob ranges (inclusive).
pub fn get_param_ranges() -> BTreeMap<&'static str, (i64, i64)> {
    let mut ranges = BTreeMap::new();
    ranges.insert(EF, (64, 256));
    ranges.insert(T, (200, 1200));
    ranges.insert(NCAND_MAX, (500, 2000));
    ranges.insert(RERANK_MULT, (2, 6));
    ranges
}

/// Per-knob range clip. Idempotent; unknown keys pass through untouched;
/// missing keys stay missing.
pub fn clip_params(params: &ParamMap) -> ParamMap {
    let ranges = get_param_ranges();
    let mut clipped = params.clone();
    for (key, (lo, hi)) in ranges {
        if let Some(v) = clipped.get_mut(key) {
            *v = (*v).clamp(lo, hi);
        }
    }
    clipped
}

/// Whether every present knob is within its declared range.
pub fn is_param_valid(params: &ParamMap) -> bool {
    let ranges = get_param_ranges();
    for (key, (lo, hi)) in ranges {
        if let Some(&v) = params.get(key) {
            if v < lo || v > hi {
                return false;
            }
        }
    }
    true
}

fn check_joint_constraints(params: &ParamMap) -> Vec<Violation> {
    let mut violations = Vec::new();

    let candidate_k = params.get(NCAND_MAX).copied().unwrap_or(1000);
    let rerank_mult = params.get(RERANK_MULT).copied().unwrap_or(2);
    // rerank_mult <= 0.1 * Ncand_max, compared in integer space as 10*rerank <= candidate_k.
    if (rerank_mult as f64) > (candidate_k as f64) * 0.1 {
        violations.push(Violation::RerankGtCandidate);
    }

    let ef = params.get(EF).copied().unwrap_or(128);
    if ef > 4 * candidate_k {
        violations.push(Violation::EfGt4xCandidate);
    }

    let t = params.get(T).copied().unwrap_or(500);
    let threshold_t = (t as f64) / 1000.0;
    if !(0.0..=1.0).contains(&threshold_t) {
        violations.push(Violation::ThresholdTRange);
    }

    violations
}

/// Validate that `params` satisfies all joint constraints.
pub fn validate_joint_constraints(params: &ParamMap) -> bool {
    check_joint_constraints(params).is_empty()
}

fn fix_joint_constraints(params: &ParamMap) -> ParamMap {
    let mut fixed = params.clone();

    let candidate_k = fixed.get(NCAND_MAX).copied().unwrap_or(1000);
    if let Some(rerank_mult) = fixed.get(RERANK_MULT).copied() {
        if rerank_mult > candidate_k {
            fixed.insert(RERANK_MULT.to_string(), rerank_mult.min(candidate_k));
        }
    }

    if let Some(ef) = fixed.get(EF).copied() {
        if ef > 4 * candidate_k {
            fixed.insert(EF.to_string(), ef.min(4 * candidate_k));
        }
    }

    if let Some(t) = fixed.get(T).copied() {
        fixed.insert(T.to_string(), t.clamp(200, 1200));
    }

    fixed
}

/// Per-knob clip followed by a joint fix. `simulate_only` performs no
/// mutation and reports what *would* be clipped via `was_clipped`/`reason`.
pub fn clip_joint(params: &ParamMap, simulate_only: bool) -> (ParamMap, bool, String) {
    if simulate_only {
        let violations = check_joint_constraints(params);
        if violations.is_empty() {
            return (params.clone(), false, "VALID".to_string());
        }
        let reason = violations
            .iter()
            .map(|v| v.tag())
            .collect::<Vec<_>>()
            .join("|");
        return (
            params.clone(),
            true,
            format!("JOINT_CONSTRAINT_VIOLATION: {reason}"),
        );
    }

    let mut clipped = params.clone();
    let mut was_clipped = false;
    let mut reasons: Vec<&'static str> = Vec::new();

    for (key, (lo, hi)) in get_param_ranges() {
        if let Some(v) = clipped.get_mut(key) {
            let old = *v;
            *v = old.clamp(lo, hi);
            if *v != old {
                was_clipped = true;
                reasons.push(range_tag(key));
            }
        }
    }

    let joint_violations = check_joint_constraints(&clipped);
    if !joint_violations.is_empty() {
        clipped = fix_joint_constraints(&clipped);
        was_clipped = true;
        for v in &joint_violations {
            reasons.push(v.tag());
        }
    }

    let reason = if reasons.is_empty() {
        "NO_CLIP".to_string()
    } else {
        reasons.join("|")
    };
    (clipped, was_clipped, reason)
}

fn range_tag(key: &str) -> &'static str {
    match key {
        EF => "ef_RANGE",
        T => "T_RANGE",
        NCAND_MAX => "Ncand_max_RANGE",
        RERANK_MULT => "rerank_mult_RANGE",
        _ => "UNKNOWN_RANGE",
    }
}

/// Build a `ParamMap` from the four canonical knobs; a small convenience
/// used throughout tests and the applier.
pub fn params(ef: i64, t: i64, ncand_max: i64, rerank_mult: i64) -> ParamMap {
    let mut p = ParamMap::new();
    p.insert(EF.to_string(), ef);
    p.insert(T.to_string(), t);
    p.insert(NCAND_MAX.to_string(), ncand_max);
    p.insert(RERANK_MULT.to_string(), rerank_mult);
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_params_is_idempotent() {
        let p = params(400, 2000, 3000, 10);
        let once = clip_params(&p);
        let twice = clip_params(&once);
        assert_eq!(once, twice);
        for (key, (lo, hi)) in get_param_ranges() {
            let v = *once.get(key).unwrap();
            assert!(v >= lo && v <= hi);
        }
    }

    #[test]
    fn clip_params_passes_through_unknown_and_missing_keys() {
        let mut p = ParamMap::new();
        p.insert("unrelated_knob".to_string(), 999);
        p.insert(EF.to_string(), 128);
        let clipped = clip_params(&p);
        assert_eq!(clipped.get("unrelated_knob"), Some(&999));
        assert!(!clipped.contains_key(T));
    }

    #[test]
    fn joint_fix_is_monotone_and_idempotent() {
        let p = params(9999, 500, 1000, 9999);
        let (fixed, was_clipped, _) = clip_joint(&p, false);
        assert!(was_clipped);
        assert!(validate_joint_constraints(&fixed));
        let (fixed2, was_clipped2, _) = clip_joint(&fixed, false);
        assert!(!was_clipped2);
        assert_eq!(fixed, fixed2);
    }

    #[test]
    fn simulate_only_never_mutates() {
        let p = params(9999, 500, 1000, 9999);
        let (unchanged, was_clipped, reason) = clip_joint(&p, true);
        assert_eq!(unchanged, p);
        assert!(was_clipped);
        assert!(reason.starts_with("JOINT_CONSTRAINT_VIOLATION"));
    }

    #[test]
    fn joint_fix_does_not_touch_uninvolved_knobs() {
        let p = params(400, 500, 1000, 50);
        let (fixed, _, _) = clip_joint(&p, false);
        // rerank_mult violation (50 > 100) — wait, 0.1*1000=100 so 50 is fine.
        // Use an actually-violating rerank to check ef/T/Ncand_max stay put.
        let p2 = params(120, 500, 1000, 200);
        let (fixed2, was_clipped2, _) = clip_joint(&p2, false);
        assert!(was_clipped2);
        assert_eq!(fixed2.get(EF), Some(&120));
        assert_eq!(fixed2.get(T), Some(&500));
        assert_eq!(fixed2.get(NCAND_MAX), Some(&1000));
        assert_eq!(fixed.get(RERANK_MULT), Some(&50));
    }
}
