//! Memory-driven pre-decision hook: before the ordinary rule ladder runs,
//! see whether a cached sweet spot should steer `ef` there directly (C5
//! supplement, grounded in `brain/hook.py`).

use crate::params::NCAND_MAX;

use super::contracts::{Action, ActionKind, TuningInput};
use super::memory::Memory;

/// Minimum ef gap worth acting on — smaller than the regular bump/drop step
/// (32) so memory-guided convergence is gentler than the rule-based one.
const STEP_MIN: i64 = 16;

/// Consult `mem` for a cached sweet spot and, if present and SLO-meeting,
/// return a small step toward it (or a confirming no-op if already there).
/// Returns `None` when memory has nothing useful to say, in which case the
/// caller falls through to the ordinary rule ladder.
pub fn pre_decide_with_memory(inp: &TuningInput, mem: &mut Memory, now: f64) -> Option<Action> {
    let ncand_max = inp.params.get(NCAND_MAX).copied().unwrap_or(1000);
    let bucket_id = Memory::default_bucket_of(ncand_max);

    let sweet_spot = mem.query(bucket_id, now)?;
    if !sweet_spot.meets_slo {
        return None;
    }

    let current_ef = inp.params.get(crate::params::EF).copied().unwrap_or(128);
    let sweet_ef = sweet_spot.ef;

    if (current_ef - sweet_ef).abs() > STEP_MIN {
        let (step, kind) = if current_ef < sweet_ef {
            (STEP_MIN as f64, ActionKind::BumpEf)
        } else {
            (-(STEP_MIN as f64), ActionKind::DropEf)
        };

        tracing::info!(
            bucket = bucket_id,
            sweet_ef,
            age_s = sweet_spot.age_s,
            "memory lookup matched, following sweet spot"
        );
        Some(Action::single(kind, step, "follow_memory"))
    } else {
        tracing::info!(
            bucket = bucket_id,
            sweet_ef,
            age_s = sweet_spot.age_s,
            "memory lookup matched, already at sweet spot"
        );
        Some(Action::noop("at_sweet_spot"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::contracts::{Guards, MemorySample, Slo};
    use crate::brain::memory::MemoryConfig;
    use crate::params;

    fn input(ef: i64, ncand: i64) -> TuningInput {
        TuningInput {
            p95_ms: 150.0,
            recall_at10: 0.9,
            qps: 100.0,
            params: params::params(ef, 500, ncand, 3),
            slo: Slo { p95_ms: 200.0, recall_at10: 0.85 },
            guards: Guards { cooldown: false, stable: true },
            near_t: false,
            last_action: None,
            adjustment_count: 0,
        }
    }

    #[test]
    fn no_memory_returns_none() {
        let mut mem = Memory::new(MemoryConfig::default());
        let inp = input(128, 1000);
        assert!(pre_decide_with_memory(&inp, &mut mem, 0.0).is_none());
    }

    #[test]
    fn far_from_sweet_spot_nudges_toward_it() {
        let mut mem = Memory::new(MemoryConfig::default());
        mem.observe(
            MemorySample {
                bucket_id: "medium_candidates".to_string(),
                ef: 64,
                t: 500,
                ncand_max: 1000,
                p95_ms: 150.0,
                recall_at10: 0.9,
                ts: 0.0,
            },
            0.0,
        );
        let inp = input(160, 1000);
        let action = pre_decide_with_memory(&inp, &mut mem, 1.0).unwrap();
        assert_eq!(action.kind, ActionKind::DropEf);
        assert_eq!(action.reason, "follow_memory");
    }

    #[test]
    fn close_to_sweet_spot_is_a_confirming_noop() {
        let mut mem = Memory::new(MemoryConfig::default());
        mem.observe(
            MemorySample {
                bucket_id: "medium_candidates".to_string(),
                ef: 128,
                t: 500,
                ncand_max: 1000,
                p95_ms: 150.0,
                recall_at10: 0.9,
                ts: 0.0,
            },
            0.0,
        );
        let inp = input(130, 1000);
        let action = pre_decide_with_memory(&inp, &mut mem, 1.0).unwrap();
        assert_eq!(action.reason, "at_sweet_spot");
    }
}
