//! Pluggable step-size strategies for the Controller (C3).
//!
//! Each policy turns a snapshot of current/target metrics into step-size
//! fractions for `ef_search`/`rerank_k`, and carries a fixed emergency
//! multiplier pair applied when the Controller enters emergency mode.

use std::collections::BTreeMap;

/// Smoothed metrics the policy reasons about.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentMetrics {
    pub p95_ms: f64,
    pub recall_at_10: f64,
}

/// Targets the policy compares against.
#[derive(Debug, Clone, Copy)]
pub struct TargetMetrics {
    pub p95_ms: f64,
    pub recall: f64,
}

/// Step-size fractions per knob, e.g. `{"ef_search": 0.15, "rerank_k": 0.25}`.
pub type StepSizes = BTreeMap<&'static str, f64>;

/// Emergency multipliers per knob (applied to the current value, so `0.7`
/// means "shrink to 70%").
pub type EmergencyAdjustments = BTreeMap<&'static str, f64>;

pub trait Policy: std::fmt::Debug {
    fn name(&self) -> &'static str;
    fn calculate_step_size(&self, current: CurrentMetrics, target: TargetMetrics) -> StepSizes;
    fn get_emergency_adjustments(&self) -> EmergencyAdjustments;
}

#[derive(Debug, Default)]
pub struct LatencyFirstPolicy;

impl Policy for LatencyFirstPolicy {
    fn name(&self) -> &'static str {
        "LatencyFirst"
    }

    fn calculate_step_size(&self, current: CurrentMetrics, target: TargetMetrics) -> StepSizes {
        let mut ef_search = 0.15;
        let mut rerank_k = 0.25;

        if current.p95_ms > target.p95_ms * 1.2 {
            rerank_k *= 2.0;
            ef_search *= 1.5;
        } else if current.p95_ms < target.p95_ms * 0.8 && current.recall_at_10 < target.recall - 0.05 {
            ef_search *= 0.8;
            rerank_k *= 1.2;
        }

        let mut sizes = StepSizes::new();
        sizes.insert("ef_search", ef_search);
        sizes.insert("rerank_k", rerank_k);
        sizes
    }

    fn get_emergency_adjustments(&self) -> EmergencyAdjustments {
        let mut adj = EmergencyAdjustments::new();
        adj.insert("ef_search", 0.7);
        adj.insert("rerank_k", 0.5);
        adj
    }
}

#[derive(Debug, Default)]
pub struct RecallFirstPolicy;

impl Policy for RecallFirstPolicy {
    fn name(&self) -> &'static str {
        "RecallFirst"
    }

    fn calculate_step_size(&self, current: CurrentMetrics, target: TargetMetrics) -> StepSizes {
        let mut ef_search = 0.25;
        let mut rerank_k = 0.15;

        if current.recall_at_10 < target.recall - 0.05 {
            ef_search *= 1.5;
            rerank_k *= 1.2;
        } else if current.p95_ms > target.p95_ms * 1.5 {
            rerank_k *= 1.5;
            ef_search *= 0.8;
        }

        let mut sizes = StepSizes::new();
        sizes.insert("ef_search", ef_search);
        sizes.insert("rerank_k", rerank_k);
        sizes
    }

    fn get_emergency_adjustments(&self) -> EmergencyAdjustments {
        let mut adj = EmergencyAdjustments::new();
        adj.insert("ef_search", 0.8);
        adj.insert("rerank_k", 0.6);
        adj
    }
}

#[derive(Debug, Default)]
pub struct BalancedPolicy;

impl Policy for BalancedPolicy {
    fn name(&self) -> &'static str {
        "Balanced"
    }

    fn calculate_step_size(&self, current: CurrentMetrics, target: TargetMetrics) -> StepSizes {
        let mut ef_search = 0.2;
        let mut rerank_k = 0.2;

        let p95_distance = (current.p95_ms - target.p95_ms).abs() / target.p95_ms;
        let recall_distance = (current.recall_at_10 - target.recall).abs() / target.recall;

        if p95_distance > recall_distance * 1.5 {
            rerank_k *= 1.3;
            ef_search *= 1.2;
        } else if recall_distance > p95_distance * 1.5 {
            ef_search *= 1.3;
            rerank_k *= 1.1;
        }

        let mut sizes = StepSizes::new();
        sizes.insert("ef_search", ef_search);
        sizes.insert("rerank_k", rerank_k);
        sizes
    }

    fn get_emergency_adjustments(&self) -> EmergencyAdjustments {
        let mut adj = EmergencyAdjustments::new();
        adj.insert("ef_search", 0.75);
        adj.insert("rerank_k", 0.55);
        adj
    }
}

/// Factory mirroring `original_source`'s `get_policy`: unknown names fall
/// back to `Balanced` with a logged warning rather than an error, since
/// policy selection is never safety-critical.
pub fn get_policy(policy_name: &str) -> Box<dyn Policy> {
    match policy_name {
        "LatencyFirst" => Box::new(LatencyFirstPolicy),
        "RecallFirst" => Box::new(RecallFirstPolicy),
        "Balanced" => Box::new(BalancedPolicy),
        other => {
            tracing::warn!(policy = other, "unknown policy, falling back to Balanced");
            Box::new(BalancedPolicy)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_first_escalates_when_over_target() {
        let policy = LatencyFirstPolicy;
        let current = CurrentMetrics { p95_ms: 50.0, recall_at_10: 0.9 };
        let target = TargetMetrics { p95_ms: 30.0, recall: 0.95 };
        let sizes = policy.calculate_step_size(current, target);
        assert_eq!(sizes["rerank_k"], 0.5);
        assert_eq!(sizes["ef_search"], 0.225);
    }

    #[test]
    fn unknown_policy_falls_back_to_balanced() {
        let policy = get_policy("Nonexistent");
        assert_eq!(policy.name(), "Balanced");
    }

    #[test]
    fn emergency_adjustments_shrink_not_grow() {
        for policy in [
            Box::new(LatencyFirstPolicy) as Box<dyn Policy>,
            Box::new(RecallFirstPolicy),
            Box::new(BalancedPolicy),
        ] {
            for (_, mult) in policy.get_emergency_adjustments() {
                assert!(mult > 0.0 && mult < 1.0);
            }
        }
    }
}
