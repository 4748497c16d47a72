//! Data contracts for the Brain decider (C5).

use crate::params::ParamMap;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slo {
    pub p95_ms: f64,
    pub recall_at10: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Guards {
    pub cooldown: bool,
    pub stable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    Sequential,
    Atomic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Noop,
    BumpEf,
    DropEf,
    BumpT,
    DropT,
    BumpRerank,
    DropRerank,
    BumpNcand,
    DropNcand,
    Rollback,
    MultiKnob,
}

/// A tuning decision. `step` carries the single-knob adjustment magnitude
/// (signed); `updates` carries the multi-knob bundle when `kind ==
/// MultiKnob`.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub kind: ActionKind,
    pub step: f64,
    pub reason: String,
    pub age_sec: f64,
    pub updates: Option<BTreeMap<String, f64>>,
    pub mode: ApplyMode,
}

impl Action {
    pub fn noop(reason: &str) -> Self {
        Action {
            kind: ActionKind::Noop,
            step: 0.0,
            reason: reason.to_string(),
            age_sec: 0.0,
            updates: None,
            mode: ApplyMode::Sequential,
        }
    }

    pub fn single(kind: ActionKind, step: f64, reason: &str) -> Self {
        Action {
            kind,
            step,
            reason: reason.to_string(),
            age_sec: 0.0,
            updates: None,
            mode: ApplyMode::Sequential,
        }
    }
}

/// Full decision input: current performance, current knob values, SLO
/// targets, hysteresis guards, and the anti-oscillation bookkeeping
/// (`last_action`/`adjustment_count`).
#[derive(Debug, Clone)]
pub struct TuningInput {
    pub p95_ms: f64,
    pub recall_at10: f64,
    pub qps: f64,
    pub params: ParamMap,
    pub slo: Slo,
    pub guards: Guards,
    pub near_t: bool,
    pub last_action: Option<Action>,
    pub adjustment_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemorySample {
    pub bucket_id: String,
    pub ef: i64,
    pub t: i64,
    pub ncand_max: i64,
    pub p95_ms: f64,
    pub recall_at10: f64,
    pub ts: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweetSpot {
    pub ef: i64,
    pub t: i64,
    pub meets_slo: bool,
    pub age_s: f64,
    pub ewma_p95: f64,
    pub ewma_recall: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiKnobStatus {
    Applied,
    Rejected,
    RolledBack,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiKnobResult {
    pub status: MultiKnobStatus,
    pub params_before: ParamMap,
    pub params_after: ParamMap,
    pub updates_applied: BTreeMap<String, f64>,
    pub clipped: bool,
    pub clipped_reason: String,
    pub rollback_snapshot: Option<ParamMap>,
    pub rejection_reason: String,
}

impl MultiKnobResult {
    pub fn rejected(params_before: ParamMap, reason: &str) -> Self {
        MultiKnobResult {
            status: MultiKnobStatus::Rejected,
            params_after: params_before.clone(),
            params_before,
            updates_applied: BTreeMap::new(),
            clipped: false,
            clipped_reason: String::new(),
            rollback_snapshot: None,
            rejection_reason: reason.to_string(),
        }
    }
}
