//! Tuning state for the Controller/Autotuner family (C2).
//!
//! Holds raw metrics, EMA smoothers (nil-seeded: the first observation sets
//! the EMA outright rather than blending against a made-up zero), bounded
//! history of metric/parameter snapshots, and guard bookkeeping used by the
//! Controller's decrease-guard and emergency-mode logic.

use std::collections::VecDeque;

/// One recorded metrics observation, mirroring the Python `recent_metrics`
/// snapshot dict.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub ts: f64,
    pub p95_ms: f64,
    pub recall_at_10: f64,
    pub coverage: f64,
    pub ema_p95_ms: f64,
    pub ema_recall_at_10: f64,
    pub ef_search: i64,
    pub rerank_k: i64,
}

/// One recorded parameter-change snapshot, mirroring `parameter_history`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSnapshot {
    pub ts: f64,
    pub ef_search: i64,
    pub rerank_k: i64,
}

/// Every `COMPACT_EVERY` metric writes, history is thinned to every
/// `COMPACT_KEEP_EVERY`-th entry (oldest-biased), bounding memory growth
/// across long-running processes without losing trend shape.
pub const COMPACT_EVERY: u64 = 100;
pub const COMPACT_KEEP_EVERY: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct SafetyLimits {
    pub coverage_ok: bool,
    pub p95_spike: bool,
    pub recall_ok: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceStatus {
    pub converged: bool,
    pub stability_score: f64,
    pub trend: &'static str,
}

#[derive(Debug, Clone)]
pub struct TuningState {
    pub ef_search: i64,
    pub rerank_k: i64,
    pub hnsw_ef_range: (i64, i64),
    pub rerank_range: (i64, i64),

    pub p95_ms: f64,
    pub recall_at_10: f64,
    pub coverage: f64,

    pub ema_alpha: f64,
    pub ema_p95_ms: Option<f64>,
    pub ema_recall_at_10: Option<f64>,

    pub target_p95_ms: f64,
    pub target_recall: f64,
    pub target_coverage: f64,

    pub recent_metrics: VecDeque<MetricsSnapshot>,
    pub parameter_history: VecDeque<ParamSnapshot>,
    pub max_history: usize,
    /// Monotonic counter of metric writes ever performed, independent of
    /// the bounded `recent_metrics` length — persisted across compaction.
    pub history_len: u64,
    compact_count: u64,
    /// Metric writes between compaction passes; env-overridable via
    /// `COMPACT_EVERY` (defaults to [`COMPACT_EVERY`]).
    pub compact_every: u64,
    /// Stride retained by a compaction pass; env-overridable via
    /// `COMPACT_KEEP_EVERY` (defaults to [`COMPACT_KEEP_EVERY`]).
    pub compact_keep_every: usize,

    pub recent_recall_queue: VecDeque<f64>,
    pub batches_since_decrease: u32,
    pub is_emergency_mode: bool,
}

impl Default for TuningState {
    fn default() -> Self {
        TuningState {
            ef_search: 128,
            rerank_k: 200,
            hnsw_ef_range: (4, 256),
            rerank_range: (100, 1200),

            p95_ms: 0.0,
            recall_at_10: 0.0,
            coverage: 1.0,

            ema_alpha: 0.3,
            ema_p95_ms: None,
            ema_recall_at_10: None,

            target_p95_ms: 30.0,
            target_recall: 0.95,
            target_coverage: 0.98,

            recent_metrics: VecDeque::new(),
            parameter_history: VecDeque::new(),
            max_history: 100,
            history_len: 0,
            compact_count: 0,
            compact_every: COMPACT_EVERY,
            compact_keep_every: COMPACT_KEEP_EVERY,

            recent_recall_queue: VecDeque::new(),
            batches_since_decrease: 0,
            is_emergency_mode: false,
        }
    }
}

impl TuningState {
    pub fn new(max_history: usize) -> Self {
        TuningState {
            max_history,
            ..Default::default()
        }
    }

    /// Update raw metrics, advance EMAs (nil-seeded), and push a history
    /// snapshot. `ts` is passed in rather than sampled internally — this
    /// crate never reads the clock so callers (and tests) control time.
    pub fn update_metrics(&mut self, ts: f64, p95_ms: f64, recall_at_10: f64, coverage: f64) {
        self.p95_ms = p95_ms;
        self.recall_at_10 = recall_at_10;
        self.coverage = coverage;

        let alpha = self.ema_alpha;
        self.ema_p95_ms = Some(match self.ema_p95_ms {
            None => self.p95_ms,
            Some(prev) => alpha * self.p95_ms + (1.0 - alpha) * prev,
        });
        self.ema_recall_at_10 = Some(match self.ema_recall_at_10 {
            None => self.recall_at_10,
            Some(prev) => alpha * self.recall_at_10 + (1.0 - alpha) * prev,
        });

        self.recent_metrics.push_back(MetricsSnapshot {
            ts,
            p95_ms: self.p95_ms,
            recall_at_10: self.recall_at_10,
            coverage: self.coverage,
            ema_p95_ms: self.ema_p95_ms.unwrap(),
            ema_recall_at_10: self.ema_recall_at_10.unwrap(),
            ef_search: self.ef_search,
            rerank_k: self.rerank_k,
        });
        while self.recent_metrics.len() > self.max_history {
            self.recent_metrics.pop_front();
        }

        self.history_len += 1;
        self.compact_count += 1;
        if self.compact_count >= self.compact_every {
            self.compact_count = 0;
            compact(&mut self.recent_metrics, self.compact_keep_every);
            compact(&mut self.parameter_history, self.compact_keep_every);
        }
    }

    pub fn get_smoothed_metrics(&self) -> (f64, f64, f64) {
        (
            self.ema_p95_ms.unwrap_or(self.p95_ms),
            self.ema_recall_at_10.unwrap_or(self.recall_at_10),
            self.coverage,
        )
    }

    pub fn get_current_params(&self) -> (i64, i64) {
        (self.ef_search, self.rerank_k)
    }

    /// Apply a parameter update and log it in `parameter_history` if
    /// anything actually changed.
    pub fn update_params(&mut self, ts: f64, ef_search: Option<i64>, rerank_k: Option<i64>) {
        let mut updated = false;
        if let Some(v) = ef_search {
            self.ef_search = v;
            updated = true;
        }
        if let Some(v) = rerank_k {
            self.rerank_k = v;
            updated = true;
        }
        if updated {
            self.parameter_history.push_back(ParamSnapshot {
                ts,
                ef_search: self.ef_search,
                rerank_k: self.rerank_k,
            });
            while self.parameter_history.len() > self.max_history {
                self.parameter_history.pop_front();
            }
        }
    }

    pub fn check_safety_limits(&self, target_p95_ms: f64, target_recall: f64) -> SafetyLimits {
        SafetyLimits {
            coverage_ok: self.coverage >= 0.98,
            p95_spike: self.p95_ms > target_p95_ms * 3.0,
            recall_ok: self.recall_at_10 >= target_recall * 0.8,
        }
    }

    pub fn set_emergency_mode(&mut self, enabled: bool) {
        self.is_emergency_mode = enabled;
    }

    /// Stubbed per `original_source`'s own "simplified implementation" —
    /// the Python module never computes a real trend either.
    pub fn get_convergence_status(&self) -> ConvergenceStatus {
        ConvergenceStatus {
            converged: false,
            stability_score: 0.5,
            trend: "unknown",
        }
    }

    pub fn reset_failures(&mut self) {
        self.batches_since_decrease = 0;
    }
}

fn compact<T: Copy>(history: &mut VecDeque<T>, keep_every: usize) {
    let kept: Vec<T> = history
        .iter()
        .enumerate()
        .filter(|(i, _)| i % keep_every == 0)
        .map(|(_, v)| *v)
        .collect();
    history.clear();
    history.extend(kept);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_is_nil_seeded() {
        let mut s = TuningState::default();
        s.update_metrics(0.0, 40.0, 0.9, 1.0);
        assert_eq!(s.ema_p95_ms, Some(40.0));
        s.update_metrics(1.0, 20.0, 0.9, 1.0);
        assert!((s.ema_p95_ms.unwrap() - (0.3 * 20.0 + 0.7 * 40.0)).abs() < 1e-9);
    }

    #[test]
    fn history_is_bounded_by_max_history() {
        let mut s = TuningState::new(5);
        for i in 0..20 {
            s.update_metrics(i as f64, 30.0, 0.95, 1.0);
        }
        assert!(s.recent_metrics.len() <= 5);
        assert_eq!(s.history_len, 20);
    }

    #[test]
    fn compaction_thins_history_every_compact_every_writes() {
        let mut s = TuningState::new(10_000);
        for i in 0..(COMPACT_EVERY as usize) {
            s.update_metrics(i as f64, 30.0, 0.95, 1.0);
        }
        // exactly at the boundary, a compaction pass has run once
        assert!(s.recent_metrics.len() < COMPACT_EVERY as usize);
    }

    #[test]
    fn safety_limits_flag_p95_spike_and_recall_floor() {
        let mut s = TuningState::default();
        s.update_metrics(0.0, 100.0, 0.5, 0.99);
        let limits = s.check_safety_limits(30.0, 0.95);
        assert!(limits.p95_spike);
        assert!(!limits.recall_ok);
        assert!(limits.coverage_ok);
    }
}
