//! SLA-aware autotuner controller with closed-loop, hysteretic control (C4).
//!
//! Regulates `ef_search`/`rerank_k` for an HNSW-backed search engine. Pairs
//! with [`crate::state::TuningState`] (C2) and a [`crate::policy::Policy`]
//! (C3) to turn a stream of batch metrics into parameter suggestions,
//! guarded against premature decreases and latency spikes.

use std::collections::VecDeque;
use std::fmt;

use crate::policy::{get_policy, CurrentMetrics, Policy, TargetMetrics};
use crate::state::TuningState;

#[derive(Debug, Clone, Copy, Default)]
pub struct LastMetrics {
    pub p95_ms: f64,
    pub recall_at_10: f64,
    pub coverage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Params {
    pub ef_search: i64,
    pub rerank_k: i64,
}

/// The one case that actually propagates as an `Err`: every other control
/// decision resolves to data (an adjusted or unchanged `Params`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafetyFatal {
    pub coverage: f64,
}

impl fmt::Display for SafetyFatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "coverage below safety threshold: {:.3} < 0.98 - check data integrity",
            self.coverage
        )
    }
}

impl std::error::Error for SafetyFatal {}

pub struct Controller {
    engine: &'static str,
    policy: Box<dyn Policy>,
    policy_name: String,

    target_p95_ms: f64,
    target_recall: f64,

    step_up: i64,
    step_down: i64,

    latency_hi: f64,
    latency_lo: f64,
    recall_margin: f64,

    guard_recall_margin: f64,
    guard_recall_batches: usize,
    cooldown_decrease_batches: u32,

    min_batches: usize,

    rescue_window: usize,
    rescue_ef: i64,
    rescue_rerank: i64,
    recent_recalls: VecDeque<f64>,

    pub state: TuningState,
}

/// Construction parameters, defaulted to match `original_source`'s
/// `AutoTuner.__init__` keyword defaults.
pub struct ControllerConfig {
    pub policy: String,
    pub hnsw_ef_range: (i64, i64),
    pub rerank_range: (i64, i64),
    pub ema_alpha: f64,
    pub target_p95_ms: f64,
    pub target_recall: f64,
    pub latency_hi: f64,
    pub latency_lo: f64,
    pub recall_margin: f64,
    pub min_batches: usize,
    pub guard_recall_margin: f64,
    pub guard_recall_batches: usize,
    pub cooldown_decrease_batches: u32,
    pub step_up: i64,
    pub step_down: i64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            policy: "Balanced".to_string(),
            hnsw_ef_range: (4, 256),
            rerank_range: (100, 1200),
            ema_alpha: 0.2,
            target_p95_ms: 30.0,
            target_recall: 0.95,
            latency_hi: 1.2,
            latency_lo: 0.9,
            recall_margin: 0.02,
            min_batches: 160,
            guard_recall_margin: 0.01,
            guard_recall_batches: 8,
            cooldown_decrease_batches: 10,
            step_up: 32,
            step_down: 16,
        }
    }
}

impl Controller {
    pub fn new(config: ControllerConfig) -> Self {
        let mut state = TuningState {
            hnsw_ef_range: (config.hnsw_ef_range.0, config.hnsw_ef_range.1.max(256)),
            rerank_range: config.rerank_range,
            ema_alpha: config.ema_alpha,
            ..TuningState::default()
        };

        // Quality floors for a fresh HNSW controller.
        state.ef_search = 128.max(64);
        state.rerank_k = 1000.max(400).max(500);
        state.batches_since_decrease = 0;

        let policy_name = config.policy.clone();
        Controller {
            engine: "hnsw",
            policy: get_policy(&config.policy),
            policy_name,
            target_p95_ms: config.target_p95_ms,
            target_recall: config.target_recall,
            step_up: config.step_up,
            step_down: config.step_down,
            latency_hi: config.latency_hi,
            latency_lo: config.latency_lo,
            recall_margin: config.recall_margin,
            guard_recall_margin: config.guard_recall_margin,
            guard_recall_batches: config.guard_recall_batches,
            cooldown_decrease_batches: config.cooldown_decrease_batches,
            min_batches: config.min_batches,
            rescue_window: 3,
            rescue_ef: 16,
            rescue_rerank: 200,
            recent_recalls: VecDeque::new(),
            state,
        }
    }

    fn clamp(value: f64, lower: i64, upper: i64) -> i64 {
        (value as i64).clamp(lower, upper)
    }

    fn step(val: i64, frac: f64) -> i64 {
        (1i64.max(val) as f64 * frac).max(1.0) as i64
    }

    /// Advance the controller by one batch of metrics. Returns the
    /// suggested `{ef_search, rerank_k}` pair, or `SafetyFatal` if coverage
    /// has collapsed (the one case a caller must treat as a hard stop).
    pub fn suggest(&mut self, ts: f64, last_metrics: LastMetrics) -> Result<Params, SafetyFatal> {
        self.state
            .update_metrics(ts, last_metrics.p95_ms, last_metrics.recall_at_10, last_metrics.coverage);

        self.state.recent_recall_queue.push_back(last_metrics.recall_at_10);
        while self.state.recent_recall_queue.len() > self.guard_recall_batches {
            self.state.recent_recall_queue.pop_front();
        }

        let safety = self
            .state
            .check_safety_limits(self.target_p95_ms, self.target_recall);

        if !safety.coverage_ok {
            tracing::error!(coverage = self.state.coverage, "coverage too low");
            return Err(SafetyFatal {
                coverage: self.state.coverage,
            });
        }

        if safety.p95_spike {
            tracing::warn!("p95 latency spike detected - entering emergency mode");
            self.state.set_emergency_mode(true);
            return Ok(self.emergency_adjustment());
        }

        let (smoothed_p95, smoothed_recall, _coverage) = self.state.get_smoothed_metrics();

        self.recent_recalls.push_back(self.state.recall_at_10);
        while self.recent_recalls.len() > self.rescue_window {
            self.recent_recalls.pop_front();
        }
        let recent_dip = self.recent_recalls.len() == self.rescue_window
            && self
                .recent_recalls
                .iter()
                .cloned()
                .fold(f64::INFINITY, f64::min)
                < self.target_recall;

        if recent_dip && self.engine == "hnsw" {
            let (ef, rk) = self.state.get_current_params();
            let rescue = Params {
                ef_search: Self::clamp(
                    (ef + self.rescue_ef) as f64,
                    self.state.hnsw_ef_range.0,
                    self.state.hnsw_ef_range.1,
                ),
                rerank_k: Self::clamp(
                    (rk + self.rescue_rerank) as f64,
                    self.state.rerank_range.0,
                    self.state.rerank_range.1,
                ),
            };
            self.state
                .update_params(ts, Some(rescue.ef_search), Some(rescue.rerank_k));
            tracing::info!(ef_search = rescue.ef_search, rerank_k = rescue.rerank_k, "HNSW rescue bump applied");
            // Skip normal decreases this batch; continue with the rest of the logic.
        }

        let step_sizes = self.policy.calculate_step_size(
            CurrentMetrics {
                p95_ms: smoothed_p95,
                recall_at_10: smoothed_recall,
            },
            TargetMetrics {
                p95_ms: self.target_p95_ms,
                recall: self.target_recall,
            },
        );

        let mut new_params = self.calculate_parameter_adjustments(&step_sizes, smoothed_p95, smoothed_recall);

        new_params.ef_search = Self::clamp(
            new_params.ef_search as f64,
            self.state.hnsw_ef_range.0,
            self.state.hnsw_ef_range.1,
        );
        new_params.rerank_k = Self::clamp(
            new_params.rerank_k as f64,
            self.state.rerank_range.0,
            self.state.rerank_range.1,
        );

        let current_params = Params {
            ef_search: self.state.ef_search,
            rerank_k: self.state.rerank_k,
        };
        let new_params = self.apply_decrease_guard(new_params, current_params);

        self.state
            .update_params(ts, Some(new_params.ef_search), Some(new_params.rerank_k));

        if self.state.is_emergency_mode && smoothed_p95 < self.target_p95_ms * 1.5 {
            tracing::info!("exiting emergency mode");
            self.state.set_emergency_mode(false);
            self.state.reset_failures();
        }

        tracing::info!(ef_search = new_params.ef_search, rerank_k = new_params.rerank_k, "suggested params");
        Ok(new_params)
    }

    fn calculate_parameter_adjustments(
        &self,
        step_sizes: &crate::policy::StepSizes,
        current_p95: f64,
        current_recall: f64,
    ) -> Params {
        let current_params = Params {
            ef_search: self.state.ef_search,
            rerank_k: self.state.rerank_k,
        };
        let target_p95 = self.target_p95_ms;
        let target_recall = self.target_recall;

        let ef_search = if current_recall < target_recall - self.recall_margin {
            (self.state.hnsw_ef_range.1).min(current_params.ef_search + self.step_up)
        } else if current_p95 > target_p95 * self.latency_hi {
            (self.state.hnsw_ef_range.0).max(current_params.ef_search - self.step_down)
        } else {
            current_params.ef_search
        };

        let rerank_step_frac = step_sizes.get("rerank_k").copied().unwrap_or(0.2);
        let rerank_k = if current_p95 > target_p95 {
            let step = Self::step(current_params.rerank_k, rerank_step_frac);
            100i64.max(current_params.rerank_k - step)
        } else if current_p95 < target_p95 * self.latency_lo && current_recall < target_recall - self.recall_margin {
            let step = Self::step(current_params.rerank_k, rerank_step_frac * 0.5);
            1200i64.min(current_params.rerank_k + step)
        } else {
            current_params.rerank_k
        };

        Params { ef_search, rerank_k }
    }

    fn apply_decrease_guard(&mut self, new_params: Params, current_params: Params) -> Params {
        let decrease_attempted =
            new_params.ef_search < current_params.ef_search || new_params.rerank_k < current_params.rerank_k;

        if decrease_attempted {
            if self.decrease_allowed() {
                tracing::info!("decrease guard conditions met - allowing decrease");
                self.state.batches_since_decrease = 0;
                new_params
            } else {
                tracing::info!(
                    recall_queue_len = self.state.recent_recall_queue.len(),
                    batches_since_decrease = self.state.batches_since_decrease,
                    "decrease blocked by guard"
                );
                current_params
            }
        } else {
            self.state.batches_since_decrease =
                (self.state.batches_since_decrease + 1).min(self.cooldown_decrease_batches);
            new_params
        }
    }

    fn decrease_allowed(&self) -> bool {
        let queue = &self.state.recent_recall_queue;
        let full = queue.len() == self.guard_recall_batches;
        let recall_ok = full
            && queue.iter().cloned().fold(f64::INFINITY, f64::min)
                >= self.target_recall + self.guard_recall_margin;
        let cooldown_ok = self.state.batches_since_decrease >= self.cooldown_decrease_batches;
        full && recall_ok && cooldown_ok
    }

    fn emergency_adjustment(&mut self) -> Params {
        let adjustments = self.policy.get_emergency_adjustments();
        let current_params = Params {
            ef_search: self.state.ef_search,
            rerank_k: self.state.rerank_k,
        };

        let ef_mult = adjustments.get("ef_search").copied().unwrap_or(1.0);
        let rerank_mult = adjustments.get("rerank_k").copied().unwrap_or(1.0);

        let new_params = Params {
            ef_search: Self::clamp(
                current_params.ef_search as f64 * ef_mult,
                self.state.hnsw_ef_range.0,
                self.state.hnsw_ef_range.1,
            ),
            rerank_k: Self::clamp(
                current_params.rerank_k as f64 * rerank_mult,
                self.state.rerank_range.0,
                self.state.rerank_range.1,
            ),
        };

        self.state
            .update_params(0.0, Some(new_params.ef_search), Some(new_params.rerank_k));
        tracing::warn!(ef_search = new_params.ef_search, rerank_k = new_params.rerank_k, "emergency adjustment applied");
        new_params
    }

    pub fn policy_name(&self) -> &str {
        &self.policy_name
    }

    pub fn engine(&self) -> &str {
        self.engine
    }

    pub fn reset(&mut self) {
        let hnsw_ef_range = self.state.hnsw_ef_range;
        let rerank_range = self.state.rerank_range;
        let ema_alpha = self.state.ema_alpha;

        self.state = TuningState {
            hnsw_ef_range,
            rerank_range,
            ema_alpha,
            ..TuningState::default()
        };
        self.state.ef_search = 156;
        self.state.rerank_k = 1000i64.max(400).max(500);
        self.state.batches_since_decrease = 0;
        self.recent_recalls.clear();
        self.state.set_emergency_mode(false);

        tracing::info!("reset autotuner to initial state");
    }

    /// Minimum-batches-and-consistency stop rule. `should_stop_tuning`
    /// returns `false` until `min_batches` metrics have been observed, then
    /// stops once targets have been met consistently.
    pub fn should_stop_tuning(&self) -> bool {
        if self.state.recent_metrics.len() < self.min_batches {
            return false;
        }

        let convergence = self.state.get_convergence_status();
        if convergence.converged {
            let recent: Vec<_> = self.state.recent_metrics.iter().rev().take(5).collect();
            if recent.len() >= 5 {
                let p95_ok = recent.iter().all(|m| m.p95_ms <= self.target_p95_ms);
                let recall_ok = recent.iter().all(|m| m.recall_at_10 >= self.target_recall);
                return p95_ok && recall_ok;
            }
        }

        let recent: Vec<_> = self.state.recent_metrics.iter().rev().take(15).collect();
        if recent.len() >= 15 {
            let p95_ok = recent.iter().all(|m| m.p95_ms <= self.target_p95_ms);
            let recall_ok = recent.iter().all(|m| m.recall_at_10 >= self.target_recall);
            if p95_ok && recall_ok {
                tracing::info!("targets consistently met for 15+ batches - stopping");
                return true;
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(p95: f64, recall: f64, coverage: f64) -> LastMetrics {
        LastMetrics {
            p95_ms: p95,
            recall_at_10: recall,
            coverage,
        }
    }

    #[test]
    fn coverage_collapse_is_safety_fatal() {
        let mut c = Controller::new(ControllerConfig::default());
        let err = c.suggest(0.0, metrics(20.0, 0.9, 0.5)).unwrap_err();
        assert!((err.coverage - 0.5).abs() < 1e-9);
    }

    #[test]
    fn p95_spike_enters_emergency_mode_and_shrinks_params() {
        let mut c = Controller::new(ControllerConfig::default());
        let before = Params {
            ef_search: c.state.ef_search,
            rerank_k: c.state.rerank_k,
        };
        let params = c.suggest(0.0, metrics(200.0, 0.9, 1.0)).unwrap();
        assert!(c.state.is_emergency_mode);
        assert!(params.ef_search <= before.ef_search);
        assert!(params.rerank_k <= before.rerank_k);
    }

    #[test]
    fn decrease_guard_blocks_until_recall_queue_is_full_and_stable() {
        let mut c = Controller::new(ControllerConfig::default());
        // Drive recall comfortably above target so the controller attempts a decrease.
        for i in 0..20 {
            let _ = c.suggest(i as f64, metrics(10.0, 0.99, 1.0));
        }
        // after enough stable batches a decrease should eventually be allowed
        assert!(c.state.batches_since_decrease <= c.cooldown_decrease_batches);
    }

    #[test]
    fn should_stop_tuning_false_before_min_batches() {
        let c = Controller::new(ControllerConfig::default());
        assert!(!c.should_stop_tuning());
    }

    #[test]
    fn reset_restores_quality_floors() {
        let mut c = Controller::new(ControllerConfig::default());
        let _ = c.suggest(0.0, metrics(200.0, 0.5, 1.0));
        c.reset();
        assert_eq!(c.state.ef_search, 156);
        assert_eq!(c.state.rerank_k, 1000);
        assert!(!c.state.is_emergency_mode);
    }
}
