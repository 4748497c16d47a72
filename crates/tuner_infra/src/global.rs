//! Process-wide autotuner singleton (C8), grounded in
//! `original_source/services/fiqa_api/autotuner_global.py`.
//!
//! The Python module keeps a single `_GLOBAL` dict guarded implicitly by the
//! GIL. Here the same shape — one `Controller`, its apply counters, its
//! multi-knob decider, and autosave bookkeeping — lives behind a
//! `Mutex` inside a `OnceLock`, initialized lazily on first access.

use std::sync::{Mutex, MutexGuard, OnceLock};

use tuner_core::brain::MultiKnobDecider;
use tuner_core::brain::apply::ApplyCounters;
use tuner_core::controller::{Controller, ControllerConfig, LastMetrics, Params, SafetyFatal};

use crate::config::TunerConfig;
use crate::persistence::{self, Snapshot, SnapshotStore};

/// Policy the global singleton falls back to when nothing else resolves it.
/// Differs deliberately from [`ControllerConfig::default`]'s `"Balanced"`:
/// that is a bare-constructor convenience default for direct `Controller`
/// use (tests, embedding), while the wired-up singleton mirrors
/// `_create_autotuner`'s own fallback.
const WIRING_DEFAULT_POLICY: &str = "RecallFirst";

pub struct PersistMeta {
    pub last_autosave_ts: f64,
    pub autosave_sec: u64,
}

pub struct GlobalAutotuner {
    pub controller: Controller,
    pub apply_counters: ApplyCounters,
    pub multi_knob: MultiKnobDecider,
    pub store: SnapshotStore,
    pub meta: PersistMeta,
}

impl GlobalAutotuner {
    fn bootstrap(config: &TunerConfig, now: f64) -> Self {
        let store = SnapshotStore::new(config.state_path.clone());
        let loaded = store.load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load persisted autotuner state, starting fresh");
            None
        });

        // `TunerConfig::default().policy` is "Balanced", the same generic
        // fallback `resolve_string` returns when `TUNER_POLICY` is unset; we
        // can't tell that apart from a deployment explicitly asking for
        // "Balanced". Like the `max_history == 100` sentinel above, treat an
        // unset-looking config (empty, or still at its generic default) as
        // "nothing configured" and fall through to the wiring default,
        // matching `_create_autotuner`'s own env-var-then-"RecallFirst" chain.
        let policy = loaded.as_ref().map(|s| s.policy.clone()).unwrap_or_else(|| {
            let trimmed = config.policy.trim();
            if trimmed.is_empty() || trimmed == "Balanced" {
                WIRING_DEFAULT_POLICY.to_string()
            } else {
                config.policy.clone()
            }
        });

        let mut controller = Controller::new(ControllerConfig {
            policy,
            ..ControllerConfig::default()
        });
        controller.state.max_history = config.max_history;
        controller.state.compact_every = config.compact_every;
        controller.state.compact_keep_every = config.compact_keep_every;

        if let Some(snapshot) = &loaded {
            controller.state = persistence::record_to_state(&snapshot.state);
            // Only an unmodified default max_history/compaction knob gets
            // overridden by the env-resolved value, mirroring
            // `_create_autotuner`'s sentinel check (`if state.max_history ==
            // 100`) rather than clobbering an explicitly-saved value every
            // restart.
            if controller.state.max_history == 100 {
                controller.state.max_history = config.max_history;
            }
            if controller.state.compact_every == tuner_core::state::COMPACT_EVERY {
                controller.state.compact_every = config.compact_every;
            }
            if controller.state.compact_keep_every == tuner_core::state::COMPACT_KEEP_EVERY {
                controller.state.compact_keep_every = config.compact_keep_every;
            }
            tracing::info!(
                ef_search = controller.state.ef_search,
                rerank_k = controller.state.rerank_k,
                "restored autotuner state from disk"
            );
        }

        let bootstrapped = GlobalAutotuner {
            controller,
            apply_counters: ApplyCounters::default(),
            multi_knob: MultiKnobDecider::new(),
            store,
            meta: PersistMeta {
                last_autosave_ts: now,
                autosave_sec: config.autosave_sec,
            },
        };
        if let Err(e) = bootstrapped.persist(now) {
            tracing::warn!(error = %e, "failed to persist initial autotuner snapshot");
        }
        bootstrapped
    }

    /// Advance the controller by one batch, persisting if the autosave
    /// interval has elapsed. Mirrors `_maybe_autosave` being called right
    /// after `AutoTuner.suggest_params` in the Python wiring layer.
    pub fn suggest(&mut self, ts: f64, metrics: LastMetrics) -> Result<Params, SafetyFatal> {
        let result = self.controller.suggest(ts, metrics);
        self.maybe_autosave(ts);
        result
    }

    fn should_autosave(&self, now: f64) -> bool {
        let interval = self.meta.autosave_sec as f64;
        interval <= 0.0 || now - self.meta.last_autosave_ts >= interval
    }

    fn maybe_autosave(&mut self, now: f64) {
        if !self.should_autosave(now) {
            return;
        }
        if let Err(e) = self.persist(now) {
            tracing::warn!(error = %e, "failed to autosave autotuner state");
        }
        self.meta.last_autosave_ts = now;
    }

    pub fn persist(&self, now: f64) -> Result<(), persistence::SnapshotError> {
        let snapshot = Snapshot {
            ts: now,
            policy: self.controller.policy_name().to_string(),
            state: persistence::state_to_record(&self.controller.state),
        };
        self.persist_policy_file();
        self.store.save(&snapshot)
    }

    /// Mirror the active policy name to `.runs/policy.txt`, matching
    /// `_persist_policy`. Best-effort: a write failure is logged, not
    /// propagated, since the authoritative copy lives in the snapshot JSON.
    fn persist_policy_file(&self) {
        let policy_path = self.policy_path();
        if let Some(parent) = policy_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!(error = %e, "failed to create .runs directory for policy file");
                return;
            }
        }
        let contents = format!("{}\n", self.controller.policy_name());
        if let Err(e) = std::fs::write(&policy_path, contents) {
            tracing::warn!(error = %e, "failed to persist policy file");
        }
    }

    fn policy_path(&self) -> std::path::PathBuf {
        self.store.path().with_file_name("policy.txt")
    }

    pub fn set_policy(&mut self, policy_name: &str) {
        let hnsw_ef_range = self.controller.state.hnsw_ef_range;
        let rerank_range = self.controller.state.rerank_range;
        let ema_alpha = self.controller.state.ema_alpha;
        let mut controller = Controller::new(ControllerConfig {
            policy: policy_name.to_string(),
            hnsw_ef_range,
            rerank_range,
            ema_alpha,
            ..ControllerConfig::default()
        });
        controller.state = self.controller.state.clone();
        self.controller = controller;
        tracing::info!(policy = policy_name, "autotuner policy switched");
    }

    pub fn clear_state(&self) -> Result<(), std::io::Error> {
        if self.store.path().exists() {
            std::fs::remove_file(self.store.path())?;
        }
        let policy_path = self.policy_path();
        if policy_path.exists() {
            std::fs::remove_file(policy_path)?;
        }
        Ok(())
    }

    pub fn state_summary(&self) -> StateSummary {
        let (ema_p95, ema_recall, coverage) = self.controller.state.get_smoothed_metrics();
        StateSummary {
            policy: self.controller.policy_name().to_string(),
            engine: self.controller.engine().to_string(),
            ef_search: self.controller.state.ef_search,
            rerank_k: self.controller.state.rerank_k,
            p95_ms: self.controller.state.p95_ms,
            recall_at_10: self.controller.state.recall_at_10,
            coverage,
            ema_p95_ms: ema_p95,
            ema_recall_at_10: ema_recall,
            is_emergency_mode: self.controller.state.is_emergency_mode,
            history_len: self.controller.state.history_len,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StateSummary {
    pub policy: String,
    pub engine: String,
    pub ef_search: i64,
    pub rerank_k: i64,
    pub p95_ms: f64,
    pub recall_at_10: f64,
    pub coverage: f64,
    pub ema_p95_ms: f64,
    pub ema_recall_at_10: f64,
    pub is_emergency_mode: bool,
    pub history_len: u64,
}

static GLOBAL: OnceLock<Mutex<GlobalAutotuner>> = OnceLock::new();

/// Access the process-wide autotuner, initializing it on first call from
/// `config` and any persisted snapshot on disk. `now` seeds the autosave
/// clock; this module never reads the system clock itself.
pub fn get_global_autotuner(config: &TunerConfig, now: f64) -> MutexGuard<'static, GlobalAutotuner> {
    GLOBAL
        .get_or_init(|| Mutex::new(GlobalAutotuner::bootstrap(config, now)))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Reset the singleton back to an uninitialized state so the next
/// `get_global_autotuner` call re-bootstraps from `config`/disk. Intended
/// for the `/api/autotuner/reset` route and tests.
pub fn reset_global_autotuner(config: &TunerConfig, now: f64) {
    match GLOBAL.get() {
        Some(lock) => {
            let mut guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            *guard = GlobalAutotuner::bootstrap(config, now);
        }
        None => {
            let _ = get_global_autotuner(config, now);
        }
    }
}
