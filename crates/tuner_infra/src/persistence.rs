//! Atomic on-disk snapshot persistence for the global autotuner singleton
//! (C8), grounded in the teacher's tmp-file + `fsync` + `rename` discipline
//! (`soldier_infra::store::ledger`) adapted to a single whole-file JSON
//! object rather than an append-only log.

use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use tuner_core::controller::Params;
use tuner_core::state::{MetricsSnapshot, ParamSnapshot, TuningState};

/// On-disk representation of a metrics history entry. A separate type from
/// [`MetricsSnapshot`] keeps `tuner_core` free of a `serde` dependency while
/// giving the infra layer an explicit, reviewable mapping at the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub ts: f64,
    pub p95_ms: f64,
    pub recall_at_10: f64,
    pub coverage: f64,
    pub ema_p95_ms: f64,
    pub ema_recall_at_10: f64,
    pub ef_search: i64,
    pub rerank_k: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamRecord {
    pub ts: f64,
    pub ef_search: i64,
    pub rerank_k: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateRecord {
    pub ef_search: i64,
    pub rerank_k: i64,
    pub hnsw_ef_range: (i64, i64),
    pub rerank_range: (i64, i64),
    pub ema_alpha: f64,
    pub p95_ms: f64,
    pub recall_at_10: f64,
    pub coverage: f64,
    pub ema_p95_ms: Option<f64>,
    pub ema_recall_at_10: Option<f64>,
    pub target_p95_ms: f64,
    pub target_recall: f64,
    pub target_coverage: f64,
    pub recent_metrics: Vec<MetricsRecord>,
    pub parameter_history: Vec<ParamRecord>,
    pub max_history: usize,
    pub history_len: u64,
    pub recent_recall_queue: Vec<f64>,
    pub batches_since_decrease: u32,
    pub is_emergency_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub ts: f64,
    pub policy: String,
    pub state: StateRecord,
}

pub fn state_to_record(state: &TuningState) -> StateRecord {
    StateRecord {
        ef_search: state.ef_search,
        rerank_k: state.rerank_k,
        hnsw_ef_range: state.hnsw_ef_range,
        rerank_range: state.rerank_range,
        ema_alpha: state.ema_alpha,
        p95_ms: state.p95_ms,
        recall_at_10: state.recall_at_10,
        coverage: state.coverage,
        ema_p95_ms: state.ema_p95_ms,
        ema_recall_at_10: state.ema_recall_at_10,
        target_p95_ms: state.target_p95_ms,
        target_recall: state.target_recall,
        target_coverage: state.target_coverage,
        recent_metrics: state
            .recent_metrics
            .iter()
            .map(|m: &MetricsSnapshot| MetricsRecord {
                ts: m.ts,
                p95_ms: m.p95_ms,
                recall_at_10: m.recall_at_10,
                coverage: m.coverage,
                ema_p95_ms: m.ema_p95_ms,
                ema_recall_at_10: m.ema_recall_at_10,
                ef_search: m.ef_search,
                rerank_k: m.rerank_k,
            })
            .collect(),
        parameter_history: state
            .parameter_history
            .iter()
            .map(|p: &ParamSnapshot| ParamRecord {
                ts: p.ts,
                ef_search: p.ef_search,
                rerank_k: p.rerank_k,
            })
            .collect(),
        max_history: state.max_history,
        history_len: state.history_len,
        recent_recall_queue: state.recent_recall_queue.iter().copied().collect(),
        batches_since_decrease: state.batches_since_decrease,
        is_emergency_mode: state.is_emergency_mode,
    }
}

pub fn record_to_state(record: &StateRecord) -> TuningState {
    let mut state = TuningState::new(record.max_history);
    state.ef_search = record.ef_search;
    state.rerank_k = record.rerank_k;
    state.hnsw_ef_range = record.hnsw_ef_range;
    state.rerank_range = record.rerank_range;
    state.ema_alpha = record.ema_alpha;
    state.p95_ms = record.p95_ms;
    state.recall_at_10 = record.recall_at_10;
    state.coverage = record.coverage;
    state.ema_p95_ms = record.ema_p95_ms;
    state.ema_recall_at_10 = record.ema_recall_at_10;
    state.target_p95_ms = record.target_p95_ms;
    state.target_recall = record.target_recall;
    state.target_coverage = record.target_coverage;
    state.history_len = record.history_len;
    state.batches_since_decrease = record.batches_since_decrease;
    state.is_emergency_mode = record.is_emergency_mode;

    for m in &record.recent_metrics {
        state.recent_metrics.push_back(MetricsSnapshot {
            ts: m.ts,
            p95_ms: m.p95_ms,
            recall_at_10: m.recall_at_10,
            coverage: m.coverage,
            ema_p95_ms: m.ema_p95_ms,
            ema_recall_at_10: m.ema_recall_at_10,
            ef_search: m.ef_search,
            rerank_k: m.rerank_k,
        });
    }
    for p in &record.parameter_history {
        state.parameter_history.push_back(ParamSnapshot {
            ts: p.ts,
            ef_search: p.ef_search,
            rerank_k: p.rerank_k,
        });
    }
    for r in &record.recent_recall_queue {
        state.recent_recall_queue.push_back(*r);
    }

    state
}

pub fn params_of(state: &TuningState) -> Params {
    Params {
        ef_search: state.ef_search,
        rerank_k: state.rerank_k,
    }
}

#[derive(Debug)]
pub enum SnapshotError {
    Io(std::io::Error),
    Serde(serde_json::Error),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::Io(e) => write!(f, "snapshot I/O error: {e}"),
            SnapshotError::Serde(e) => write!(f, "snapshot serialization error: {e}"),
        }
    }
}

impl std::error::Error for SnapshotError {}

impl From<std::io::Error> for SnapshotError {
    fn from(e: std::io::Error) -> Self {
        SnapshotError::Io(e)
    }
}

impl From<serde_json::Error> for SnapshotError {
    fn from(e: serde_json::Error) -> Self {
        SnapshotError::Serde(e)
    }
}

/// Whole-file JSON snapshot store with a tmp-file + `fsync` + `rename`
/// write path. A write failure leaves the previous snapshot file in place.
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SnapshotStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<Snapshot>, SnapshotError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&self.path)?;
        match serde_json::from_slice(&bytes) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                tracing::warn!(error = %e, path = %self.path.display(), "snapshot file unreadable, ignoring");
                Ok(None)
            }
        }
    }

    /// Atomically replace the snapshot file. Writes to `<path>.tmp`, fsyncs,
    /// then renames over the target; on any failure the tmp file is removed
    /// and the previous snapshot (if any) is left untouched.
    pub fn save(&self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("tmp");
        let result = (|| -> Result<(), SnapshotError> {
            let mut file = File::create(&tmp_path)?;
            let mut payload = serde_json::to_vec_pretty(snapshot)?;
            payload.push(b'\n');
            file.write_all(&payload)?;
            file.sync_all()?;
            fs::rename(&tmp_path, &self.path)?;
            Ok(())
        })();

        if result.is_err() && tmp_path.exists() {
            let _ = fs::remove_file(&tmp_path);
        }
        result
    }

    pub fn mtime_unix(&self) -> Option<f64> {
        let meta = fs::metadata(&self.path).ok()?;
        let modified = meta.modified().ok()?;
        let duration = modified.duration_since(std::time::UNIX_EPOCH).ok()?;
        Some(duration.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let dir = std::env::temp_dir().join(format!("tuner_snapshot_test_{:p}", &0));
        let path = dir.join("state.json");
        let store = SnapshotStore::new(&path);

        let mut state = TuningState::default();
        state.update_metrics(1.0, 42.0, 0.9, 1.0);
        let snapshot = Snapshot {
            ts: 1.0,
            policy: "Balanced".to_string(),
            state: state_to_record(&state),
        };

        store.save(&snapshot).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.policy, "Balanced");
        assert_eq!(loaded.state.ef_search, state.ef_search);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_file_loads_as_none() {
        let store = SnapshotStore::new("/nonexistent/path/that/does/not/exist.json");
        assert!(store.load().unwrap().is_none());
    }
}
