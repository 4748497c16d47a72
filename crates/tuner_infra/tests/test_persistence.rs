//! Atomic snapshot persistence tests (spec.md §6 on-disk format, §4.8 write
//! protocol).

use tuner_core::controller::{Controller, ControllerConfig, LastMetrics};
use tuner_infra::persistence::{record_to_state, state_to_record, Snapshot, SnapshotStore};

fn scratch_dir(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("tuner_infra_test_{}_{}", std::process::id(), name))
}

#[test]
fn save_then_load_round_trips_controller_state() {
    let dir = scratch_dir("roundtrip");
    let store = SnapshotStore::new(dir.join("state.json"));

    let mut controller = Controller::new(ControllerConfig::default());
    let _ = controller.suggest(
        0.0,
        LastMetrics {
            p95_ms: 45.0,
            recall_at_10: 0.9,
            coverage: 1.0,
        },
    );

    let snapshot = Snapshot {
        ts: 0.0,
        policy: controller.policy_name().to_string(),
        state: state_to_record(&controller.state),
    };
    store.save(&snapshot).expect("save must succeed");

    let loaded = store.load().expect("load must succeed").expect("file must exist");
    assert_eq!(loaded.policy, "Balanced");
    assert_eq!(loaded.state.ef_search, controller.state.ef_search);
    assert_eq!(loaded.state.rerank_k, controller.state.rerank_k);
    assert_eq!(loaded.state.recent_metrics.len(), controller.state.recent_metrics.len());

    let restored = record_to_state(&loaded.state);
    assert_eq!(restored.ef_search, controller.state.ef_search);
    assert_eq!(restored.history_len, controller.state.history_len);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn a_second_save_overwrites_the_first_via_rename() {
    let dir = scratch_dir("overwrite");
    let path = dir.join("state.json");
    let store = SnapshotStore::new(&path);

    let controller = Controller::new(ControllerConfig::default());
    let first = Snapshot {
        ts: 0.0,
        policy: "Balanced".to_string(),
        state: state_to_record(&controller.state),
    };
    store.save(&first).unwrap();

    let second = Snapshot {
        ts: 1.0,
        policy: "LatencyFirst".to_string(),
        state: state_to_record(&controller.state),
    };
    store.save(&second).unwrap();

    let reloaded = store.load().unwrap().unwrap();
    assert_eq!(reloaded.policy, "LatencyFirst");
    assert!((reloaded.ts - 1.0).abs() < 1e-9);

    // The rename leaves no stray tmp file behind.
    let tmp_path = path.with_extension("tmp");
    assert!(!tmp_path.exists());

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn missing_snapshot_file_loads_as_none() {
    let dir = scratch_dir("missing");
    let store = SnapshotStore::new(dir.join("nope.json"));
    assert!(store.load().unwrap().is_none());
}

#[test]
fn history_and_emergency_flags_survive_the_snapshot_boundary() {
    let dir = scratch_dir("history_roundtrip");
    let store = SnapshotStore::new(dir.join("state.json"));

    let mut controller = Controller::new(ControllerConfig::default());
    for i in 0..5 {
        let _ = controller.suggest(
            i as f64,
            LastMetrics {
                p95_ms: 200.0,
                recall_at_10: 0.5,
                coverage: 1.0,
            },
        );
    }
    assert!(controller.state.is_emergency_mode);

    let snapshot = Snapshot {
        ts: 5.0,
        policy: controller.policy_name().to_string(),
        state: state_to_record(&controller.state),
    };
    store.save(&snapshot).unwrap();

    let loaded = store.load().unwrap().unwrap();
    let restored = record_to_state(&loaded.state);
    assert_eq!(restored.is_emergency_mode, controller.state.is_emergency_mode);
    assert_eq!(restored.recent_metrics.len(), controller.state.recent_metrics.len());
    assert_eq!(restored.parameter_history.len(), controller.state.parameter_history.len());

    let _ = std::fs::remove_dir_all(&dir);
}
