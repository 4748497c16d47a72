//! Exercises the process-wide autotuner singleton (C8) end to end: lazy
//! bootstrap, autosave-on-suggest, policy switching, and reset/clear.
//!
//! `GLOBAL` is a single `OnceLock` per test binary, so every assertion here
//! lives in one `#[test]` function to avoid cross-test bootstrap races.

use tuner_core::controller::LastMetrics;
use tuner_infra::config::TunerConfig;
use tuner_infra::global::{get_global_autotuner, reset_global_autotuner};

fn scratch_config() -> TunerConfig {
    let dir = std::env::temp_dir().join(format!("tuner_infra_global_test_{}", std::process::id()));
    let mut config = TunerConfig::default();
    config.state_path = dir.join("state.json");
    config.autosave_sec = 0; // autosave on every suggest, so persistence is observable immediately
    config
}

#[test]
fn singleton_bootstraps_suggests_persists_and_resets() {
    let config = scratch_config();
    let _ = std::fs::remove_dir_all(config.state_path.parent().unwrap());

    {
        let mut guard = get_global_autotuner(&config, 0.0);
        assert_eq!(guard.controller.policy_name(), "RecallFirst");
        assert_eq!(guard.controller.state.history_len, 0);
        assert_eq!(guard.controller.state.compact_every, config.compact_every);
        assert_eq!(guard.controller.state.compact_keep_every, config.compact_keep_every);

        let result = guard.suggest(
            1.0,
            LastMetrics {
                p95_ms: 40.0,
                recall_at_10: 0.95,
                coverage: 1.0,
            },
        );
        assert!(result.is_ok());
    }

    // Autosave with autosave_sec == 0 fires every suggest, so the snapshot
    // file must exist immediately after the call above.
    assert!(config.state_path.exists(), "snapshot file should exist after an autosaved suggest");

    {
        let mut guard = get_global_autotuner(&config, 2.0);
        guard.set_policy("LatencyFirst");
        assert_eq!(guard.controller.policy_name(), "LatencyFirst");
        guard.persist(2.0).expect("manual persist must succeed");

        let policy_path = guard.store.path().with_file_name("policy.txt");
        let contents = std::fs::read_to_string(&policy_path).unwrap();
        assert_eq!(contents.trim(), "LatencyFirst");
    }

    {
        let guard = get_global_autotuner(&config, 3.0);
        guard.clear_state().expect("clear_state must succeed");
        assert!(!config.state_path.exists());
    }

    // Reset re-bootstraps from (now absent) disk state, falling back to the
    // wiring default policy again since no snapshot remains to restore from.
    reset_global_autotuner(&config, 4.0);
    {
        let guard = get_global_autotuner(&config, 4.0);
        assert_eq!(guard.controller.policy_name(), "RecallFirst");
        assert_eq!(guard.controller.state.history_len, 0);
    }

    let _ = std::fs::remove_dir_all(config.state_path.parent().unwrap());
}
