//! Ambient configuration for the autotuner service.
//!
//! Unlike the teacher's Appendix A table (safety-critical parameters that
//! must fail-closed when missing and undefaulted), every knob here has a
//! documented default: nothing this config loads guards a safety-critical
//! gate, so resolution is fail-soft — a malformed or absent env var falls
//! back to its default with a logged warning rather than an `Err`.

use std::env;
use std::path::PathBuf;

/// One row of the env var table (spec.md §6), named the way the teacher's
/// `ConfigParam` table names its rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigParam {
    TunerPolicy,
    TunerStatePath,
    AutotunerAutosaveSec,
    MaxHistory,
    CompactEvery,
    CompactKeepEvery,
    AutotunerRps,
    MemoryRingSize,
    MemoryAlpha,
    MemoryTtlSec,
}

impl ConfigParam {
    pub fn env_var(self) -> &'static str {
        match self {
            ConfigParam::TunerPolicy => "TUNER_POLICY",
            ConfigParam::TunerStatePath => "TUNER_STATE_PATH",
            ConfigParam::AutotunerAutosaveSec => "AUTOTUNER_AUTOSAVE_SEC",
            ConfigParam::MaxHistory => "MAX_HISTORY",
            ConfigParam::CompactEvery => "COMPACT_EVERY",
            ConfigParam::CompactKeepEvery => "COMPACT_KEEP_EVERY",
            ConfigParam::AutotunerRps => "AUTOTUNER_RPS",
            ConfigParam::MemoryRingSize => "MEMORY_RING_SIZE",
            ConfigParam::MemoryAlpha => "MEMORY_ALPHA",
            ConfigParam::MemoryTtlSec => "MEMORY_TTL_SEC",
        }
    }
}

/// Resolved runtime configuration for the autotuner service and its
/// control-plane API.
#[derive(Debug, Clone)]
pub struct TunerConfig {
    pub policy: String,
    pub state_path: PathBuf,
    pub autosave_sec: u64,
    pub max_history: usize,
    pub compact_every: u64,
    pub compact_keep_every: usize,
    /// Bearer tokens accepted on `X-Autotuner-Token`; empty means auth is
    /// disabled (local/dev mode).
    pub tokens: Vec<String>,
    pub rps: u32,
    pub memory_ring_size: usize,
    pub memory_alpha: f64,
    pub memory_ttl_sec: f64,
}

impl Default for TunerConfig {
    fn default() -> Self {
        TunerConfig {
            policy: "Balanced".to_string(),
            state_path: PathBuf::from(".runs/tuner_state.json"),
            autosave_sec: 30,
            max_history: 100,
            compact_every: 100,
            compact_keep_every: 5,
            tokens: Vec::new(),
            rps: 12,
            memory_ring_size: 100,
            memory_alpha: 0.2,
            memory_ttl_sec: 900.0,
        }
    }
}

fn resolve_string(param: ConfigParam, default: String) -> String {
    match env::var(param.env_var()) {
        Ok(v) if !v.trim().is_empty() => v,
        Ok(_) => default,
        Err(_) => default,
    }
}

fn resolve_parsed<T: std::str::FromStr>(param: ConfigParam, default: T) -> T {
    match env::var(param.env_var()) {
        Ok(v) => v.trim().parse::<T>().unwrap_or_else(|_| {
            tracing::warn!(param = param.env_var(), value = %v, "failed to parse env var, using default");
            default
        }),
        Err(_) => default,
    }
}

impl TunerConfig {
    /// Resolve configuration from the environment, falling back to
    /// documented defaults for anything missing or unparseable.
    pub fn from_env() -> Self {
        let defaults = TunerConfig::default();

        // AUTOTUNER_TOKENS isn't a ConfigParam row on its own: comma-separated,
        // empty disables auth.
        let tokens: Vec<String> = env::var("AUTOTUNER_TOKENS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        TunerConfig {
            policy: resolve_string(ConfigParam::TunerPolicy, defaults.policy),
            state_path: PathBuf::from(resolve_string(
                ConfigParam::TunerStatePath,
                defaults.state_path.to_string_lossy().to_string(),
            )),
            autosave_sec: resolve_parsed(ConfigParam::AutotunerAutosaveSec, defaults.autosave_sec),
            max_history: resolve_parsed(ConfigParam::MaxHistory, defaults.max_history),
            compact_every: resolve_parsed(ConfigParam::CompactEvery, defaults.compact_every),
            compact_keep_every: resolve_parsed(ConfigParam::CompactKeepEvery, defaults.compact_keep_every),
            tokens,
            rps: resolve_parsed(ConfigParam::AutotunerRps, defaults.rps),
            memory_ring_size: resolve_parsed(ConfigParam::MemoryRingSize, defaults.memory_ring_size),
            memory_alpha: resolve_parsed(ConfigParam::MemoryAlpha, defaults.memory_alpha),
            memory_ttl_sec: resolve_parsed(ConfigParam::MemoryTtlSec, defaults.memory_ttl_sec),
        }
    }
}
