//! Ambient infrastructure for the ANN search autotuner: environment
//! configuration, atomic state persistence, the process-wide singleton, the
//! `actix-web` control-plane API, and the liveness probe.

#![forbid(unsafe_code)]

pub mod api;
pub mod config;
pub mod global;
pub mod health;
pub mod persistence;

pub fn infra_bootstrapped() -> bool {
    tuner_core::crate_bootstrapped()
}
