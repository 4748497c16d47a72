//! Pure, synchronous decision logic for the ANN search autotuner.
//!
//! Two regulator families live here side by side: [`controller`] (the
//! hysteretic `ef_search`/`rerank_k` autotuner, C2-C4) and [`brain`] (the
//! pure-function `{ef, T, Ncand_max, rerank_mult}` decider, C5-C7), sharing
//! the knob constraint model in [`params`] (C1). Neither performs I/O or
//! reads the clock; callers supply timestamps explicitly.

#![forbid(unsafe_code)]

pub mod brain;
pub mod controller;
pub mod params;
pub mod policy;
pub mod state;

pub fn crate_bootstrapped() -> bool {
    true
}
