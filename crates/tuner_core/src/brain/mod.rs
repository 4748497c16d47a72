//! Brain decider family (C5): pure-function knob decisions over the
//! `{ef, T, Ncand_max, rerank_mult}` space, plus its supporting memory (C7)
//! and applier (C6) pieces.

pub mod apply;
pub mod contracts;
pub mod decider;
pub mod hook;
pub mod memory;
pub mod multi_knob;

pub use contracts::{
    Action, ActionKind, ApplyMode, Guards, MemorySample, MultiKnobResult, MultiKnobStatus, Slo,
    SweetSpot, TuningInput,
};
pub use decider::{analyze_tuning_input, decide_tuning_action, Analysis};
pub use memory::{Memory, MemoryConfig};
pub use multi_knob::MultiKnobDecider;
