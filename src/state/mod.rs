//! Record lifecycle state machine.
//!
//! The chart (`empty`, `loading`, `loaded.{saved,created,updated}`,
//! `deleted.*`) is static and shared by every record; each record only holds
//! its current node. Dispatch is table driven: the current node's handler
//! table is consulted first, then each parent in turn.

mod chart;
mod events;

pub use chart::{DirtyType, Flag, RecordState, StateFlags, TransitionPlan, ALL_STATES};
pub use events::{
    dispatch, exit_effects, setup_effects, Effect, LifecycleEvent, PropertyChange, RecordEvent,
};
