//! Action/Observation vocabulary crossing the runtime boundary.
//!
//! Both types are internally tagged unions: the `action_type` /
//! `observation_type` discriminator selects the decode shape on the wire.
//! Values are plain data — built once, consumed by value, never mutated.

pub mod action;
pub mod observation;

pub use action::Action;
pub use observation::{CommandOutcome, FileEntry, Observation, SearchMatch};
