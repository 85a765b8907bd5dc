//! Poll state and the Vote Engine
//!
//! Handles the poll document, inbound action decoding, and the pure
//! transition rules that keep tallies consistent with per-user votes.

pub mod action;
pub mod document;
pub mod engine;

pub use action::{Action, DecodeError};
pub use document::{Document, InvariantViolation, Subject, MAX_VOTES_PER_USER};
pub use engine::{apply, evaluate, Change, Rejection};
