//! tenon-state
//!
//! MoneyStateMachine: diagnostic lifecycle state of a money flow.
//!
//! Architectural decisions:
//! - Transitions are data (from, to, required, forbidden, timeout); the machine only interprets them
//! - Flow evidence is reduced to named signals through versioned maps (event type, link type,
//!   missing link evidence)
//! - The walk starts at the initial state and advances while exactly one transition is enabled
//! - More than one enabled transition is AMBIGUOUS; a walk that never leaves the initial state
//!   is UNKNOWN
//! - Every evaluation is a new record; the caller supplies the version counter
//!
//! Deterministic, pure logic. No IO, no clock: evaluation time is an input.

mod machine;
mod rules;

pub use machine::{MoneyStateMachine, StateMachineError};
pub use rules::{LinkGapSignal, TimeoutPolicy, Transition, TransitionRuleSet};
