//! tenon-idempotency
//!
//! The IdempotencyGuardian decides, before any effect is committed, whether a logical
//! write is the first of its kind.
//!
//! Architectural decisions:
//! - Key = sha256 over scope | source | subject | payload hash | rule version
//! - Decisions on the same key are serialized (conditional insert under one lock)
//! - Every decision, including duplicates and ambiguity flags, is itself evidence
//! - Only ACCEPT_FIRST yields an [`AcceptPermit`]; effects require the permit
//! - An accept whose effect never committed is resumed by the next retry of its key
//! - The index is a cache of the log and is rebuilt by [`IdempotencyGuardian::recover`]

mod guardian;
mod key;

pub use guardian::{AcceptPermit, GuardianError, IdempotencyGuardian, Verdict};
pub use key::{idempotency_key, payload_hash, subject_descriptor, IdempotencyRequest};
