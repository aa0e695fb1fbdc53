//! tenon-evidence
//!
//! Append-only, totally ordered evidence log.
//!
//! Architectural decisions:
//! - Single linearizable append point (sequencer mutex); sequences start at 1 and are never renumbered
//! - No update / delete in the public API
//! - Every event is hash chained (`hash_prev` / `hash_self` over canonical JSON)
//! - `caused_by` may only reference already committed events
//! - Derived records carry a content key; `append_unique` makes re-derivation idempotent
//! - Scans are lazy, restartable and never hold a lock across `next()` calls
//! - Optional JSONL sink; the synced sink write is the durability point of an append
//! - One writer per log file, enforced with an exclusive advisory lock

mod chain;
mod log;
mod payload;
mod scan;
mod sink;

pub use chain::{
    compute_event_hash, replay_fingerprint, verify_jsonl, verify_jsonl_str, VerifyResult,
};
pub use log::{AppendError, Appended, EvidenceDraft, EvidenceEvent, EvidenceLog, OpenError};
pub use payload::{CanonicalCommit, EvidenceKind, EvidencePayload};
pub use scan::{Scan, ScanCriteria};
