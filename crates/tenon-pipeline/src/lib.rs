//! tenon-pipeline
//!
//! Wires the engines to the evidence log: ingestion, derivation, replay and queries.
//!
//! Architectural decisions:
//! - Write order per observation: INGEST_RECORDED -> guardian decision -> canonical commit
//!   (permit required) or REJECTION_RECORDED
//! - Malformed observations are refused before anything is written
//! - Derivation reads only canonical commits, decisions and watermarks; its own outputs
//!   are never inputs
//! - Each input event is derived to completion before the next (batch independent)
//! - Evaluation time is max(latest observation in the flow, latest watermark); no wall clock
//! - Derived records go through `append_unique`; re-running a deriver writes nothing twice
//! - Replay re-runs ingest records, decisions and effects in source log order, raw bytes from the raw store

mod derive;
mod ingest;
mod pipeline;
mod projection;
mod raw_store;
mod replay;
mod time;

pub use derive::{DeriveError, DeriveReport, Deriver};
pub use ingest::{Decided, IngestError, IngestReport, Ingestor, Recorded};
pub use pipeline::Pipeline;
pub use projection::{DiscrepancyView, EventView, EvidenceRef, FlowView, Projection};
pub use raw_store::{observe, FsRawStore, MemoryRawStore, RawReceipt, RawStore};
pub use replay::{replay, DerivedRecords, ReplayOutcome, ReplayReport};
pub use time::{FixedTime, SystemTime, TimeSource};
