use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

closed_enum! {
    /// Kind of logical write a key protects.
    pub enum IdempotencyScope {
        Ingest => "INGEST",
        Canonicalize => "CANONICALIZE",
        EvidenceWrite => "EVIDENCE_WRITE",
    }
}

closed_enum! {
    pub enum IdempotencyDecision {
        AcceptFirst => "ACCEPT_FIRST",
        RejectDuplicate => "REJECT_DUPLICATE",
        FlagAmbiguous => "FLAG_AMBIGUOUS",
    }
}

/// One guardian decision. Never updated; the record is itself evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub scope: IdempotencyScope,
    pub source_identity: String,
    pub subject: String,
    pub payload_hash: String,
    pub decision: IdempotencyDecision,
    /// When the key (or, for ambiguity, the subject) was first seen.
    pub first_seen_at: DateTime<Utc>,
    pub decided_at: DateTime<Utc>,
    /// The ingest record this decision is about, then any prior decision it refers to.
    pub evidence_refs: Vec<Uuid>,
    pub rule_version: String,
    /// Payload hash of the accepted observation this one conflicts with.
    pub conflicts_with: Option<String>,
}
