use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Confidence;

closed_enum! {
    pub enum LinkType {
        PotentialMatch => "POTENTIAL_MATCH",
        Sequence => "SEQUENCE",
        Refund => "REFUND",
        Reversal => "REVERSAL",
        Related => "RELATED",
    }
}

closed_enum! {
    /// Observable facts a correlation rule can require or weigh.
    pub enum CorrelationEvidenceKind {
        ReferenceMatch => "REFERENCE_MATCH",
        CorrelationIdMatch => "CORRELATION_ID_MATCH",
        LineageReference => "LINEAGE_REFERENCE",
        AmountExact => "AMOUNT_EXACT",
        AmountTolerance => "AMOUNT_TOLERANCE",
        CurrencyMatch => "CURRENCY_MATCH",
        TimeWindow => "TIME_WINDOW",
        SequenceObserved => "SEQUENCE_OBSERVED",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkEvidence {
    pub kind: CorrelationEvidenceKind,
    pub detail: String,
}

/// Directed, weighted edge between two canonical events. Never merges them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationLink {
    pub link_id: Uuid,
    /// Earlier committed event.
    pub from_event_id: Uuid,
    pub to_event_id: Uuid,
    pub link_type: LinkType,
    pub rule_id: String,
    pub rule_version: String,
    pub evidence: Vec<LinkEvidence>,
    pub confidence_score: Confidence,
    pub engine_version: String,
    pub explanation: String,
    pub created_at: DateTime<Utc>,
}

impl CorrelationLink {
    pub fn touches(&self, event_id: Uuid) -> bool {
        self.from_event_id == event_id || self.to_event_id == event_id
    }

    pub fn has_evidence(&self, kind: CorrelationEvidenceKind) -> bool {
        self.evidence.iter().any(|e| e.kind == kind)
    }
}
