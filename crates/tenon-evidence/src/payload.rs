use serde::{Deserialize, Serialize};
use std::fmt;

use tenon_schemas::{
    CanonicalEvent, CausalityAttribution, CorrelationLink, Discrepancy, IdempotencyRecord,
    IngestRecord, MoneyState, NormalizationDiff, Rejection, Watermark,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceKind {
    IngestRecorded,
    IdempotencyDecided,
    CanonicalEventCommitted,
    RejectionRecorded,
    CorrelationLinked,
    StateEvaluated,
    DiscrepancyDetected,
    CausalityAttributed,
    WatermarkAdvanced,
}

impl EvidenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceKind::IngestRecorded => "INGEST_RECORDED",
            EvidenceKind::IdempotencyDecided => "IDEMPOTENCY_DECIDED",
            EvidenceKind::CanonicalEventCommitted => "CANONICAL_EVENT_COMMITTED",
            EvidenceKind::RejectionRecorded => "REJECTION_RECORDED",
            EvidenceKind::CorrelationLinked => "CORRELATION_LINKED",
            EvidenceKind::StateEvaluated => "STATE_EVALUATED",
            EvidenceKind::DiscrepancyDetected => "DISCREPANCY_DETECTED",
            EvidenceKind::CausalityAttributed => "CAUSALITY_ATTRIBUTED",
            EvidenceKind::WatermarkAdvanced => "WATERMARK_ADVANCED",
        }
    }

    /// Kinds produced by derivation stages (as opposed to ingestion).
    pub fn is_derived(&self) -> bool {
        matches!(
            self,
            EvidenceKind::CorrelationLinked
                | EvidenceKind::StateEvaluated
                | EvidenceKind::DiscrepancyDetected
                | EvidenceKind::CausalityAttributed
        )
    }
}

impl fmt::Display for EvidenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A committed canonical event together with the normalization diff that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalCommit {
    pub event: CanonicalEvent,
    pub diff: NormalizationDiff,
}

/// Typed body of an evidence event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidencePayload {
    IngestRecorded(IngestRecord),
    IdempotencyDecided(IdempotencyRecord),
    CanonicalEventCommitted(CanonicalCommit),
    RejectionRecorded(Rejection),
    CorrelationLinked(CorrelationLink),
    StateEvaluated(MoneyState),
    DiscrepancyDetected(Discrepancy),
    CausalityAttributed(CausalityAttribution),
    WatermarkAdvanced(Watermark),
}

impl EvidencePayload {
    pub fn kind(&self) -> EvidenceKind {
        match self {
            EvidencePayload::IngestRecorded(_) => EvidenceKind::IngestRecorded,
            EvidencePayload::IdempotencyDecided(_) => EvidenceKind::IdempotencyDecided,
            EvidencePayload::CanonicalEventCommitted(_) => EvidenceKind::CanonicalEventCommitted,
            EvidencePayload::RejectionRecorded(_) => EvidenceKind::RejectionRecorded,
            EvidencePayload::CorrelationLinked(_) => EvidenceKind::CorrelationLinked,
            EvidencePayload::StateEvaluated(_) => EvidenceKind::StateEvaluated,
            EvidencePayload::DiscrepancyDetected(_) => EvidenceKind::DiscrepancyDetected,
            EvidencePayload::CausalityAttributed(_) => EvidenceKind::CausalityAttributed,
            EvidencePayload::WatermarkAdvanced(_) => EvidenceKind::WatermarkAdvanced,
        }
    }

    /// Content key of records that must exist at most once in the log.
    ///
    /// Ingest records, decisions and watermarks are facts about attempts and are
    /// intentionally unkeyed: every attempt is kept.
    pub fn record_key(&self) -> Option<String> {
        match self {
            EvidencePayload::CanonicalEventCommitted(c) => {
                Some(format!("canonical:{}", c.event.event_id))
            }
            EvidencePayload::RejectionRecorded(r) => {
                Some(format!("rejection:{}", r.idempotency_key))
            }
            EvidencePayload::CorrelationLinked(l) => Some(format!("link:{}", l.link_id)),
            EvidencePayload::StateEvaluated(s) => Some(format!("state:{}", s.state_id)),
            EvidencePayload::DiscrepancyDetected(d) => {
                Some(format!("discrepancy:{}", d.discrepancy_id))
            }
            EvidencePayload::CausalityAttributed(c) => {
                Some(format!("causality:{}", c.causality_id))
            }
            EvidencePayload::IngestRecorded(_)
            | EvidencePayload::IdempotencyDecided(_)
            | EvidencePayload::WatermarkAdvanced(_) => None,
        }
    }
}
