use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

closed_enum! {
    pub enum DiscrepancyType {
        NoDiscrepancy => "NO_DISCREPANCY",
        TimingDelay => "TIMING_DELAY",
        MissingEvent => "MISSING_EVENT",
        DuplicateEvent => "DUPLICATE_EVENT",
        AmountMismatch => "AMOUNT_MISMATCH",
        CurrencyMismatch => "CURRENCY_MISMATCH",
        StatusConflict => "STATUS_CONFLICT",
        UnexpectedReversal => "UNEXPECTED_REVERSAL",
        OrphanEvent => "ORPHAN_EVENT",
        InconsistentFlow => "INCONSISTENT_FLOW",
        InsufficientEvidence => "INSUFFICIENT_EVIDENCE",
    }
}

impl DiscrepancyType {
    /// Whether the record describes an actual deviation worth attributing.
    pub fn is_deviation(&self) -> bool {
        !matches!(self, Self::NoDiscrepancy)
    }
}

closed_enum! {
    pub enum SeverityHint {
        Low => "LOW",
        Medium => "MEDIUM",
        High => "HIGH",
        Unknown => "UNKNOWN",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub discrepancy_id: Uuid,
    pub flow_id: String,
    pub discrepancy_type: DiscrepancyType,
    pub severity_hint: SeverityHint,
    pub supporting_states: Vec<Uuid>,
    pub supporting_events: Vec<Uuid>,
    pub supporting_links: Vec<Uuid>,
    pub rule_id: String,
    pub rule_version: String,
    pub explanation: String,
    pub detected_at: DateTime<Utc>,
}
