use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

closed_enum! {
    /// Closed set of canonical financial event types.
    pub enum EventType {
        PaymentInitiated => "PAYMENT_INITIATED",
        PaymentAuthorized => "PAYMENT_AUTHORIZED",
        PaymentCaptured => "PAYMENT_CAPTURED",
        PaymentSettled => "PAYMENT_SETTLED",
        PaymentFailed => "PAYMENT_FAILED",
        PayoutInitiated => "PAYOUT_INITIATED",
        PayoutSettled => "PAYOUT_SETTLED",
        PayoutFailed => "PAYOUT_FAILED",
        RefundInitiated => "REFUND_INITIATED",
        RefundSettled => "REFUND_SETTLED",
        ChargebackOpened => "CHARGEBACK_OPENED",
        ChargebackWon => "CHARGEBACK_WON",
        ChargebackLost => "CHARGEBACK_LOST",
        FeeAssessed => "FEE_ASSESSED",
        AdjustmentPosted => "ADJUSTMENT_POSTED",
        ReversalPosted => "REVERSAL_POSTED",
        BalanceSnapshot => "BALANCE_SNAPSHOT",
        Unknown => "UNKNOWN",
    }
}

closed_enum! {
    pub enum Direction {
        Inbound => "IN",
        Outbound => "OUT",
        Unknown => "UNKNOWN",
    }
}

closed_enum! {
    /// How a correction or follow-up event relates to an earlier one.
    pub enum LineageType {
        DerivesFrom => "DERIVES_FROM",
        ReversalOf => "REVERSAL_OF",
        RefundOf => "REFUND_OF",
        AdjustmentOf => "ADJUSTMENT_OF",
        RelatedTo => "RELATED_TO",
    }
}

/// A value the builder either resolved or explicitly could not resolve.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolved<T> {
    Known(T),
    Unknown,
}

impl<T> Resolved<T> {
    pub fn known(&self) -> Option<&T> {
        match self {
            Resolved::Known(v) => Some(v),
            Resolved::Unknown => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Resolved::Unknown)
    }
}

impl<T> From<Option<T>> for Resolved<T> {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => Resolved::Known(v),
            None => Resolved::Unknown,
        }
    }
}

/// Reference from this event to an earlier fact, by the earlier event's source id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LineageLink {
    pub lineage_type: LineageType,
    pub target_reference: String,
    /// Raw path the reference was read from.
    pub evidence_path: String,
}

/// The single canonical shape every accepted observation is mapped into.
///
/// Immutable. A correction is a new event pointing back through `lineage_links`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub event_id: Uuid,
    pub source_system: String,
    pub source_event_id: Option<String>,
    pub external_reference: Option<String>,
    pub correlation_id: Option<String>,
    pub event_type: EventType,
    pub direction: Direction,
    /// Integer micros of the currency unit (1.00 == 1_000_000).
    pub amount_micros: Resolved<i64>,
    /// ISO-4217 shaped code.
    pub currency: Resolved<String>,
    pub observed_at: DateTime<Utc>,
    pub source_timestamp: Option<DateTime<Utc>>,
    pub raw_payload_hash: String,
    pub lineage_links: Vec<LineageLink>,
    pub normalizer_version: String,
    pub adapter_version: String,
    /// Canonical fields that could not be resolved, sorted.
    pub unknown_fields: Vec<String>,
}

impl CanonicalEvent {
    pub fn has_unknowns(&self) -> bool {
        !self.unknown_fields.is_empty()
    }

    /// Deterministic event id: derived from the idempotency key of the ACCEPT_FIRST decision.
    pub fn id_for_key(idempotency_key: &str) -> Uuid {
        crate::derive_id("canonical", &[idempotency_key])
    }
}

closed_enum! {
    pub enum MappingOutcome {
        Mapped => "MAPPED",
        FromDeclaration => "FROM_DECLARATION",
        Absent => "ABSENT",
        Unknown => "UNKNOWN",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub canonical_field: String,
    pub raw_path: Option<String>,
    pub outcome: MappingOutcome,
}

/// What the builder did to produce a canonical event. Stored alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationDiff {
    pub rule_id: String,
    pub rule_version: String,
    pub mappings: Vec<FieldMapping>,
    pub warnings: Vec<String>,
}
