use serde::{Deserialize, Serialize};

use tenon_schemas::{DiscrepancyType, EventType, LinkType, MoneyStateKind, SeverityHint, Signal};

/// Closed set of conditions a discrepancy rule can be written against.
///
/// List-valued filters are "any" when empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Condition {
    /// A link whose two endpoints carry different known amounts.
    AmountMismatch {
        #[serde(default)]
        link_types: Vec<LinkType>,
    },
    /// A link whose two endpoints carry different known currencies.
    CurrencyMismatch {
        #[serde(default)]
        link_types: Vec<LinkType>,
    },
    /// Two distinct events with the same source, type, reference, amount and currency.
    DuplicateEvent,
    /// The state walk ended AMBIGUOUS.
    StatusConflict,
    /// A reversal-type event while the state is not one of `unless_states`.
    UnexpectedReversal {
        event_types: Vec<EventType>,
        #[serde(default)]
        unless_states: Vec<MoneyStateKind>,
    },
    /// A lone, unlinked event older than `min_age_secs`.
    Orphan { min_age_secs: i64 },
    /// A linked flow stuck in a non-final state for at least `min_inactive_secs`.
    MissingEvent { min_inactive_secs: i64 },
    /// A final flow whose events span more than `max_span_secs` of source time.
    TimingDelay { max_span_secs: i64 },
    /// Signals the state walk could not place.
    UnconsumedSignals {
        #[serde(default)]
        signals: Vec<Signal>,
    },
    /// The state is one of `states`.
    StateIn { states: Vec<MoneyStateKind> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscrepancyRule {
    pub rule_id: String,
    pub rule_version: String,
    pub discrepancy_type: DiscrepancyType,
    pub severity_hint: SeverityHint,
    pub condition: Condition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscrepancyRuleSet {
    pub classifier_version: String,
    /// Version stamped on INSUFFICIENT_EVIDENCE records.
    pub rule_version: String,
    pub rules: Vec<DiscrepancyRule>,
}
