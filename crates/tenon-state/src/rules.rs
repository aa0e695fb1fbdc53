use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use tenon_schemas::{Confidence, CorrelationEvidenceKind, EventType, LinkType, MoneyStateKind, Signal};

/// Inactivity required before a timeout transition is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutPolicy {
    /// Seconds between the flow's last observation and the evaluation time.
    pub min_inactive_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Transition {
    pub from: MoneyStateKind,
    pub to: MoneyStateKind,
    #[serde(default)]
    pub required: Vec<Signal>,
    #[serde(default)]
    pub forbidden: Vec<Signal>,
    #[serde(default)]
    pub timeout_policy: Option<TimeoutPolicy>,
    pub confidence_bps: Confidence,
    /// Version of this transition. Unset means the table's `rule_version`.
    #[serde(default)]
    pub rule_version: Option<String>,
}

/// Emits `signal` when a link of `link_type` lacks `missing` evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkGapSignal {
    pub link_type: LinkType,
    pub missing: CorrelationEvidenceKind,
    /// Only links whose two endpoints both have one of these types count. Empty means any.
    #[serde(default)]
    pub between: Vec<EventType>,
    pub signal: Signal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransitionRuleSet {
    pub machine_version: String,
    pub rule_version: String,
    pub initial_state: MoneyStateKind,
    #[serde(default)]
    pub event_signals: BTreeMap<EventType, Vec<Signal>>,
    #[serde(default)]
    pub link_signals: BTreeMap<LinkType, Vec<Signal>>,
    #[serde(default)]
    pub link_gap_signals: Vec<LinkGapSignal>,
    pub transitions: Vec<Transition>,
    pub unknown_confidence: Confidence,
    pub ambiguous_confidence: Confidence,
}
