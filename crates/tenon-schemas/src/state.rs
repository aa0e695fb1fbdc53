use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::Confidence;

closed_enum! {
    /// Diagnostic lifecycle state of a money flow.
    pub enum MoneyStateKind {
        Expected => "EXPECTED",
        Initiated => "INITIATED",
        Authorized => "AUTHORIZED",
        InTransit => "IN_TRANSIT",
        Settled => "SETTLED",
        Refunded => "REFUNDED",
        Reversed => "REVERSED",
        Failed => "FAILED",
        Expired => "EXPIRED",
        Ambiguous => "AMBIGUOUS",
        Unknown => "UNKNOWN",
    }
}

impl MoneyStateKind {
    /// Final states: the flow is not expected to move again.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Self::Settled | Self::Refunded | Self::Reversed | Self::Failed | Self::Expired
        )
    }

    /// States that assert no certainty about the flow.
    pub fn is_inconclusive(&self) -> bool {
        matches!(self, Self::Ambiguous | Self::Unknown)
    }
}

/// Named piece of evidence the transition table is written against
/// (e.g. `SETTLEMENT_CONFIRMATION`). Signals come from rule data, not code.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signal(pub String);

impl Signal {
    pub fn new(s: impl Into<String>) -> Self {
        Signal(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One evaluation of a flow. A new record per evaluation; history is never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyState {
    pub state_id: Uuid,
    pub flow_id: String,
    pub current_state: MoneyStateKind,
    /// 1-based count of distinct evaluations of this flow.
    pub state_version: u32,
    pub supporting_events: Vec<Uuid>,
    pub supporting_links: Vec<Uuid>,
    pub rule_version: String,
    pub machine_version: String,
    pub confidence_level: Confidence,
    pub explanation: String,
    pub evaluated_at: DateTime<Utc>,
    /// States walked from the initial state, in order.
    pub path: Vec<MoneyStateKind>,
    /// Rule version of each transition taken; `path[i + 1]` was reached under
    /// `transition_rule_versions[i]`.
    #[serde(default)]
    pub transition_rule_versions: Vec<String>,
    /// All signals present in the flow, sorted.
    pub observed_signals: Vec<Signal>,
    /// Signals the walk never used, sorted.
    pub unconsumed_signals: Vec<Signal>,
}
