use serde::{Deserialize, Serialize};

use tenon_schemas::{CauseType, Confidence, DiscrepancyType};

/// Closed set of evidence patterns a causal rule can test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CauseCondition {
    /// Fires whenever the discrepancy type matches.
    Always,
    /// Events with canonical fields left UNKNOWN (other than the event type).
    UnresolvedFields,
    /// Events whose type could not be mapped into the closed set.
    UnmappedEventType,
    /// Observations on the flow's subjects were flagged ambiguous at ingest.
    FlaggedIngest,
    /// Some event is linked to two or more counterparts by the same link type.
    CompetingLinks,
    /// Source time lags observation time by at least `min_lag_secs`.
    SourceLag { min_lag_secs: i64 },
    /// The state walk left signals unexplained or ended inconclusive.
    StateGap,
    /// One source system reported through more than one adapter version.
    AdapterVersionDrift,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CausalityRule {
    pub rule_id: String,
    pub rule_version: String,
    pub cause_type: CauseType,
    /// Discrepancy types this rule may explain. Empty means any deviation.
    #[serde(default)]
    pub applies_to: Vec<DiscrepancyType>,
    pub condition: CauseCondition,
    pub confidence_bps: Confidence,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CausalityRuleSet {
    pub model_version: String,
    /// Firing rules below this confidence are treated as absent.
    pub min_confidence_bps: Confidence,
    pub rules: Vec<CausalityRule>,
}
