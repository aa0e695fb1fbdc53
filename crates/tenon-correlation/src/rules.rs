use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use tenon_schemas::{CorrelationEvidenceKind, LineageType, LinkType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CorrelationRule {
    pub rule_id: String,
    pub rule_version: String,
    pub link_type: LinkType,
    /// All of these must be present for the rule to fire.
    #[serde(default)]
    pub required: Vec<CorrelationEvidenceKind>,
    /// Evidence weights for the score: present weight / total weight.
    pub weights: BTreeMap<CorrelationEvidenceKind, u32>,
    pub min_score_bps: u16,
    /// Relative tolerance for AMOUNT_TOLERANCE, in basis points of the larger amount.
    #[serde(default = "default_amount_tolerance_bps")]
    pub amount_tolerance_bps: u32,
    /// Maximum distance between the two events for TIME_WINDOW.
    #[serde(default = "default_time_window_secs")]
    pub time_window_secs: i64,
    /// Lineage types that count as LINEAGE_REFERENCE. Empty means any.
    #[serde(default)]
    pub lineage_types: Vec<LineageType>,
}

fn default_amount_tolerance_bps() -> u32 {
    500
}

fn default_time_window_secs() -> i64 {
    86_400
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CorrelationRuleSet {
    pub engine_version: String,
    /// Earlier events further away than this are not candidates.
    pub candidate_window_secs: i64,
    pub rules: Vec<CorrelationRule>,
}
