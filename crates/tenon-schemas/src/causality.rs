use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Confidence;

closed_enum! {
    pub enum CauseType {
        SourceDelay => "SOURCE_DELAY",
        SourceOmission => "SOURCE_OMISSION",
        SourceDuplication => "SOURCE_DUPLICATION",
        SourceInconsistency => "SOURCE_INCONSISTENCY",
        IntegrationMappingError => "INTEGRATION_MAPPING_ERROR",
        NormalizationLoss => "NORMALIZATION_LOSS",
        CorrelationAmbiguity => "CORRELATION_AMBIGUITY",
        StateTransitionGap => "STATE_TRANSITION_GAP",
        ExternalSystemChange => "EXTERNAL_SYSTEM_CHANGE",
        UnknownCause => "UNKNOWN_CAUSE",
    }
}

/// Rule name recorded on the fallback attribution when no causal rule fires.
pub const CAUSALITY_FALLBACK_RULE: &str = "causality-engine-fallback";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CausalityAttribution {
    pub causality_id: Uuid,
    pub discrepancy_id: Uuid,
    pub cause_type: CauseType,
    pub confidence_level: Confidence,
    pub supporting_events: Vec<Uuid>,
    pub supporting_states: Vec<Uuid>,
    /// `rule_id@rule_version` of every rule behind this attribution.
    pub supporting_rules: Vec<String>,
    pub explanation: String,
    pub attributed_at: DateTime<Utc>,
    pub model_version: String,
}
