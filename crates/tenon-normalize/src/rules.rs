use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use tenon_schemas::{Direction, EventType, LineageType, PayloadFormat};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AmountUnit {
    #[default]
    Major,
    Minor,
}

/// Dot paths into the raw payload (`data.amount`, `items.0.id`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldPaths {
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub external_reference: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub source_timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LineagePath {
    pub path: String,
    pub lineage_type: LineageType,
}

/// One versioned mapping table for one source signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NormalizationRule {
    pub rule_id: String,
    pub rule_version: String,
    pub source_system: String,
    pub payload_format: PayloadFormat,
    #[serde(default)]
    pub schema_hint: Option<String>,
    pub fields: FieldPaths,
    #[serde(default)]
    pub amount_unit: AmountUnit,
    #[serde(default = "default_minor_exponent")]
    pub minor_exponent: u32,
    /// Raw event-type value -> canonical type.
    #[serde(default)]
    pub event_type_map: BTreeMap<String, EventType>,
    #[serde(default)]
    pub direction_map: BTreeMap<String, Direction>,
    /// When set, an event type outside the closed set rejects the observation
    /// instead of mapping to UNKNOWN.
    #[serde(default)]
    pub strict_event_type: bool,
    #[serde(default)]
    pub lineage: Vec<LineagePath>,
}

fn default_minor_exponent() -> u32 {
    2
}

impl NormalizationRule {
    pub fn signature(&self) -> RuleSignature {
        RuleSignature {
            source_system: self.source_system.clone(),
            payload_format: self.payload_format,
            schema_hint: self.schema_hint.clone(),
        }
    }
}

/// Exact selection key of a normalization rule.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleSignature {
    pub source_system: String,
    pub payload_format: PayloadFormat,
    pub schema_hint: Option<String>,
}
