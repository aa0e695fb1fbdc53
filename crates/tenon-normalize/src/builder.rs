use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use tenon_schemas::{
    CanonicalEvent, Direction, EventType, FieldMapping, IngestDeclaration, LineageLink,
    MappingOutcome, NormalizationDiff, PayloadFormat, Resolved,
};

use crate::amount::{amount_to_micros, currency_code};
use crate::rules::{NormalizationRule, RuleSignature};
use crate::NORMALIZER_VERSION;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Everything the builder may depend on. Nothing else (no clock, no lookups).
#[derive(Debug, Clone, Copy)]
pub struct BuildInput<'a> {
    pub declaration: &'a IngestDeclaration,
    pub idempotency_key: &'a str,
    pub raw_payload_hash: &'a str,
    /// When the core received the observation (from the ingest record).
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub event: CanonicalEvent,
    pub diff: NormalizationDiff,
}

/// Hard failures. Everything softer becomes UNKNOWN plus a warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    DuplicateRule(RuleSignature),
    NoRule(RuleSignature),
    UnsupportedFormat(PayloadFormat),
    UnparseablePayload(String),
    /// Rule violation: strict rule saw an event type outside the closed enum.
    EventTypeOutsideClosedSet { rule_id: String, value: String },
    /// Rule violation: lineage pointing at the event itself.
    SelfLineage { rule_id: String, reference: String },
}

impl NormalizeError {
    /// Stable code recorded on rejection evidence.
    pub fn reason_code(&self) -> &'static str {
        match self {
            NormalizeError::DuplicateRule(_) => "DUPLICATE_RULE",
            NormalizeError::NoRule(_) => "NO_RULE",
            NormalizeError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            NormalizeError::UnparseablePayload(_) => "UNPARSEABLE_PAYLOAD",
            NormalizeError::EventTypeOutsideClosedSet { .. } => "EVENT_TYPE_OUTSIDE_CLOSED_SET",
            NormalizeError::SelfLineage { .. } => "SELF_LINEAGE",
        }
    }
}

impl fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizeError::DuplicateRule(sig) => {
                write!(f, "two normalization rules share signature {sig:?}")
            }
            NormalizeError::NoRule(sig) => write!(f, "no normalization rule for {sig:?}"),
            NormalizeError::UnsupportedFormat(fmt_) => {
                write!(f, "payload format {fmt_} has no structured reader")
            }
            NormalizeError::UnparseablePayload(e) => write!(f, "payload does not parse: {e}"),
            NormalizeError::EventTypeOutsideClosedSet { rule_id, value } => write!(
                f,
                "rule {rule_id}: event type '{value}' is outside the closed set"
            ),
            NormalizeError::SelfLineage { rule_id, reference } => write!(
                f,
                "rule {rule_id}: lineage reference '{reference}' points at the event itself"
            ),
        }
    }
}

impl std::error::Error for NormalizeError {}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Registry of normalization rules, selected by exact signature.
#[derive(Debug, Clone, Default)]
pub struct CanonicalEventBuilder {
    rules: BTreeMap<RuleSignature, NormalizationRule>,
}

impl CanonicalEventBuilder {
    pub fn new(rules: impl IntoIterator<Item = NormalizationRule>) -> Result<Self, NormalizeError> {
        let mut map = BTreeMap::new();
        for rule in rules {
            let sig = rule.signature();
            if map.contains_key(&sig) {
                return Err(NormalizeError::DuplicateRule(sig));
            }
            map.insert(sig, rule);
        }
        Ok(Self { rules: map })
    }

    pub fn rules(&self) -> impl Iterator<Item = &NormalizationRule> {
        self.rules.values()
    }

    pub fn select(&self, declaration: &IngestDeclaration) -> Result<&NormalizationRule, NormalizeError> {
        let sig = RuleSignature {
            source_system: declaration.source_system.clone(),
            payload_format: declaration.payload_format,
            schema_hint: declaration.schema_hint.clone(),
        };
        self.rules.get(&sig).ok_or(NormalizeError::NoRule(sig))
    }

    pub fn build(&self, input: BuildInput<'_>) -> Result<Normalized, NormalizeError> {
        let rule = self.select(input.declaration)?;
        build_with_rule(rule, input)
    }
}

struct Mapper<'a> {
    root: &'a Value,
    mappings: Vec<FieldMapping>,
    warnings: Vec<String>,
    unknown: Vec<String>,
}

impl<'a> Mapper<'a> {
    /// Read a mapped path. Records ABSENT when the rule has no path or the payload lacks it.
    fn read(&mut self, field: &str, path: Option<&String>) -> Option<&'a Value> {
        let Some(path) = path else {
            self.record(field, None, MappingOutcome::Absent);
            return None;
        };
        match lookup(self.root, path) {
            Some(v) if !v.is_null() => Some(v),
            _ => {
                self.record(field, Some(path), MappingOutcome::Absent);
                None
            }
        }
    }

    fn record(&mut self, field: &str, path: Option<&String>, outcome: MappingOutcome) {
        self.mappings.push(FieldMapping {
            canonical_field: field.to_string(),
            raw_path: path.cloned(),
            outcome,
        });
    }

    fn unknown(&mut self, field: &str, path: Option<&String>, warning: String) {
        self.record(field, path, MappingOutcome::Unknown);
        self.unknown.push(field.to_string());
        self.warnings.push(warning);
    }
}

fn build_with_rule(rule: &NormalizationRule, input: BuildInput<'_>) -> Result<Normalized, NormalizeError> {
    let decl = input.declaration;
    if decl.payload_format != PayloadFormat::Json {
        return Err(NormalizeError::UnsupportedFormat(decl.payload_format));
    }
    let root: Value = serde_json::from_str(&decl.payload_raw)
        .map_err(|e| NormalizeError::UnparseablePayload(e.to_string()))?;

    let mut m = Mapper {
        root: &root,
        mappings: Vec::new(),
        warnings: Vec::new(),
        unknown: Vec::new(),
    };
    let paths = &rule.fields;

    // event_type
    let event_type = match m.read("event_type", paths.event_type.as_ref()) {
        None => {
            m.unknown.push("event_type".to_string());
            m.warnings.push("event_type not present in payload".to_string());
            EventType::Unknown
        }
        Some(v) => {
            let raw = scalar_text(v);
            let mapped = rule
                .event_type_map
                .get(&raw)
                .copied()
                .or_else(|| EventType::parse(&raw).filter(|t| *t != EventType::Unknown));
            match mapped {
                Some(t) => {
                    m.record("event_type", paths.event_type.as_ref(), MappingOutcome::Mapped);
                    t
                }
                None if rule.strict_event_type => {
                    return Err(NormalizeError::EventTypeOutsideClosedSet {
                        rule_id: rule.rule_id.clone(),
                        value: raw,
                    })
                }
                None => {
                    m.unknown(
                        "event_type",
                        paths.event_type.as_ref(),
                        format!("event_type '{raw}' has no mapping"),
                    );
                    EventType::Unknown
                }
            }
        }
    };

    // amount
    let amount_micros = match m.read("amount", paths.amount.as_ref()) {
        None => {
            m.unknown.push("amount".to_string());
            m.warnings.push("amount not present in payload".to_string());
            Resolved::Unknown
        }
        Some(v) => match amount_to_micros(&scalar_text(v), rule.amount_unit, rule.minor_exponent) {
            Ok(micros) => {
                m.record("amount", paths.amount.as_ref(), MappingOutcome::Mapped);
                Resolved::Known(micros)
            }
            Err(e) => {
                m.unknown("amount", paths.amount.as_ref(), e.to_string());
                Resolved::Unknown
            }
        },
    };

    // currency
    let currency = match m.read("currency", paths.currency.as_ref()) {
        None => {
            m.unknown.push("currency".to_string());
            m.warnings.push("currency not present in payload".to_string());
            Resolved::Unknown
        }
        Some(v) => {
            let raw = scalar_text(v);
            match currency_code(&raw) {
                Some(code) => {
                    m.record("currency", paths.currency.as_ref(), MappingOutcome::Mapped);
                    Resolved::Known(code)
                }
                None => {
                    m.unknown(
                        "currency",
                        paths.currency.as_ref(),
                        format!("currency '{raw}' is not an ISO-4217 code"),
                    );
                    Resolved::Unknown
                }
            }
        }
    };

    // direction
    let direction = match m.read("direction", paths.direction.as_ref()) {
        None => {
            m.unknown.push("direction".to_string());
            Direction::Unknown
        }
        Some(v) => {
            let raw = scalar_text(v);
            let mapped = rule
                .direction_map
                .get(&raw)
                .copied()
                .or_else(|| Direction::parse(&raw).filter(|d| *d != Direction::Unknown));
            match mapped {
                Some(d) => {
                    m.record("direction", paths.direction.as_ref(), MappingOutcome::Mapped);
                    d
                }
                None => {
                    m.unknown(
                        "direction",
                        paths.direction.as_ref(),
                        format!("direction '{raw}' has no mapping"),
                    );
                    Direction::Unknown
                }
            }
        }
    };

    // external_reference: declared value wins over the payload
    let external_reference = match &decl.external_reference {
        Some(r) => {
            m.record("external_reference", None, MappingOutcome::FromDeclaration);
            Some(r.clone())
        }
        None => m
            .read("external_reference", paths.external_reference.as_ref())
            .map(|v| {
                m.mappings.push(FieldMapping {
                    canonical_field: "external_reference".to_string(),
                    raw_path: paths.external_reference.clone(),
                    outcome: MappingOutcome::Mapped,
                });
                scalar_text(v)
            }),
    };

    let correlation_id = m
        .read("correlation_id", paths.correlation_id.as_ref())
        .map(scalar_text);
    if correlation_id.is_some() {
        m.record("correlation_id", paths.correlation_id.as_ref(), MappingOutcome::Mapped);
    }

    // source_timestamp: declared value wins over the payload
    let ts_raw = match &decl.source_timestamp {
        Some(t) => {
            m.record("source_timestamp", None, MappingOutcome::FromDeclaration);
            Some(t.clone())
        }
        None => m
            .read("source_timestamp", paths.source_timestamp.as_ref())
            .map(scalar_text),
    };
    let source_timestamp = match ts_raw {
        None => None,
        Some(raw) => match DateTime::parse_from_rfc3339(raw.trim()) {
            Ok(t) => {
                if decl.source_timestamp.is_none() {
                    m.record(
                        "source_timestamp",
                        paths.source_timestamp.as_ref(),
                        MappingOutcome::Mapped,
                    );
                }
                Some(t.with_timezone(&Utc))
            }
            Err(_) => {
                m.unknown(
                    "source_timestamp",
                    paths.source_timestamp.as_ref(),
                    format!("source_timestamp '{raw}' is not RFC 3339"),
                );
                None
            }
        },
    };

    // lineage
    let mut lineage_links = Vec::new();
    for lp in &rule.lineage {
        let Some(v) = lookup(&root, &lp.path).filter(|v| !v.is_null()) else {
            continue;
        };
        let reference = scalar_text(v);
        if decl.source_event_id.as_deref() == Some(reference.as_str()) {
            return Err(NormalizeError::SelfLineage {
                rule_id: rule.rule_id.clone(),
                reference,
            });
        }
        m.record("lineage_links", Some(&lp.path), MappingOutcome::Mapped);
        lineage_links.push(LineageLink {
            lineage_type: lp.lineage_type,
            target_reference: reference,
            evidence_path: lp.path.clone(),
        });
    }
    lineage_links.sort();
    lineage_links.dedup();

    let mut unknown_fields = m.unknown;
    unknown_fields.sort();
    unknown_fields.dedup();

    let event = CanonicalEvent {
        event_id: CanonicalEvent::id_for_key(input.idempotency_key),
        source_system: decl.source_system.clone(),
        source_event_id: decl.source_event_id.clone(),
        external_reference,
        correlation_id,
        event_type,
        direction,
        amount_micros,
        currency,
        observed_at: input.observed_at,
        source_timestamp,
        raw_payload_hash: input.raw_payload_hash.to_string(),
        lineage_links,
        normalizer_version: format!("{NORMALIZER_VERSION}/{}@{}", rule.rule_id, rule.rule_version),
        adapter_version: decl.adapter_version.clone(),
        unknown_fields,
    };

    Ok(Normalized {
        event,
        diff: NormalizationDiff {
            rule_id: rule.rule_id.clone(),
            rule_version: rule.rule_version.clone(),
            mappings: m.mappings,
            warnings: m.warnings,
        },
    })
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Dot-path lookup. Numeric segments index arrays.
fn lookup<'v>(root: &'v Value, path: &str) -> Option<&'v Value> {
    let mut cur = root;
    for seg in path.split('.') {
        cur = match cur {
            Value::Object(map) => map.get(seg)?,
            Value::Array(arr) => arr.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

/// Text form of a scalar. Numbers keep their JSON rendering (no float round trip).
fn scalar_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
