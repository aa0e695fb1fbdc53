use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::hashing::sha256_hex;

/// Protocol version stamped on every ingest record.
pub const INGEST_PROTOCOL_VERSION: &str = "1.0.0";

/// Upper bound for declared identifiers; longer values are malformed input.
pub const MAX_IDENTIFIER_LEN: usize = 256;

closed_enum! {
    /// Declared encoding of `payload_raw`.
    pub enum PayloadFormat {
        Json => "JSON",
        Csv => "CSV",
        Xml => "XML",
        Text => "TEXT",
    }
}

/// What an adapter hands to the core, preserved verbatim.
///
/// Unknown fields are refused at deserialization: adapters cannot declare
/// `event_type`, `state`, discrepancies or causes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestDeclaration {
    pub source_system: String,
    #[serde(default)]
    pub source_event_id: Option<String>,
    #[serde(default)]
    pub external_reference: Option<String>,
    pub payload_raw: String,
    pub payload_format: PayloadFormat,
    #[serde(default)]
    pub source_timestamp: Option<String>,
    pub adapter_version: String,
    /// Optional adapter hint used to select a normalization rule.
    #[serde(default)]
    pub schema_hint: Option<String>,
}

/// A declaration plus the raw-store receipt for its bytes.
///
/// The raw store is external; the core only checks the receipt against the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawObservation {
    pub declaration: IngestDeclaration,
    pub raw_payload_hash: String,
    pub raw_pointer: String,
}

impl RawObservation {
    /// Build an observation whose receipt is the content address of the payload
    /// (`raw:<sha256>`), which is what a content-addressed raw store hands back.
    pub fn content_addressed(declaration: IngestDeclaration) -> Self {
        let raw_payload_hash = sha256_hex(declaration.payload_raw.as_bytes());
        let raw_pointer = format!("raw:{raw_payload_hash}");
        Self {
            declaration,
            raw_payload_hash,
            raw_pointer,
        }
    }

    /// Structural validation. Failing observations never reach the guardian or the log.
    pub fn validate(&self) -> Result<(), DeclarationError> {
        let d = &self.declaration;
        require_identifier("source_system", &d.source_system)?;
        require_identifier("adapter_version", &d.adapter_version)?;
        if let Some(v) = &d.source_event_id {
            require_identifier("source_event_id", v)?;
        }
        if let Some(v) = &d.external_reference {
            require_identifier("external_reference", v)?;
        }
        if d.payload_raw.is_empty() {
            return Err(DeclarationError::EmptyField {
                field: "payload_raw",
            });
        }
        if self.raw_pointer.trim().is_empty() {
            return Err(DeclarationError::EmptyField {
                field: "raw_pointer",
            });
        }

        let computed = sha256_hex(d.payload_raw.as_bytes());
        if !computed.eq_ignore_ascii_case(self.raw_payload_hash.trim()) {
            return Err(DeclarationError::RawHashMismatch {
                declared: self.raw_payload_hash.clone(),
                computed,
            });
        }

        if d.payload_format == PayloadFormat::Json
            && serde_json::from_str::<serde_json::Value>(&d.payload_raw).is_err()
        {
            return Err(DeclarationError::UnparseablePayload {
                format: d.payload_format,
            });
        }
        Ok(())
    }
}

fn require_identifier(field: &'static str, v: &str) -> Result<(), DeclarationError> {
    if v.trim().is_empty() {
        return Err(DeclarationError::EmptyField { field });
    }
    if v.len() > MAX_IDENTIFIER_LEN {
        return Err(DeclarationError::FieldTooLong {
            field,
            len: v.len(),
        });
    }
    if v.chars().any(char::is_control) {
        return Err(DeclarationError::ControlCharacter { field });
    }
    Ok(())
}

/// Malformed adapter input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclarationError {
    EmptyField { field: &'static str },
    FieldTooLong { field: &'static str, len: usize },
    ControlCharacter { field: &'static str },
    RawHashMismatch { declared: String, computed: String },
    UnparseablePayload { format: PayloadFormat },
}

impl fmt::Display for DeclarationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclarationError::EmptyField { field } => write!(f, "field '{field}' is empty"),
            DeclarationError::FieldTooLong { field, len } => write!(
                f,
                "field '{field}' is {len} bytes (max {MAX_IDENTIFIER_LEN})"
            ),
            DeclarationError::ControlCharacter { field } => {
                write!(f, "field '{field}' contains control characters")
            }
            DeclarationError::RawHashMismatch { declared, computed } => write!(
                f,
                "raw_payload_hash mismatch: declared {declared}, computed {computed}"
            ),
            DeclarationError::UnparseablePayload { format } => {
                write!(f, "payload_raw does not parse as declared format {format}")
            }
        }
    }
}

impl std::error::Error for DeclarationError {}

/// Preserved record of one observation attempt. Written before any decision is made.
///
/// Carries the raw-store receipt, not the raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestRecord {
    pub source_system: String,
    pub source_event_id: Option<String>,
    pub external_reference: Option<String>,
    pub payload_format: PayloadFormat,
    pub source_timestamp: Option<String>,
    pub adapter_version: String,
    pub schema_hint: Option<String>,
    pub raw_payload_hash: String,
    pub raw_pointer: String,
    /// Hash used for idempotency (canonical JSON when the payload is JSON).
    pub payload_hash: String,
    pub received_at: DateTime<Utc>,
    pub ingest_protocol_version: String,
}

impl IngestRecord {
    /// Rebuild the declaration from the record and the raw bytes fetched from the raw store.
    pub fn to_declaration(&self, payload_raw: String) -> IngestDeclaration {
        IngestDeclaration {
            source_system: self.source_system.clone(),
            source_event_id: self.source_event_id.clone(),
            external_reference: self.external_reference.clone(),
            payload_raw,
            payload_format: self.payload_format,
            source_timestamp: self.source_timestamp.clone(),
            adapter_version: self.adapter_version.clone(),
            schema_hint: self.schema_hint.clone(),
        }
    }
}

closed_enum! {
    /// Pipeline stage that refused an accepted observation.
    pub enum RejectionStage {
        Normalization => "NORMALIZATION",
    }
}

/// Hard rule violation, recorded as evidence instead of being dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub stage: RejectionStage,
    pub reason_code: String,
    pub detail: String,
    pub raw_payload_hash: String,
    pub idempotency_key: String,
    pub rule_id: Option<String>,
    pub rule_version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(payload: &str) -> IngestDeclaration {
        IngestDeclaration {
            source_system: "psp".to_string(),
            source_event_id: Some("evt_1".to_string()),
            external_reference: None,
            payload_raw: payload.to_string(),
            payload_format: PayloadFormat::Json,
            source_timestamp: None,
            adapter_version: "psp-adapter/1".to_string(),
            schema_hint: None,
        }
    }

    #[test]
    fn content_addressed_observation_validates() {
        let obs = RawObservation::content_addressed(decl(r#"{"amount":"1.00"}"#));
        assert!(obs.raw_pointer.starts_with("raw:"));
        assert_eq!(obs.validate(), Ok(()));
    }

    #[test]
    fn tampered_hash_is_malformed() {
        let mut obs = RawObservation::content_addressed(decl(r#"{"amount":"1.00"}"#));
        obs.raw_payload_hash = "00".repeat(32);
        assert!(matches!(
            obs.validate(),
            Err(DeclarationError::RawHashMismatch { .. })
        ));
    }

    #[test]
    fn empty_source_system_is_malformed() {
        let mut d = decl("{}");
        d.source_system = "  ".to_string();
        let obs = RawObservation::content_addressed(d);
        assert_eq!(
            obs.validate(),
            Err(DeclarationError::EmptyField {
                field: "source_system"
            })
        );
    }

    #[test]
    fn json_format_must_parse() {
        let obs = RawObservation::content_addressed(decl("{not json"));
        assert!(matches!(
            obs.validate(),
            Err(DeclarationError::UnparseablePayload { .. })
        ));
    }

    #[test]
    fn adapter_cannot_declare_event_type() {
        let raw = r#"{
            "source_system": "psp",
            "payload_raw": "{}",
            "payload_format": "JSON",
            "adapter_version": "1",
            "event_type": "PAYMENT_SETTLED"
        }"#;
        assert!(serde_json::from_str::<IngestDeclaration>(raw).is_err());
    }
}
