use tenon_schemas::{canonical_json, sha256_hex, IdempotencyScope, PayloadFormat};

/// Inputs of one guardian decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRequest {
    pub scope: IdempotencyScope,
    pub source_identity: String,
    pub subject: String,
    pub payload_hash: String,
    pub rule_version: String,
}

impl IdempotencyRequest {
    pub fn key(&self) -> String {
        idempotency_key(
            self.scope,
            &self.source_identity,
            &self.subject,
            &self.payload_hash,
            &self.rule_version,
        )
    }

    /// Identity of the logical fact, independent of its payload.
    pub(crate) fn subject_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.scope, self.source_identity, self.subject, self.rule_version
        )
    }
}

pub fn idempotency_key(
    scope: IdempotencyScope,
    source_identity: &str,
    subject: &str,
    payload_hash: &str,
    rule_version: &str,
) -> String {
    let material =
        format!("tenon.idem|{scope}|{source_identity}|{subject}|{payload_hash}|{rule_version}");
    sha256_hex(material.as_bytes())
}

/// Hash used for idempotency. JSON payloads are hashed in canonical form so a retry
/// that only reorders keys is still the same payload.
pub fn payload_hash(format: PayloadFormat, payload_raw: &str) -> String {
    if format == PayloadFormat::Json {
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(payload_raw) {
            if let Ok(canonical) = canonical_json(&v) {
                return sha256_hex(canonical.as_bytes());
            }
        }
    }
    sha256_hex(payload_raw.as_bytes())
}

/// Strongest declared identity of the observed fact:
/// source event id, then external reference, then the payload itself.
pub fn subject_descriptor(
    source_event_id: Option<&str>,
    external_reference: Option<&str>,
    payload_hash: &str,
) -> String {
    if let Some(sid) = source_event_id {
        return format!("sid:{sid}");
    }
    if let Some(r) = external_reference {
        return format!("ref:{r}");
    }
    format!("raw:{payload_hash}")
}
