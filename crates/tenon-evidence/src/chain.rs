use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use tenon_schemas::{canonical_json, sha256_hex};

use crate::log::EvidenceEvent;

/// Hash over the canonical JSON of the event WITHOUT `hash_self`.
pub fn compute_event_hash(ev: &EvidenceEvent) -> Result<String> {
    let mut clone = ev.clone();
    clone.hash_self = None;
    let canonical = canonical_json(&clone).context("canonicalize evidence event failed")?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// Result of hash chain verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid { lines: usize },
    /// Broken at the given 1-based line / position.
    Broken { line: usize, reason: String },
}

impl VerifyResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, VerifyResult::Valid { .. })
    }
}

pub(crate) fn verify_events<'a>(events: impl Iterator<Item = &'a EvidenceEvent>) -> VerifyResult {
    let mut prev_hash: Option<String> = None;
    let mut count = 0usize;

    for (i, ev) in events.enumerate() {
        let line = i + 1;
        count += 1;

        if ev.sequence != line as u64 {
            return VerifyResult::Broken {
                line,
                reason: format!("sequence gap: expected {line}, got {}", ev.sequence),
            };
        }
        if ev.hash_prev != prev_hash {
            return VerifyResult::Broken {
                line,
                reason: format!(
                    "hash_prev mismatch: expected {:?}, got {:?}",
                    prev_hash, ev.hash_prev
                ),
            };
        }
        let Some(claimed) = ev.hash_self.as_ref() else {
            return VerifyResult::Broken {
                line,
                reason: "hash_self missing".to_string(),
            };
        };
        let recomputed = match compute_event_hash(ev) {
            Ok(h) => h,
            Err(e) => {
                return VerifyResult::Broken {
                    line,
                    reason: format!("cannot recompute hash: {e:#}"),
                }
            }
        };
        if *claimed != recomputed {
            return VerifyResult::Broken {
                line,
                reason: format!("hash_self mismatch: claimed {claimed}, recomputed {recomputed}"),
            };
        }
        prev_hash = ev.hash_self.clone();
    }

    VerifyResult::Valid { lines: count }
}

/// Verify a JSONL evidence file.
pub fn verify_jsonl(path: impl AsRef<Path>) -> Result<VerifyResult> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read evidence log {:?}", path.as_ref()))?;
    verify_jsonl_str(&content)
}

/// Same as [`verify_jsonl`] over in-memory JSONL content.
pub fn verify_jsonl_str(content: &str) -> Result<VerifyResult> {
    let mut events = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let ev: EvidenceEvent = serde_json::from_str(trimmed)
            .with_context(|| format!("parse evidence event at line {}", i + 1))?;
        events.push(ev);
    }
    Ok(verify_events(events.iter()))
}

/// Fingerprint of a derivation run: `sha256(engine_version | id1;id2;...)`.
///
/// Ids are taken in the order given; callers pass them in log order.
pub fn replay_fingerprint<I, S>(engine_version: &str, ids: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let joined = ids
        .into_iter()
        .map(|s| s.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(";");
    sha256_hex(format!("{engine_version}|{joined}").as_bytes())
}
