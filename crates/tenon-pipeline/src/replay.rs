use anyhow::{bail, Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tenon_config::LoadedRuleBook;
use tenon_evidence::{
    replay_fingerprint, EvidenceKind, EvidenceLog, EvidencePayload, ScanCriteria,
};
use tenon_schemas::{hash_canonical, RawObservation};

use crate::derive::Deriver;
use crate::ingest::{Decided, Ingestor, Recorded};
use crate::raw_store::RawStore;
use crate::time::SystemTime;

/// Derived records of a log keyed by record key (`state:<id>`, `link:<id>`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivedRecords {
    pub records: BTreeMap<String, EvidencePayload>,
}

impl DerivedRecords {
    pub fn collect(log: &EvidenceLog) -> Self {
        let criteria = ScanCriteria::all().kinds([
            EvidenceKind::CorrelationLinked,
            EvidenceKind::StateEvaluated,
            EvidenceKind::DiscrepancyDetected,
            EvidenceKind::CausalityAttributed,
        ]);
        let records = log
            .snapshot(criteria)
            .filter_map(|ev| ev.payload.record_key().map(|k| (k, ev.payload.clone())))
            .collect();
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Fingerprint over `key=payload hash`, in key order.
    pub fn fingerprint(&self, version: &str) -> Result<String> {
        let mut parts = Vec::with_capacity(self.records.len());
        for (key, payload) in &self.records {
            parts.push(format!("{key}={}", hash_canonical(payload)?));
        }
        Ok(replay_fingerprint(version, parts))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayReport {
    pub rulebook_version: String,
    pub config_hash: String,
    pub observations: usize,
    pub watermarks: usize,
    pub original_fingerprint: String,
    pub replayed_fingerprint: String,
    /// Record keys present in the original log but not produced by the replay.
    pub missing: Vec<String>,
    /// Record keys produced by the replay but absent from the original log.
    pub extra: Vec<String>,
    /// Keys present in both with different content.
    pub changed: Vec<String>,
}

impl ReplayReport {
    pub fn matches(&self) -> bool {
        self.original_fingerprint == self.replayed_fingerprint
    }
}

pub struct ReplayOutcome {
    pub report: ReplayReport,
    pub replayed: Arc<EvidenceLog>,
}

/// Re-run the write side of `source` into a fresh in-memory log, derive with `book`,
/// and compare the derived record sets.
///
/// The source is walked in sequence order: each INGEST_RECORDED is re-recorded (raw
/// bytes fetched from `raw`), each decision re-decided, and each canonical commit or
/// rejection settled at its own position. Concurrent writers that committed in a
/// different order than they decided are therefore reproduced exactly.
pub fn replay(
    source: &EvidenceLog,
    raw: &dyn RawStore,
    book: &LoadedRuleBook,
) -> Result<ReplayOutcome> {
    let engines = book.compile()?;
    let fresh = Arc::new(EvidenceLog::in_memory());
    let ingestor = Ingestor::open(
        Arc::clone(&fresh),
        engines.builder.clone(),
        engines.adapters.clone(),
        engines.idempotency_rule_version.clone(),
        Arc::new(SystemTime),
    )?;

    let mut observations = 0;
    let mut watermarks = 0;
    // Keyed by source evidence id.
    let mut recorded: HashMap<Uuid, Recorded> = HashMap::new();
    let mut owed: HashMap<Uuid, Decided> = HashMap::new();

    let criteria = ScanCriteria::all().kinds([
        EvidenceKind::IngestRecorded,
        EvidenceKind::IdempotencyDecided,
        EvidenceKind::CanonicalEventCommitted,
        EvidenceKind::RejectionRecorded,
        EvidenceKind::WatermarkAdvanced,
    ]);
    for ev in source.snapshot(criteria) {
        match &ev.payload {
            EvidencePayload::IngestRecorded(record) => {
                let payload_raw = raw
                    .get(&record.raw_pointer)?
                    .with_context(|| format!("raw payload {} missing", record.raw_pointer))?;
                let obs = RawObservation {
                    declaration: record.to_declaration(payload_raw),
                    raw_payload_hash: record.raw_payload_hash.clone(),
                    raw_pointer: record.raw_pointer.clone(),
                };
                let r = ingestor
                    .record_at(&obs, record.received_at)
                    .with_context(|| format!("re-ingest of sequence {}", ev.sequence))?;
                recorded.insert(ev.id, r);
                observations += 1;
            }
            EvidencePayload::IdempotencyDecided(decision) => {
                let Some(ingest_id) = decision.evidence_refs.first() else {
                    bail!("REPLAY_DECISION_WITHOUT_INGEST sequence={}", ev.sequence);
                };
                let r = recorded.get(ingest_id).with_context(|| {
                    format!("REPLAY_BAD_INGEST_REF sequence={} ingest={ingest_id}", ev.sequence)
                })?;
                let decided = ingestor
                    .decide(r)
                    .with_context(|| format!("re-decide of sequence {}", ev.sequence))?;
                if decided.owes_effect() {
                    owed.insert(ev.id, decided);
                } else {
                    ingestor.settle(decided)?;
                }
            }
            EvidencePayload::CanonicalEventCommitted(_) | EvidencePayload::RejectionRecorded(_) => {
                let Some((decision_id, decided)) = ev
                    .caused_by
                    .iter()
                    .find_map(|id| owed.remove(id).map(|d| (*id, d)))
                else {
                    debug!(sequence = ev.sequence, "replay/effect_without_owed_decision");
                    continue;
                };
                // A resumed accept also names the retry whose bytes built the effect.
                let retry = ev
                    .caused_by
                    .iter()
                    .filter(|id| **id != decision_id)
                    .find_map(|id| recorded.get(id));
                let decided = match retry {
                    Some(r) => decided.with_observation(r.observation().clone()),
                    None => decided,
                };
                ingestor
                    .settle(decided)
                    .with_context(|| format!("re-settle of sequence {}", ev.sequence))?;
            }
            EvidencePayload::WatermarkAdvanced(w) => {
                ingestor.tick_at(w.as_of, &w.reason)?;
                watermarks += 1;
            }
            _ => {}
        }
    }
    if !owed.is_empty() {
        warn!(count = owed.len(), "replay/accepts_without_effect");
    }

    Deriver::new(Arc::clone(&fresh), &engines).run()?;

    let original = DerivedRecords::collect(source);
    let replayed = DerivedRecords::collect(&fresh);
    let version = format!("{}:{}", book.version(), book.config_hash);

    let missing = original
        .records
        .keys()
        .filter(|k| !replayed.records.contains_key(*k))
        .cloned()
        .collect();
    let extra = replayed
        .records
        .keys()
        .filter(|k| !original.records.contains_key(*k))
        .cloned()
        .collect();
    let changed = original
        .records
        .iter()
        .filter(|(k, v)| replayed.records.get(*k).is_some_and(|r| r != *v))
        .map(|(k, _)| k.clone())
        .collect();

    let report = ReplayReport {
        rulebook_version: book.version().to_string(),
        config_hash: book.config_hash.clone(),
        observations,
        watermarks,
        original_fingerprint: original.fingerprint(&version)?,
        replayed_fingerprint: replayed.fingerprint(&version)?,
        missing,
        extra,
        changed,
    };
    info!(
        observations,
        watermarks,
        matches = report.matches(),
        "replay/finished"
    );
    Ok(ReplayOutcome {
        report,
        replayed: fresh,
    })
}
