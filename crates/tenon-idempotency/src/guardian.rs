use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::warn;
use uuid::Uuid;

use tenon_evidence::{AppendError, EvidenceDraft, EvidenceKind, EvidenceLog, EvidencePayload, ScanCriteria};
use tenon_schemas::{IdempotencyDecision, IdempotencyRecord};

use crate::key::IdempotencyRequest;

const PRODUCER: &str = "idempotency-guardian";

/// Proof that this caller holds the single effect of an ACCEPT_FIRST for `key`.
///
/// Cannot be constructed outside this crate and is not `Clone`: one decision, one effect.
/// Call [`AcceptPermit::settle`] once the effect is committed. A permit dropped
/// unsettled hands its accept back to the guardian, and the next retry of the
/// same key resumes it.
#[derive(Debug)]
pub struct AcceptPermit {
    key: String,
    accept: PendingAccept,
    /// Ingest record of the retry that resumed this accept.
    resumed_by: Option<Uuid>,
    index: Arc<Mutex<GuardianIndex>>,
    settled: bool,
}

impl AcceptPermit {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Evidence id of the ACCEPT_FIRST record; the effect must be caused by it.
    pub fn decision_evidence_id(&self) -> Uuid {
        self.accept.decision_evidence_id
    }

    /// Ingest record the ACCEPT_FIRST was decided on.
    pub fn ingest_evidence_id(&self) -> Uuid {
        self.accept.ingest_evidence_id
    }

    /// When the accepted observation was first seen.
    pub fn first_seen_at(&self) -> DateTime<Utc> {
        self.accept.first_seen_at
    }

    pub fn resumed_by(&self) -> Option<Uuid> {
        self.resumed_by
    }

    pub fn is_resumed(&self) -> bool {
        self.resumed_by.is_some()
    }

    /// Mark the effect as committed. Consumes the permit.
    pub fn settle(mut self) {
        self.settled = true;
    }
}

impl Drop for AcceptPermit {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        // Never dropped while the guardian holds the index lock.
        if let Ok(mut index) = self.index.lock() {
            warn!(key = %self.key, "idempotency/permit_dropped_unsettled");
            index.pending.insert(self.key.clone(), self.accept.clone());
        }
    }
}

/// A committed decision.
#[derive(Debug)]
pub struct Verdict {
    pub record: IdempotencyRecord,
    pub evidence_id: Uuid,
    pub sequence: u64,
    /// Present for ACCEPT_FIRST, and for a REJECT_DUPLICATE that resumes an
    /// accept whose effect was never committed.
    pub permit: Option<AcceptPermit>,
}

impl Verdict {
    pub fn decision(&self) -> IdempotencyDecision {
        self.record.decision
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardianError {
    /// The decision could not be committed; nothing was decided.
    Append(AppendError),
    Poisoned,
    /// The log holds a decision the index cannot replay.
    Corrupt(String),
}

impl fmt::Display for GuardianError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardianError::Append(e) => write!(f, "guardian decision not committed: {e}"),
            GuardianError::Poisoned => write!(f, "guardian index poisoned"),
            GuardianError::Corrupt(m) => write!(f, "guardian recovery failed: {m}"),
        }
    }
}

impl std::error::Error for GuardianError {}

impl From<AppendError> for GuardianError {
    fn from(e: AppendError) -> Self {
        GuardianError::Append(e)
    }
}

#[derive(Debug, Clone)]
struct KeyEntry {
    first_seen_at: DateTime<Utc>,
    evidence_id: Uuid,
}

#[derive(Debug, Clone)]
struct SubjectEntry {
    accepted_payload_hash: String,
    first_seen_at: DateTime<Utc>,
    evidence_id: Uuid,
}

/// An ACCEPT_FIRST with no committed effect.
#[derive(Debug, Clone)]
struct PendingAccept {
    decision_evidence_id: Uuid,
    ingest_evidence_id: Uuid,
    first_seen_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct GuardianIndex {
    by_key: HashMap<String, KeyEntry>,
    by_subject: HashMap<String, SubjectEntry>,
    /// Accepts whose holder went away before committing the effect.
    pending: HashMap<String, PendingAccept>,
}

impl GuardianIndex {
    fn apply(&mut self, subject_key: String, record: &IdempotencyRecord, evidence_id: Uuid) {
        match record.decision {
            IdempotencyDecision::AcceptFirst => {
                self.by_key.insert(
                    record.key.clone(),
                    KeyEntry {
                        first_seen_at: record.first_seen_at,
                        evidence_id,
                    },
                );
                self.by_subject.entry(subject_key).or_insert(SubjectEntry {
                    accepted_payload_hash: record.payload_hash.clone(),
                    first_seen_at: record.first_seen_at,
                    evidence_id,
                });
            }
            // Later retries of a flagged payload are duplicates of the flag.
            IdempotencyDecision::FlagAmbiguous => {
                self.by_key.entry(record.key.clone()).or_insert(KeyEntry {
                    first_seen_at: record.decided_at,
                    evidence_id,
                });
            }
            IdempotencyDecision::RejectDuplicate => {}
        }
    }
}

/// Serializes decisions per key and commits each one to the evidence log.
pub struct IdempotencyGuardian {
    log: Arc<EvidenceLog>,
    index: Arc<Mutex<GuardianIndex>>,
}

impl IdempotencyGuardian {
    pub fn new(log: Arc<EvidenceLog>) -> Self {
        Self {
            log,
            index: Arc::new(Mutex::new(GuardianIndex::default())),
        }
    }

    /// Rebuild the index purely from committed evidence.
    ///
    /// An ACCEPT_FIRST that no canonical commit or rejection is caused by lost its
    /// effect (crash between decision and commit) and becomes pending.
    pub fn recover(log: Arc<EvidenceLog>) -> Result<Self, GuardianError> {
        let mut settled: HashSet<Uuid> = HashSet::new();
        for kind in [EvidenceKind::CanonicalEventCommitted, EvidenceKind::RejectionRecorded] {
            for ev in log.snapshot(ScanCriteria::all().kind(kind)) {
                settled.extend(ev.caused_by.iter().copied());
            }
        }

        let mut index = GuardianIndex::default();
        for ev in log.snapshot(ScanCriteria::all().kind(EvidenceKind::IdempotencyDecided)) {
            let EvidencePayload::IdempotencyDecided(record) = &ev.payload else {
                return Err(GuardianError::Corrupt(format!(
                    "sequence {} has kind {} but a different payload",
                    ev.sequence, ev.kind
                )));
            };
            let subject_key = format!(
                "{}|{}|{}|{}",
                record.scope, record.source_identity, record.subject, record.rule_version
            );
            index.apply(subject_key, record, ev.id);

            if record.decision == IdempotencyDecision::AcceptFirst && !settled.contains(&ev.id) {
                let ingest_evidence_id = record.evidence_refs.first().copied().ok_or_else(|| {
                    GuardianError::Corrupt(format!(
                        "sequence {} ACCEPT_FIRST has no ingest reference",
                        ev.sequence
                    ))
                })?;
                warn!(key = %record.key, sequence = ev.sequence, "idempotency/unsettled_accept");
                index.pending.insert(
                    record.key.clone(),
                    PendingAccept {
                        decision_evidence_id: ev.id,
                        ingest_evidence_id,
                        first_seen_at: record.first_seen_at,
                    },
                );
            }
        }
        Ok(Self {
            log,
            index: Arc::new(Mutex::new(index)),
        })
    }

    /// Keys accepted but not yet settled by any holder, sorted.
    pub fn pending(&self) -> Result<Vec<String>, GuardianError> {
        let index = self.index.lock().map_err(|_| GuardianError::Poisoned)?;
        let mut keys: Vec<String> = index.pending.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    /// Decide and commit. `ingest_evidence` is the already committed record of the
    /// observation being decided on.
    ///
    /// The index lock is held across the log append, so exactly one caller per key
    /// can observe "no record" and win ACCEPT_FIRST.
    pub fn decide(
        &self,
        request: &IdempotencyRequest,
        ingest_evidence: Uuid,
        decided_at: DateTime<Utc>,
    ) -> Result<Verdict, GuardianError> {
        let key = request.key();
        let subject_key = request.subject_key();

        let mut index = self.index.lock().map_err(|_| GuardianError::Poisoned)?;

        let (decision, first_seen_at, prior, conflicts_with) =
            if let Some(entry) = index.by_key.get(&key) {
                (
                    IdempotencyDecision::RejectDuplicate,
                    entry.first_seen_at,
                    Some(entry.evidence_id),
                    None,
                )
            } else if let Some(subject) = index.by_subject.get(&subject_key) {
                (
                    IdempotencyDecision::FlagAmbiguous,
                    subject.first_seen_at,
                    Some(subject.evidence_id),
                    Some(subject.accepted_payload_hash.clone()),
                )
            } else {
                (IdempotencyDecision::AcceptFirst, decided_at, None, None)
            };

        let resumable = match decision {
            IdempotencyDecision::RejectDuplicate => index.pending.get(&key).cloned(),
            _ => None,
        };

        let mut evidence_refs = vec![ingest_evidence];
        evidence_refs.extend(prior);

        let record = IdempotencyRecord {
            key: key.clone(),
            scope: request.scope,
            source_identity: request.source_identity.clone(),
            subject: request.subject.clone(),
            payload_hash: request.payload_hash.clone(),
            decision,
            first_seen_at,
            decided_at,
            evidence_refs: evidence_refs.clone(),
            rule_version: request.rule_version.clone(),
            conflicts_with,
        };

        let draft = EvidenceDraft::new(
            PRODUCER,
            subject_key.clone(),
            EvidencePayload::IdempotencyDecided(record.clone()),
            decided_at,
        )
        .caused_by(evidence_refs);
        let sequence = self.log.append(draft)?;
        let evidence_id = self
            .log
            .get_by_sequence(sequence)
            .map(|ev| ev.id)
            .ok_or_else(|| GuardianError::Corrupt(format!("sequence {sequence} vanished")))?;

        index.apply(subject_key, &record, evidence_id);
        if resumable.is_some() {
            index.pending.remove(&key);
        }
        drop(index);

        let issued = match (decision, resumable) {
            (IdempotencyDecision::AcceptFirst, _) => Some((
                PendingAccept {
                    decision_evidence_id: evidence_id,
                    ingest_evidence_id: ingest_evidence,
                    first_seen_at: decided_at,
                },
                None,
            )),
            (_, Some(accept)) => Some((accept, Some(ingest_evidence))),
            _ => None,
        };
        let permit = issued.map(|(accept, resumed_by)| AcceptPermit {
            key,
            accept,
            resumed_by,
            index: Arc::clone(&self.index),
            settled: false,
        });

        Ok(Verdict {
            record,
            evidence_id,
            sequence,
            permit,
        })
    }
}
