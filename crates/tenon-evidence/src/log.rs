use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};
use uuid::Uuid;

use tenon_schemas::{derive_id, hash_canonical, SCHEMA_VERSION};

use crate::chain::{compute_event_hash, verify_events, VerifyResult};
use crate::payload::{EvidenceKind, EvidencePayload};
use crate::scan::{Scan, ScanCriteria};
use crate::sink::JsonlSink;

/// One committed, immutable fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceEvent {
    pub id: Uuid,
    pub kind: EvidenceKind,
    pub subject_id: String,
    /// SHA-256 of the canonical JSON of `payload`.
    pub payload_ref: String,
    pub payload: EvidencePayload,
    pub caused_by: Vec<Uuid>,
    pub schema_version: u32,
    pub producer: String,
    pub produced_at: DateTime<Utc>,
    pub sequence: u64,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

/// An event as submitted by a producer, before the sequencer assigns id / sequence / hashes.
#[derive(Debug, Clone)]
pub struct EvidenceDraft {
    pub producer: String,
    pub subject_id: String,
    pub payload: EvidencePayload,
    pub caused_by: Vec<Uuid>,
    pub produced_at: DateTime<Utc>,
}

impl EvidenceDraft {
    pub fn new(
        producer: impl Into<String>,
        subject_id: impl Into<String>,
        payload: EvidencePayload,
        produced_at: DateTime<Utc>,
    ) -> Self {
        Self {
            producer: producer.into(),
            subject_id: subject_id.into(),
            payload,
            caused_by: Vec::new(),
            produced_at,
        }
    }

    /// Attach causes. Duplicates are dropped and the list is sorted.
    pub fn caused_by(mut self, ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.caused_by.extend(ids);
        self.caused_by.sort();
        self.caused_by.dedup();
        self
    }
}

/// Outcome of [`EvidenceLog::append_unique`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Appended {
    New(u64),
    /// A record with the same content key was already committed at this sequence.
    Existing(u64),
}

impl Appended {
    pub fn sequence(&self) -> u64 {
        match self {
            Appended::New(s) | Appended::Existing(s) => *s,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Appended::New(_))
    }
}

/// Append failures. All but `Sink` / `Poisoned` are malformed input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendError {
    EmptyProducer,
    EmptySubject,
    DanglingCause(Uuid),
    DuplicateRecord { key: String, sequence: u64 },
    Serialize(String),
    Sink(String),
    /// The log was opened with [`EvidenceLog::open_read_only`].
    ReadOnly,
    Poisoned,
}

impl fmt::Display for AppendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppendError::EmptyProducer => write!(f, "evidence producer is empty"),
            AppendError::EmptySubject => write!(f, "evidence subject_id is empty"),
            AppendError::DanglingCause(id) => {
                write!(f, "caused_by references uncommitted evidence {id}")
            }
            AppendError::DuplicateRecord { key, sequence } => {
                write!(f, "record {key} already committed at sequence {sequence}")
            }
            AppendError::Serialize(e) => write!(f, "evidence serialization failed: {e}"),
            AppendError::Sink(e) => write!(f, "evidence sink write failed: {e}"),
            AppendError::ReadOnly => write!(f, "evidence log is open read-only"),
            AppendError::Poisoned => write!(f, "evidence sequencer poisoned"),
        }
    }
}

impl std::error::Error for AppendError {}

/// Failures opening a JSONL-backed log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenError {
    /// Another writer holds the log's exclusive lock.
    Locked { path: PathBuf },
    /// A line before the final one does not parse.
    Corrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    ChainBroken {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    Io(String),
}

impl fmt::Display for OpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenError::Locked { path } => {
                write!(f, "EVIDENCE_LOG_LOCKED path={path:?}: another writer holds the log")
            }
            OpenError::Corrupt { path, line, reason } => {
                write!(f, "EVIDENCE_LOG_CORRUPT path={path:?} line={line} reason={reason}")
            }
            OpenError::ChainBroken { path, line, reason } => {
                write!(f, "EVIDENCE_CHAIN_BROKEN path={path:?} line={line} reason={reason}")
            }
            OpenError::Io(e) => write!(f, "evidence log io failed: {e}"),
        }
    }
}

impl std::error::Error for OpenError {}

struct Sequencer {
    last_hash: Option<String>,
    sink: Option<JsonlSink>,
    read_only: bool,
}

#[derive(Default)]
struct Committed {
    events: Vec<Arc<EvidenceEvent>>,
    by_id: HashMap<Uuid, u64>,
    by_record_key: HashMap<String, u64>,
}

impl Committed {
    fn push(&mut self, ev: EvidenceEvent) {
        if let Some(k) = ev.payload.record_key() {
            self.by_record_key.entry(k).or_insert(ev.sequence);
        }
        self.by_id.insert(ev.id, ev.sequence);
        self.events.push(Arc::new(ev));
    }
}

/// Append-only evidence log with a single sequencer.
///
/// Writers serialize on the sequencer; readers only take a short read lock per lookup.
/// Lock order is always sequencer, then committed.
pub struct EvidenceLog {
    sequencer: Mutex<Sequencer>,
    committed: RwLock<Committed>,
}

impl Default for EvidenceLog {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl EvidenceLog {
    pub fn in_memory() -> Self {
        Self {
            sequencer: Mutex::new(Sequencer {
                last_hash: None,
                sink: None,
                read_only: false,
            }),
            committed: RwLock::new(Committed::default()),
        }
    }

    /// Open (or create) a JSONL-backed log as its single writer.
    ///
    /// Takes an exclusive advisory lock held until the log is dropped; a second
    /// writer gets [`OpenError::Locked`]. A torn final line is truncated away,
    /// then the remaining lines are chain-verified and loaded.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, OpenError> {
        let path = path.as_ref();
        let (sink, existing) = JsonlSink::open(path)?;
        Self::from_events(path, existing, Some(sink))
    }

    /// Load a JSONL log for reading only, without the writer lock.
    ///
    /// Appends fail with [`AppendError::ReadOnly`]. A partial final line is skipped.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self, OpenError> {
        let path = path.as_ref();
        let existing = JsonlSink::read_snapshot(path)?;
        Self::from_events(path, existing, None)
    }

    fn from_events(
        path: &Path,
        existing: Vec<EvidenceEvent>,
        sink: Option<JsonlSink>,
    ) -> Result<Self, OpenError> {
        if let VerifyResult::Broken { line, reason } = verify_events(existing.iter()) {
            return Err(OpenError::ChainBroken {
                path: path.to_path_buf(),
                line,
                reason,
            });
        }

        let mut committed = Committed::default();
        let mut last_hash = None;
        for ev in existing {
            last_hash = ev.hash_self.clone();
            committed.push(ev);
        }

        Ok(Self {
            sequencer: Mutex::new(Sequencer {
                last_hash,
                read_only: sink.is_none(),
                sink,
            }),
            committed: RwLock::new(committed),
        })
    }

    /// Append one event. Returns its sequence number.
    ///
    /// Fails only on malformed input (empty producer/subject, dangling cause, duplicate
    /// record key) or when the sink cannot persist the line.
    pub fn append(&self, draft: EvidenceDraft) -> Result<u64, AppendError> {
        self.append_inner(draft, false).map(|a| a.sequence())
    }

    /// Conditional append: a keyed record that already exists is not written again.
    pub fn append_unique(&self, draft: EvidenceDraft) -> Result<Appended, AppendError> {
        self.append_inner(draft, true)
    }

    fn append_inner(&self, draft: EvidenceDraft, unique: bool) -> Result<Appended, AppendError> {
        if draft.producer.trim().is_empty() {
            return Err(AppendError::EmptyProducer);
        }
        if draft.subject_id.trim().is_empty() {
            return Err(AppendError::EmptySubject);
        }

        let mut seqr = self.sequencer.lock().map_err(|_| AppendError::Poisoned)?;
        if seqr.read_only {
            return Err(AppendError::ReadOnly);
        }

        let record_key = draft.payload.record_key();
        let sequence = {
            let committed = self.read();
            if let Some(key) = &record_key {
                if let Some(existing) = committed.by_record_key.get(key) {
                    if unique {
                        return Ok(Appended::Existing(*existing));
                    }
                    return Err(AppendError::DuplicateRecord {
                        key: key.clone(),
                        sequence: *existing,
                    });
                }
            }
            for cause in &draft.caused_by {
                if !committed.by_id.contains_key(cause) {
                    return Err(AppendError::DanglingCause(*cause));
                }
            }
            committed.events.len() as u64 + 1
        };

        let payload_ref =
            hash_canonical(&draft.payload).map_err(|e| AppendError::Serialize(format!("{e:#}")))?;
        let id = derive_event_id(seqr.last_hash.as_deref(), &payload_ref, sequence);

        let mut ev = EvidenceEvent {
            id,
            kind: draft.payload.kind(),
            subject_id: draft.subject_id,
            payload_ref,
            payload: draft.payload,
            caused_by: draft.caused_by,
            schema_version: SCHEMA_VERSION,
            producer: draft.producer,
            produced_at: draft.produced_at,
            sequence,
            hash_prev: seqr.last_hash.clone(),
            hash_self: None,
        };
        let self_hash =
            compute_event_hash(&ev).map_err(|e| AppendError::Serialize(format!("{e:#}")))?;
        ev.hash_self = Some(self_hash.clone());

        if let Some(sink) = seqr.sink.as_mut() {
            sink.write(&ev)
                .map_err(|e| AppendError::Sink(format!("{e:#}")))?;
        }
        seqr.last_hash = Some(self_hash);

        let mut committed = self
            .committed
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        committed.push(ev);

        Ok(Appended::New(sequence))
    }

    fn read(&self) -> RwLockReadGuard<'_, Committed> {
        self.committed
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of committed events (== last sequence).
    pub fn count(&self) -> u64 {
        self.read().events.len() as u64
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<EvidenceEvent>> {
        let committed = self.read();
        let seq = *committed.by_id.get(&id)?;
        committed.events.get((seq - 1) as usize).cloned()
    }

    pub fn get_by_sequence(&self, sequence: u64) -> Option<Arc<EvidenceEvent>> {
        if sequence == 0 {
            return None;
        }
        self.read().events.get((sequence - 1) as usize).cloned()
    }

    /// Evidence event holding the keyed record, if committed.
    pub fn get_record(&self, record_key: &str) -> Option<Arc<EvidenceEvent>> {
        let committed = self.read();
        let seq = *committed.by_record_key.get(record_key)?;
        committed.events.get((seq - 1) as usize).cloned()
    }

    /// Lazy scan. Events appended while scanning are visible unless `to_sequence` bounds it.
    pub fn scan(&self, criteria: ScanCriteria) -> Scan<'_> {
        Scan::new(self, criteria)
    }

    /// Scan bounded to the events committed at call time.
    pub fn snapshot(&self, criteria: ScanCriteria) -> Scan<'_> {
        let upper = self.count();
        let current = criteria.to_sequence;
        let bounded = match current {
            Some(to) if to < upper => criteria,
            _ => criteria.to_sequence(upper),
        };
        Scan::new(self, bounded)
    }

    /// Recompute the in-memory hash chain.
    pub fn verify_chain(&self) -> VerifyResult {
        let committed = self.read();
        verify_events(committed.events.iter().map(|e| e.as_ref()))
    }
}

/// Evidence id derived from chain state + payload + sequence. No RNG.
fn derive_event_id(last_hash: Option<&str>, payload_ref: &str, sequence: u64) -> Uuid {
    derive_id(
        "evidence",
        &[last_hash.unwrap_or("genesis"), payload_ref, &sequence.to_string()],
    )
}
