//! tenon-testkit
//!
//! Fixtures shared by the cross-crate scenarios under `tests/`.
//!
//! - Declaration builders for the two sources the built-in rule book maps (`psp`, `bank`)
//! - [`Harness`]: an in-memory pipeline on a fixed clock with a memory raw store
//! - Typed readers over the derived records in a log

use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::path::Path;
use std::sync::Arc;

use tenon_config::LoadedRuleBook;
use tenon_evidence::{EvidenceKind, EvidenceLog, EvidencePayload, ScanCriteria};
use tenon_pipeline::{
    observe, DeriveReport, FixedTime, IngestReport, MemoryRawStore, Pipeline,
};
use tenon_schemas::{
    CausalityAttribution, CorrelationLink, Discrepancy, IdempotencyRecord, IngestDeclaration,
    MoneyState, PayloadFormat, RawObservation,
};

pub const PSP_ADAPTER: &str = "psp-adapter/2";
pub const BANK_ADAPTER: &str = "bank-adapter/1";

/// Default start of the fixed clock.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0)
        .single()
        .unwrap_or_default()
}

/// A psp webhook. `amount_minor` is in cents.
pub fn psp(
    source_event_id: Option<&str>,
    reference: &str,
    event_type: &str,
    amount_minor: i64,
    currency: &str,
) -> IngestDeclaration {
    let payload = serde_json::json!({
        "type": event_type,
        "data": {
            "amount": amount_minor,
            "currency": currency,
            "direction": "credit",
            "reference": reference,
        }
    });
    IngestDeclaration {
        source_system: "psp".to_string(),
        source_event_id: source_event_id.map(str::to_string),
        external_reference: Some(reference.to_string()),
        payload_raw: payload.to_string(),
        payload_format: PayloadFormat::Json,
        source_timestamp: None,
        adapter_version: PSP_ADAPTER.to_string(),
        schema_hint: None,
    }
}

/// A bank statement line. `amount` is a major-unit decimal string.
pub fn bank(
    source_event_id: &str,
    reference: &str,
    kind: &str,
    amount: &str,
    currency: &str,
) -> IngestDeclaration {
    let payload = serde_json::json!({
        "kind": kind,
        "amount": amount,
        "ccy": currency,
        "dc": "C",
        "end_to_end_id": reference,
    });
    IngestDeclaration {
        source_system: "bank".to_string(),
        source_event_id: Some(source_event_id.to_string()),
        external_reference: Some(reference.to_string()),
        payload_raw: payload.to_string(),
        payload_format: PayloadFormat::Json,
        source_timestamp: None,
        adapter_version: BANK_ADAPTER.to_string(),
        schema_hint: None,
    }
}

/// One pipeline over one log, driven by a fixed clock.
pub struct Harness {
    pub time: Arc<FixedTime>,
    pub raw: MemoryRawStore,
    pub book: LoadedRuleBook,
    pub pipeline: Pipeline,
}

impl Harness {
    pub fn new() -> Result<Self> {
        Self::with_log(Arc::new(EvidenceLog::in_memory()), LoadedRuleBook::builtin_v1()?)
    }

    /// File-backed log under `dir`.
    pub fn on_disk(dir: &Path) -> Result<Self> {
        let log = EvidenceLog::open(dir.join("evidence.jsonl"))?;
        Self::with_log(Arc::new(log), LoadedRuleBook::builtin_v1()?)
    }

    pub fn with_log(log: Arc<EvidenceLog>, book: LoadedRuleBook) -> Result<Self> {
        let time = Arc::new(FixedTime::new(t0()));
        let pipeline = Pipeline::open(log, &book, time.clone())?;
        Ok(Self {
            time,
            raw: MemoryRawStore::new(),
            book,
            pipeline,
        })
    }

    pub fn log(&self) -> &Arc<EvidenceLog> {
        self.pipeline.log()
    }

    /// Store the raw bytes and hand the observation back without ingesting it.
    pub fn observe(&self, declaration: IngestDeclaration) -> Result<RawObservation> {
        observe(&self.raw, declaration)
    }

    pub fn ingest(&self, declaration: IngestDeclaration) -> Result<IngestReport> {
        let obs = self.observe(declaration)?;
        Ok(self.pipeline.ingest(&obs)?)
    }

    pub fn advance(&self, by: Duration) {
        self.time.advance(by);
    }

    pub fn tick(&self, reason: &str) -> Result<u64> {
        Ok(self.pipeline.tick(reason)?)
    }

    pub fn derive(&mut self) -> Result<DeriveReport> {
        self.pipeline.derive()
    }
}

fn collect<T>(
    log: &EvidenceLog,
    kind: EvidenceKind,
    pick: impl Fn(&EvidencePayload) -> Option<T>,
) -> Vec<T> {
    log.snapshot(ScanCriteria::all().kind(kind))
        .filter_map(|ev| pick(&ev.payload))
        .collect()
}

pub fn decisions(log: &EvidenceLog) -> Vec<IdempotencyRecord> {
    collect(log, EvidenceKind::IdempotencyDecided, |p| match p {
        EvidencePayload::IdempotencyDecided(r) => Some(r.clone()),
        _ => None,
    })
}

pub fn links(log: &EvidenceLog) -> Vec<CorrelationLink> {
    collect(log, EvidenceKind::CorrelationLinked, |p| match p {
        EvidencePayload::CorrelationLinked(l) => Some(l.clone()),
        _ => None,
    })
}

pub fn states(log: &EvidenceLog) -> Vec<MoneyState> {
    collect(log, EvidenceKind::StateEvaluated, |p| match p {
        EvidencePayload::StateEvaluated(s) => Some(s.clone()),
        _ => None,
    })
}

pub fn discrepancies(log: &EvidenceLog) -> Vec<Discrepancy> {
    collect(log, EvidenceKind::DiscrepancyDetected, |p| match p {
        EvidencePayload::DiscrepancyDetected(d) => Some(d.clone()),
        _ => None,
    })
}

pub fn attributions(log: &EvidenceLog) -> Vec<CausalityAttribution> {
    collect(log, EvidenceKind::CausalityAttributed, |p| match p {
        EvidencePayload::CausalityAttributed(a) => Some(a.clone()),
        _ => None,
    })
}

pub fn count_kind(log: &EvidenceLog, kind: EvidenceKind) -> usize {
    log.snapshot(ScanCriteria::all().kind(kind)).count()
}

/// Temp dir for file-backed scenarios; dropped with the test.
pub fn scratch_dir() -> Result<tempfile::TempDir> {
    Ok(tempfile::tempdir()?)
}
