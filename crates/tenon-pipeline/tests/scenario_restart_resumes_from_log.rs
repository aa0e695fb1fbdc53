//! Scenario: a file-backed core restarts purely from its evidence log.
//!
//! GREEN when:
//! - After reopening the JSONL log, a retried observation is REJECT_DUPLICATE
//!   (guardian index rebuilt from committed decisions)
//! - Re-deriving from sequence 1 writes no new derived records
//! - The hash chain of the reopened file verifies
//! - The projection answers flow / event / discrepancy lookups with version fields

use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;

use tenon_config::LoadedRuleBook;
use tenon_evidence::{verify_jsonl, EvidenceLog};
use tenon_pipeline::{observe, FixedTime, MemoryRawStore, Pipeline};
use tenon_schemas::{IdempotencyDecision, IngestDeclaration, PayloadFormat};

fn declaration(id: &str, event_type: &str, amount: i64) -> IngestDeclaration {
    IngestDeclaration {
        source_system: "psp".to_string(),
        source_event_id: Some(id.to_string()),
        external_reference: Some("INV-2001".to_string()),
        payload_raw: format!(
            r#"{{"type":"{event_type}","data":{{"amount":{amount},"currency":"USD","direction":"credit","reference":"INV-2001"}}}}"#
        ),
        payload_format: PayloadFormat::Json,
        source_timestamp: None,
        adapter_version: "psp-adapter/2".to_string(),
        schema_hint: None,
    }
}

#[test]
fn restart_resumes_from_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("evidence.jsonl");
    let book = LoadedRuleBook::builtin_v1().unwrap();
    let raw = MemoryRawStore::new();
    let time = Arc::new(FixedTime::new(Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap()));

    let (event_id, count_before) = {
        let log = Arc::new(EvidenceLog::open(&path).unwrap());
        let mut p = Pipeline::open(Arc::clone(&log), &book, time.clone()).unwrap();
        let first = p
            .ingest(&observe(&raw, declaration("ch_1", "payment.created", 4200)).unwrap())
            .unwrap();
        time.advance(Duration::hours(2));
        p.ingest(&observe(&raw, declaration("ch_2", "payment.captured", 4200)).unwrap())
            .unwrap();
        let report = p.derive().unwrap();
        assert_eq!(report.links, 1);
        (first.event_id.unwrap(), log.count())
    };

    let log = Arc::new(EvidenceLog::open(&path).unwrap());
    assert_eq!(log.count(), count_before);
    let mut p = Pipeline::open(Arc::clone(&log), &book, time.clone()).unwrap();

    let retry = p
        .ingest(&observe(&raw, declaration("ch_1", "payment.created", 4200)).unwrap())
        .unwrap();
    assert_eq!(retry.decision, IdempotencyDecision::RejectDuplicate);

    let rederived = p.derive().unwrap();
    assert_eq!(rederived.links, 0);
    assert_eq!(rederived.states, 0);
    assert_eq!(rederived.discrepancies, 0);
    assert_eq!(rederived.attributions, 0);

    assert!(verify_jsonl(&path).unwrap().is_valid());

    let projection = p.projection();
    let event = projection.event(event_id).unwrap();
    let flow_id = event.flow_id.clone().unwrap();
    assert_eq!(event.links.len(), 1);
    assert_eq!(event.diff.rule_id, "psp-webhook");

    let flow = projection.flow(&flow_id).unwrap();
    assert_eq!(flow.events.len(), 2);
    assert_eq!(flow.latest_state.rule_version, "msm-v1");
    assert_eq!(flow.state_history.len(), 2);
    assert!(!flow.discrepancies.is_empty());

    let d = &flow.discrepancies[0];
    let view = projection.discrepancy(d.discrepancy_id).unwrap();
    assert_eq!(view.discrepancy.flow_id, flow_id);
    assert!(!view.states.is_empty());
}
