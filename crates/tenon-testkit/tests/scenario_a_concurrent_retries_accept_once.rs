//! Scenario A: the same raw payload delivered five times concurrently.
//!
//! GREEN when:
//! - Exactly one ACCEPT_FIRST and four REJECT_DUPLICATE decisions are committed
//! - All five observations are recorded as evidence
//! - Exactly one canonical event exists

use std::sync::Barrier;

use tenon_evidence::EvidenceKind;
use tenon_schemas::IdempotencyDecision;
use tenon_testkit::{count_kind, decisions, psp, Harness};

#[test]
fn five_concurrent_deliveries_accept_once() {
    const DELIVERIES: usize = 5;

    let h = Harness::new().unwrap();
    let obs = h
        .observe(psp(Some("ch_a"), "INV-A", "payment.created", 1000, "USD"))
        .unwrap();
    let ingestor = h.pipeline.ingestor();
    let barrier = Barrier::new(DELIVERIES);

    let reports: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..DELIVERIES)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    ingestor.ingest(&obs).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|t| t.join().unwrap()).collect()
    });

    let accepted = reports
        .iter()
        .filter(|r| r.decision == IdempotencyDecision::AcceptFirst)
        .count();
    let duplicates = reports
        .iter()
        .filter(|r| r.decision == IdempotencyDecision::RejectDuplicate)
        .count();
    assert_eq!(accepted, 1);
    assert_eq!(duplicates, DELIVERIES - 1);
    assert_eq!(reports.iter().filter(|r| r.committed()).count(), 1);

    let log = h.log();
    assert_eq!(count_kind(log, EvidenceKind::IngestRecorded), DELIVERIES);
    assert_eq!(decisions(log).len(), DELIVERIES);
    assert_eq!(count_kind(log, EvidenceKind::CanonicalEventCommitted), 1);

    // every duplicate points back at the accepted decision
    let accept_evidence = reports
        .iter()
        .find(|r| r.decision == IdempotencyDecision::AcceptFirst)
        .map(|r| r.decision_evidence_id)
        .unwrap();
    for d in decisions(log)
        .iter()
        .filter(|d| d.decision == IdempotencyDecision::RejectDuplicate)
    {
        assert_eq!(d.evidence_refs.get(1), Some(&accept_evidence));
    }
}
