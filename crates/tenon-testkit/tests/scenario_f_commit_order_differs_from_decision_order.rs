//! Scenario F: two workers decide in one order and commit in the other.
//!
//! GREEN when:
//! - The canonical commits land in the opposite order of their decisions
//! - The flow is anchored at the first committed event, not the first decided one
//! - Replay reproduces the link, flow, state and discrepancy ids exactly

use chrono::Duration;
use std::collections::BTreeSet;
use uuid::Uuid;

use tenon_evidence::{EvidenceKind, EvidenceLog, ScanCriteria};
use tenon_pipeline::{replay, DerivedRecords};
use tenon_schemas::flow_id_for;
use tenon_testkit::{bank, discrepancies, links, psp, states, Harness};

#[test]
fn replay_follows_commit_order() {
    let mut h = Harness::new().unwrap();
    let webhook = h
        .observe(psp(Some("ch_f1"), "INV-F", "payment.created", 7_500, "USD"))
        .unwrap();
    let statement = h
        .observe(bank("stmt-f1", "INV-F", "BOOKED", "75.00", "USD"))
        .unwrap();

    let ing = h.pipeline.ingestor();
    let r1 = ing.record(&webhook).unwrap();
    h.advance(Duration::minutes(1));
    let r2 = ing.record(&statement).unwrap();
    let d1 = ing.decide(&r1).unwrap();
    let d2 = ing.decide(&r2).unwrap();
    let first_decision = d1.report().decision_evidence_id;

    // Worker two is faster to commit.
    let committed_first = ing.settle(d2).unwrap().event_id.unwrap();
    ing.settle(d1).unwrap();

    h.ingest(psp(Some("ch_f2"), "INV-F2", "payment.created", 300, "EUR"))
        .unwrap();
    h.derive().unwrap();

    let source = h.log();
    let commit_causes: Vec<Uuid> = source
        .snapshot(ScanCriteria::all().kind(EvidenceKind::CanonicalEventCommitted))
        .map(|ev| ev.caused_by[0])
        .collect();
    assert_eq!(commit_causes.len(), 3);
    assert_eq!(commit_causes[1], first_decision, "decided first, committed second");

    let anchored: BTreeSet<String> = states(source).into_iter().map(|s| s.flow_id).collect();
    assert!(anchored.contains(&flow_id_for(committed_first)));

    let out = replay(source, &h.raw, &h.book).unwrap();
    assert!(out.report.matches(), "{:?}", out.report);
    assert!(out.report.missing.is_empty() && out.report.extra.is_empty());

    let replayed = &out.replayed;
    assert_eq!(DerivedRecords::collect(source), DerivedRecords::collect(replayed));
    let link_ids = |log: &EvidenceLog| links(log).into_iter().map(|l| l.link_id).collect::<BTreeSet<_>>();
    assert!(!link_ids(source).is_empty());
    assert_eq!(link_ids(source), link_ids(replayed));
    let disc_ids = |log: &EvidenceLog| {
        discrepancies(log)
            .into_iter()
            .map(|d| d.discrepancy_id)
            .collect::<BTreeSet<_>>()
    };
    assert_eq!(disc_ids(source), disc_ids(replayed));
}
