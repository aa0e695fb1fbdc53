//! Evidence log contract.
//!
//! GREEN when:
//! - sequences start at 1, are gap-free and follow append order, including under
//!   concurrent writers
//! - malformed drafts (empty producer, dangling cause) never reach the log
//! - keyed records are committed at most once (`append_unique` is idempotent)
//! - scans are lazy, sequence ordered and restartable from their position
//! - a JSONL-backed log survives reopen and detects tampering
//! - a second writer on the same file is refused while the first is open
//! - a torn final line is truncated on open; corruption earlier in the file is not
//! - a read-only log loads without the writer lock and refuses appends

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use uuid::Uuid;

use tenon_evidence::{
    verify_jsonl, AppendError, Appended, EvidenceDraft, EvidenceKind, EvidenceLog,
    EvidencePayload, OpenError, ScanCriteria, VerifyResult,
};
use tenon_schemas::{Rejection, RejectionStage, Watermark};

fn ts(secs: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(1_760_000_000 + secs, 0).unwrap()
}

fn tick(secs: i64) -> EvidenceDraft {
    EvidenceDraft::new(
        "test",
        "watermark",
        EvidencePayload::WatermarkAdvanced(Watermark {
            as_of: ts(secs),
            reason: "test".to_string(),
        }),
        ts(secs),
    )
}

fn rejection(key: &str) -> EvidenceDraft {
    EvidenceDraft::new(
        "test",
        key,
        EvidencePayload::RejectionRecorded(Rejection {
            stage: RejectionStage::Normalization,
            reason_code: "NO_RULE".to_string(),
            detail: "no normalization rule".to_string(),
            raw_payload_hash: "ab".repeat(32),
            idempotency_key: key.to_string(),
            rule_id: None,
            rule_version: None,
        }),
        ts(0),
    )
}

#[test]
fn sequences_are_dense_and_ordered() {
    let log = EvidenceLog::in_memory();
    for i in 0..5 {
        assert_eq!(log.append(tick(i)).unwrap(), (i + 1) as u64);
    }
    assert_eq!(log.count(), 5);
    let seqs: Vec<u64> = log.scan(ScanCriteria::all()).map(|e| e.sequence).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    assert!(log.verify_chain().is_valid());
}

#[test]
fn malformed_drafts_are_rejected_without_side_effects() {
    let log = EvidenceLog::in_memory();

    let mut d = tick(0);
    d.producer = " ".to_string();
    assert_eq!(log.append(d), Err(AppendError::EmptyProducer));

    let ghost = Uuid::new_v5(&Uuid::NAMESPACE_OID, b"never-committed");
    let d = tick(0).caused_by([ghost]);
    assert_eq!(log.append(d), Err(AppendError::DanglingCause(ghost)));

    assert_eq!(log.count(), 0, "rejected drafts must not consume a sequence");
}

#[test]
fn caused_by_must_point_backwards() {
    let log = EvidenceLog::in_memory();
    let first = log.append(tick(0)).unwrap();
    let first_id = log.get_by_sequence(first).unwrap().id;

    let second = log.append(tick(1).caused_by([first_id])).unwrap();
    let ev = log.get_by_sequence(second).unwrap();
    assert_eq!(ev.caused_by, vec![first_id]);
    assert_eq!(log.get(first_id).unwrap().sequence, 1);
}

#[test]
fn keyed_records_commit_at_most_once() {
    let log = EvidenceLog::in_memory();

    assert_eq!(log.append_unique(rejection("k1")).unwrap(), Appended::New(1));
    assert_eq!(
        log.append_unique(rejection("k1")).unwrap(),
        Appended::Existing(1)
    );
    assert!(matches!(
        log.append(rejection("k1")),
        Err(AppendError::DuplicateRecord { sequence: 1, .. })
    ));
    assert_eq!(log.count(), 1);
    assert!(log.get_record("rejection:k1").is_some());
}

#[test]
fn concurrent_appends_get_unique_sequences() {
    let log = Arc::new(EvidenceLog::in_memory());
    let mut all: Vec<u64> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = Arc::clone(&log);
                s.spawn(move || {
                    (0..25)
                        .map(|i| log.append(tick(t * 100 + i)).unwrap())
                        .collect::<Vec<u64>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });
    all.sort();
    assert_eq!(all, (1..=200).collect::<Vec<u64>>());
    assert!(log.verify_chain().is_valid());
}

#[test]
fn scan_filters_and_restarts() {
    let log = EvidenceLog::in_memory();
    log.append(tick(0)).unwrap();
    log.append(rejection("a")).unwrap();
    log.append(tick(1)).unwrap();
    log.append(rejection("b")).unwrap();

    let mut scan = log.scan(ScanCriteria::all().kind(EvidenceKind::RejectionRecorded));
    let first = scan.next().unwrap();
    assert_eq!(first.sequence, 2);

    let resumed: Vec<u64> = log.scan(scan.resume_criteria()).map(|e| e.sequence).collect();
    assert_eq!(resumed, vec![4]);

    let by_subject: Vec<u64> = log
        .scan(ScanCriteria::all().subject("b"))
        .map(|e| e.sequence)
        .collect();
    assert_eq!(by_subject, vec![4]);
}

#[test]
fn snapshot_does_not_see_later_appends() {
    let log = EvidenceLog::in_memory();
    log.append(tick(0)).unwrap();
    let mut snap = log.snapshot(ScanCriteria::all());
    log.append(tick(1)).unwrap();
    assert_eq!(snap.next().map(|e| e.sequence), Some(1));
    assert!(snap.next().is_none());
}

#[test]
fn jsonl_log_survives_reopen_and_detects_tampering() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("evidence").join("log.jsonl");

    {
        let log = EvidenceLog::open(&path).unwrap();
        log.append(tick(0)).unwrap();
        log.append(rejection("k1")).unwrap();
    }

    let reopened = EvidenceLog::open(&path).unwrap();
    assert_eq!(reopened.count(), 2);
    assert_eq!(reopened.append(tick(2)).unwrap(), 3);
    assert!(
        matches!(
            reopened.append_unique(rejection("k1")).unwrap(),
            Appended::Existing(2)
        ),
        "record keys must be rebuilt on reopen"
    );
    assert_eq!(verify_jsonl(&path).unwrap(), VerifyResult::Valid { lines: 3 });

    drop(reopened);

    let content = std::fs::read_to_string(&path).unwrap();
    let tampered = content.replacen("NO_RULE", "NO_RULX", 1);
    std::fs::write(&path, tampered).unwrap();

    assert!(matches!(
        verify_jsonl(&path).unwrap(),
        VerifyResult::Broken { line: 2, .. }
    ));
    assert!(
        matches!(
            EvidenceLog::open(&path),
            Err(OpenError::ChainBroken { line: 2, .. })
        ),
        "broken chain must refuse to open"
    );
}

#[test]
fn second_writer_is_refused_until_first_closes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.jsonl");

    let first = EvidenceLog::open(&path).unwrap();
    first.append(tick(0)).unwrap();

    match EvidenceLog::open(&path) {
        Err(OpenError::Locked { path: locked }) => assert_eq!(locked, path),
        Err(other) => panic!("expected Locked, got {other}"),
        Ok(_) => panic!("two writers must not share one log"),
    }

    // Readers do not need the lock.
    let reader = EvidenceLog::open_read_only(&path).unwrap();
    assert_eq!(reader.count(), 1);

    first.append(tick(1)).unwrap();
    drop(first);

    let second = EvidenceLog::open(&path).unwrap();
    assert_eq!(second.append(tick(2)).unwrap(), 3);
    assert_eq!(verify_jsonl(&path).unwrap(), VerifyResult::Valid { lines: 3 });
}

#[test]
fn torn_final_line_is_truncated_on_open() {
    use std::io::Write;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.jsonl");
    {
        let log = EvidenceLog::open(&path).unwrap();
        log.append(tick(0)).unwrap();
        log.append(tick(1)).unwrap();
    }
    let clean_len = std::fs::metadata(&path).unwrap().len();
    {
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(br#"{"id":"0000","kind":"WATERMARK_ADV"#).unwrap();
    }

    let log = EvidenceLog::open(&path).unwrap();
    assert_eq!(log.count(), 2);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), clean_len);
    assert_eq!(log.append(tick(2)).unwrap(), 3);
    drop(log);

    assert_eq!(verify_jsonl(&path).unwrap(), VerifyResult::Valid { lines: 3 });
}

#[test]
fn unparseable_final_line_with_newline_is_truncated() {
    use std::io::Write;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.jsonl");
    {
        let log = EvidenceLog::open(&path).unwrap();
        log.append(tick(0)).unwrap();
    }
    {
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{\"half\":\n").unwrap();
    }
    let log = EvidenceLog::open(&path).unwrap();
    assert_eq!(log.count(), 1);
    assert_eq!(log.append(tick(1)).unwrap(), 2);
}

#[test]
fn corrupt_line_before_the_tail_refuses_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.jsonl");
    {
        let log = EvidenceLog::open(&path).unwrap();
        log.append(tick(0)).unwrap();
        log.append(tick(1)).unwrap();
    }
    let content = std::fs::read_to_string(&path).unwrap();
    let mut lines: Vec<&str> = content.lines().collect();
    lines[0] = "not json";
    std::fs::write(&path, format!("{}\n", lines.join("\n"))).unwrap();

    assert!(matches!(
        EvidenceLog::open(&path),
        Err(OpenError::Corrupt { line: 1, .. })
    ));
}

#[test]
fn read_only_log_refuses_appends() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.jsonl");
    {
        let log = EvidenceLog::open(&path).unwrap();
        log.append(tick(0)).unwrap();
    }
    let log = EvidenceLog::open_read_only(&path).unwrap();
    assert_eq!(log.count(), 1);
    assert_eq!(log.append(tick(1)), Err(AppendError::ReadOnly));
    assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 1);
}
