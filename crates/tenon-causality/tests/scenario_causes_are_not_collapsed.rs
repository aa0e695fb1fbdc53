//! Scenario: multiple evidenced causes stay separate.
//!
//! GREEN when:
//! - Flagged ingest and competing links on one flow yield two attributions
//! - Each attribution names its own rule and supporting events
//! - The flagged decision ids are cited in the explanation

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use tenon_causality::{AttributionContext, CausalityAttributor, CausalityRuleSet};
use tenon_schemas::{
    CanonicalEvent, CauseType, Confidence, CorrelationLink, Direction, Discrepancy,
    DiscrepancyType, EventType, LinkType, MoneyFlow, MoneyState, MoneyStateKind, Resolved,
    SeverityHint,
};
use uuid::Uuid;

const RULES: &str = r#"
model_version: cause/1
min_confidence_bps: 3000
rules:
  - rule_id: flagged-ingest
    rule_version: cause-v1
    cause_type: SOURCE_INCONSISTENCY
    condition: { kind: FLAGGED_INGEST }
    confidence_bps: 8000
  - rule_id: competing-links
    rule_version: cause-v1
    cause_type: CORRELATION_AMBIGUITY
    applies_to: [STATUS_CONFLICT, DUPLICATE_EVENT]
    condition: { kind: COMPETING_LINKS }
    confidence_bps: 6000
  - rule_id: source-lag
    rule_version: cause-v1
    cause_type: SOURCE_DELAY
    condition: { kind: SOURCE_LAG, min_lag_secs: 3600 }
    confidence_bps: 6000
"#;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_760_000_000 + secs, 0).unwrap()
}

fn ev(n: u8) -> CanonicalEvent {
    CanonicalEvent {
        event_id: Uuid::from_bytes([n; 16]),
        source_system: "psp".to_string(),
        source_event_id: None,
        external_reference: Some("INV-9".to_string()),
        correlation_id: None,
        event_type: EventType::PaymentSettled,
        direction: Direction::Inbound,
        amount_micros: Resolved::Known(10_000_000),
        currency: Resolved::Known("USD".to_string()),
        observed_at: at(n as i64),
        source_timestamp: Some(at(n as i64)),
        raw_payload_hash: format!("h{n}"),
        lineage_links: vec![],
        normalizer_version: "n".to_string(),
        adapter_version: "1".to_string(),
        unknown_fields: vec![],
    }
}

fn link(id: u8, from: u8, to: u8) -> CorrelationLink {
    CorrelationLink {
        link_id: Uuid::from_bytes([id; 16]),
        from_event_id: Uuid::from_bytes([from; 16]),
        to_event_id: Uuid::from_bytes([to; 16]),
        link_type: LinkType::PotentialMatch,
        rule_id: "reference-match".to_string(),
        rule_version: "corr-v1".to_string(),
        evidence: vec![],
        confidence_score: Confidence::from_bps(7000),
        engine_version: "corr/1".to_string(),
        explanation: String::new(),
        created_at: at(0),
    }
}

#[test]
fn flagged_and_competing_causes_are_both_kept() {
    let flow = MoneyFlow {
        flow_id: format!("flow-{}", Uuid::from_bytes([1; 16])),
        events: vec![ev(1), ev(2), ev(3)],
        links: vec![link(10, 1, 2), link(11, 1, 3)],
    };
    let state = MoneyState {
        state_id: Uuid::from_bytes([0xAA; 16]),
        flow_id: flow.flow_id.clone(),
        current_state: MoneyStateKind::Ambiguous,
        state_version: 1,
        supporting_events: flow.event_ids(),
        supporting_links: flow.link_ids(),
        rule_version: "msm-v1".to_string(),
        machine_version: "msm/1".to_string(),
        confidence_level: Confidence::from_bps(2000),
        explanation: String::new(),
        evaluated_at: at(100),
        path: vec![MoneyStateKind::Expected],
        transition_rule_versions: vec![],
        observed_signals: vec![],
        unconsumed_signals: vec![],
    };
    let discrepancy = Discrepancy {
        discrepancy_id: Uuid::from_bytes([0xDD; 16]),
        flow_id: flow.flow_id.clone(),
        discrepancy_type: DiscrepancyType::StatusConflict,
        severity_hint: SeverityHint::High,
        supporting_states: vec![state.state_id],
        supporting_events: flow.event_ids(),
        supporting_links: flow.link_ids(),
        rule_id: "status-conflict".to_string(),
        rule_version: "diag-v1".to_string(),
        explanation: String::new(),
        detected_at: at(100),
    };
    let decision = Uuid::from_bytes([0xEE; 16]);
    let flagged = BTreeMap::from([(Uuid::from_bytes([2; 16]), vec![decision])]);

    let attributor =
        CausalityAttributor::new(serde_yaml::from_str::<CausalityRuleSet>(RULES).unwrap()).unwrap();
    let out = attributor.attribute(&AttributionContext {
        discrepancy: &discrepancy,
        state: &state,
        flow: &flow,
        flagged: &flagged,
        as_of: at(100),
    });

    let causes: Vec<CauseType> = out.iter().map(|a| a.cause_type).collect();
    assert_eq!(
        causes,
        vec![CauseType::CorrelationAmbiguity, CauseType::SourceInconsistency]
    );
    assert_eq!(out[0].supporting_events.len(), 3);
    assert_eq!(out[1].supporting_events, vec![Uuid::from_bytes([2; 16])]);
    assert!(out[1].explanation.contains(&decision.to_string()));
    assert!(out.iter().all(|a| a.discrepancy_id == discrepancy.discrepancy_id));
    assert!(out.iter().all(|a| a.model_version == "cause/1"));
}
