//! Scenario: competing links never merge identities.
//!
//! GREEN when:
//! - Two settlements carrying the same reference both link to one initiation
//! - Every canonical event survives as its own node in the flow
//! - Links are byte-identical when the same pairs are evaluated again
//! - Loading the rule set from JSON yields the same engine output

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use tenon_correlation::{CorrelationEngine, CorrelationRule, CorrelationRuleSet, FlowGraph};
use tenon_schemas::{
    CanonicalEvent, CorrelationEvidenceKind as K, Direction, EventType, LinkType, Resolved,
};
use uuid::Uuid;

fn event(n: u8, t: EventType, amount: i64, secs: i64) -> CanonicalEvent {
    CanonicalEvent {
        event_id: Uuid::from_bytes([n; 16]),
        source_system: "psp".to_string(),
        source_event_id: Some(format!("evt_{n}")),
        external_reference: Some("ORDER-7".to_string()),
        correlation_id: None,
        event_type: t,
        direction: Direction::Inbound,
        amount_micros: Resolved::Known(amount),
        currency: Resolved::Known("EUR".to_string()),
        observed_at: Utc.timestamp_opt(1_760_000_000 + secs, 0).unwrap(),
        source_timestamp: None,
        raw_payload_hash: format!("raw{n}"),
        lineage_links: vec![],
        normalizer_version: "1.0.0/psp@norm-v1".to_string(),
        adapter_version: "1".to_string(),
        unknown_fields: vec![],
    }
}

fn rule_set() -> CorrelationRuleSet {
    CorrelationRuleSet {
        engine_version: "corr-engine/1".to_string(),
        candidate_window_secs: 30 * 86_400,
        rules: vec![CorrelationRule {
            rule_id: "reference-match".to_string(),
            rule_version: "corr-v1".to_string(),
            link_type: LinkType::PotentialMatch,
            required: vec![K::ReferenceMatch],
            weights: BTreeMap::from([(K::ReferenceMatch, 6), (K::AmountExact, 3), (K::CurrencyMatch, 1)]),
            min_score_bps: 5000,
            amount_tolerance_bps: 500,
            time_window_secs: 86_400,
            lineage_types: vec![],
        }],
    }
}

fn build(engine: &CorrelationEngine) -> FlowGraph {
    let mut g = FlowGraph::new();
    for e in [
        event(1, EventType::PaymentInitiated, 50_000_000, 0),
        event(2, EventType::PaymentSettled, 50_000_000, 600),
        event(3, EventType::PaymentSettled, 50_000_000, 900),
    ] {
        let links = engine.correlate(&e, g.events());
        g.add_event(e);
        for l in links {
            g.add_link(l).unwrap();
        }
    }
    g
}

#[test]
fn competing_links_are_all_kept() {
    let engine = CorrelationEngine::new(rule_set()).unwrap();
    let g = build(&engine);

    let flows = g.flows();
    assert_eq!(flows.len(), 1);
    let flow = &flows[0];
    assert_eq!(flow.flow_id, format!("flow-{}", Uuid::from_bytes([1; 16])));
    assert_eq!(flow.events.len(), 3, "no event is merged away");
    // 1-2, 1-3 and 2-3 all share the reference
    assert_eq!(flow.links.len(), 3);
    for l in &flow.links {
        assert!(l.has_evidence(K::ReferenceMatch));
        assert_eq!(l.rule_version, "corr-v1");
    }
    let into_first: Vec<_> = flow
        .links
        .iter()
        .filter(|l| l.from_event_id == Uuid::from_bytes([1; 16]))
        .collect();
    assert_eq!(into_first.len(), 2, "both settlements link to the initiation");
}

#[test]
fn re_evaluation_is_identical() {
    let engine = CorrelationEngine::new(rule_set()).unwrap();
    let a = build(&engine).flows();
    let b = build(&engine).flows();
    assert_eq!(a, b);
}

#[test]
fn rule_set_loads_from_json() {
    let json = serde_json::to_string(&rule_set()).unwrap();
    let parsed: CorrelationRuleSet = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, rule_set());

    let bad = json.replace("\"min_score_bps\"", "\"min_score\"");
    assert!(serde_json::from_str::<CorrelationRuleSet>(&bad).is_err());
}
