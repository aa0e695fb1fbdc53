use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

use tenon_schemas::{
    derive_id, CausalityAttribution, CauseType, Confidence, Discrepancy, EventType, MoneyFlow,
    MoneyState, CAUSALITY_FALLBACK_RULE,
};

use crate::rules::{CausalityRule, CausalityRuleSet, CauseCondition};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CausalityError {
    DuplicateRule { rule_id: String, rule_version: String },
    /// UNKNOWN_CAUSE is only ever produced by the fallback.
    ReservedCause { rule_id: String },
}

impl fmt::Display for CausalityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CausalityError::DuplicateRule {
                rule_id,
                rule_version,
            } => write!(f, "causality rule {rule_id}@{rule_version} declared twice"),
            CausalityError::ReservedCause { rule_id } => {
                write!(f, "causality rule {rule_id} targets UNKNOWN_CAUSE, which is reserved")
            }
        }
    }
}

impl std::error::Error for CausalityError {}

/// Everything one attribution pass may look at.
#[derive(Debug, Clone, Copy)]
pub struct AttributionContext<'a> {
    pub discrepancy: &'a Discrepancy,
    pub state: &'a MoneyState,
    pub flow: &'a MoneyFlow,
    /// Flow events whose subject also received FLAG_AMBIGUOUS decisions,
    /// mapped to those decisions' evidence ids.
    pub flagged: &'a BTreeMap<Uuid, Vec<Uuid>>,
    pub as_of: DateTime<Utc>,
}

struct Finding {
    events: BTreeSet<Uuid>,
    detail: String,
}

#[derive(Debug, Clone)]
pub struct CausalityAttributor {
    model_version: String,
    min_confidence: Confidence,
    /// Sorted by (rule_id, rule_version).
    rules: Vec<CausalityRule>,
}

impl CausalityAttributor {
    pub fn new(set: CausalityRuleSet) -> Result<Self, CausalityError> {
        let mut rules = set.rules;
        rules.sort_by(|a, b| {
            a.rule_id
                .cmp(&b.rule_id)
                .then_with(|| a.rule_version.cmp(&b.rule_version))
        });
        let mut seen = BTreeSet::new();
        for r in &rules {
            if !seen.insert((r.rule_id.as_str(), r.rule_version.as_str())) {
                return Err(CausalityError::DuplicateRule {
                    rule_id: r.rule_id.clone(),
                    rule_version: r.rule_version.clone(),
                });
            }
            if r.cause_type == CauseType::UnknownCause {
                return Err(CausalityError::ReservedCause {
                    rule_id: r.rule_id.clone(),
                });
            }
        }
        Ok(Self {
            model_version: set.model_version,
            min_confidence: set.min_confidence_bps,
            rules,
        })
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    /// Attributions for one discrepancy, in rule order. Empty only for NO_DISCREPANCY.
    pub fn attribute(&self, ctx: &AttributionContext<'_>) -> Vec<CausalityAttribution> {
        let d = ctx.discrepancy;
        if !d.discrepancy_type.is_deviation() {
            return Vec::new();
        }

        let mut out = Vec::new();
        for rule in &self.rules {
            if !rule.applies_to.is_empty() && !rule.applies_to.contains(&d.discrepancy_type) {
                continue;
            }
            if rule.confidence_bps < self.min_confidence {
                continue;
            }
            let Some(found) = check(&rule.condition, ctx) else {
                continue;
            };
            out.push(self.record(
                ctx,
                rule.cause_type,
                rule.confidence_bps,
                vec![
                    format!("{}@{}", d.rule_id, d.rule_version),
                    format!("{}@{}", rule.rule_id, rule.rule_version),
                ],
                &rule.rule_id,
                &rule.rule_version,
                found,
            ));
        }

        if out.is_empty() {
            let found = Finding {
                events: d.supporting_events.iter().copied().collect(),
                detail: "no causal rule found sufficient evidence".to_string(),
            };
            out.push(self.record(
                ctx,
                CauseType::UnknownCause,
                Confidence::ZERO,
                vec![CAUSALITY_FALLBACK_RULE.to_string()],
                CAUSALITY_FALLBACK_RULE,
                &self.model_version,
                found,
            ));
        }
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        ctx: &AttributionContext<'_>,
        cause_type: CauseType,
        confidence: Confidence,
        supporting_rules: Vec<String>,
        rule_id: &str,
        rule_version: &str,
        found: Finding,
    ) -> CausalityAttribution {
        let d = ctx.discrepancy;
        let discrepancy_id = d.discrepancy_id.to_string();
        let mut states: BTreeSet<Uuid> = d.supporting_states.iter().copied().collect();
        states.insert(ctx.state.state_id);
        CausalityAttribution {
            causality_id: derive_id(
                "causality",
                &[
                    discrepancy_id.as_str(),
                    rule_id,
                    rule_version,
                    cause_type.as_str(),
                ],
            ),
            discrepancy_id: d.discrepancy_id,
            cause_type,
            confidence_level: confidence,
            supporting_events: found.events.into_iter().collect(),
            supporting_states: states.into_iter().collect(),
            supporting_rules,
            explanation: format!(
                "{cause_type} for {} ({}): {}",
                d.discrepancy_type, d.flow_id, found.detail
            ),
            attributed_at: ctx.as_of,
            model_version: self.model_version.clone(),
        }
    }
}

fn check(condition: &CauseCondition, ctx: &AttributionContext<'_>) -> Option<Finding> {
    let flow = ctx.flow;
    let collect = |pred: &dyn Fn(&tenon_schemas::CanonicalEvent) -> bool| -> BTreeSet<Uuid> {
        flow.events.iter().filter(|e| pred(e)).map(|e| e.event_id).collect()
    };
    let non_empty = |events: BTreeSet<Uuid>, detail: String| {
        (!events.is_empty()).then_some(Finding { events, detail })
    };

    match condition {
        CauseCondition::Always => Some(Finding {
            events: ctx.discrepancy.supporting_events.iter().copied().collect(),
            detail: format!("rule applies to every {}", ctx.discrepancy.discrepancy_type),
        }),
        CauseCondition::UnresolvedFields => {
            let mut fields = BTreeSet::new();
            let events = collect(&|e| e.unknown_fields.iter().any(|f| f != "event_type"));
            for e in flow.events.iter().filter(|e| events.contains(&e.event_id)) {
                fields.extend(
                    e.unknown_fields
                        .iter()
                        .filter(|f| f.as_str() != "event_type")
                        .map(String::as_str),
                );
            }
            let names: Vec<&str> = fields.into_iter().collect();
            non_empty(events, format!("unresolved fields [{}]", names.join(", ")))
        }
        CauseCondition::UnmappedEventType => non_empty(
            collect(&|e| e.event_type == EventType::Unknown),
            "event type outside the closed set".to_string(),
        ),
        CauseCondition::FlaggedIngest => {
            let events: BTreeSet<Uuid> = ctx
                .flagged
                .iter()
                .filter(|(id, decisions)| !decisions.is_empty() && flow.event(**id).is_some())
                .map(|(id, _)| *id)
                .collect();
            let decisions: BTreeSet<String> = ctx
                .flagged
                .iter()
                .filter(|(id, _)| events.contains(id))
                .flat_map(|(_, ds)| ds.iter().map(|d| d.to_string()))
                .collect();
            let decisions: Vec<String> = decisions.into_iter().collect();
            non_empty(
                events,
                format!("conflicting observations flagged by [{}]", decisions.join(", ")),
            )
        }
        CauseCondition::CompetingLinks => {
            let mut counterparts: BTreeMap<(Uuid, tenon_schemas::LinkType), BTreeSet<Uuid>> =
                BTreeMap::new();
            for l in &flow.links {
                counterparts
                    .entry((l.from_event_id, l.link_type))
                    .or_default()
                    .insert(l.to_event_id);
                counterparts
                    .entry((l.to_event_id, l.link_type))
                    .or_default()
                    .insert(l.from_event_id);
            }
            let mut events = BTreeSet::new();
            for ((id, _), others) in counterparts.iter().filter(|(_, o)| o.len() > 1) {
                events.insert(*id);
                events.extend(others.iter().copied());
            }
            let n = events.len();
            non_empty(events, format!("{n} events joined by competing links"))
        }
        CauseCondition::SourceLag { min_lag_secs } => {
            let events = collect(&|e| {
                e.source_timestamp
                    .is_some_and(|t| (e.observed_at - t).num_seconds() >= *min_lag_secs)
            });
            non_empty(events, format!("observed at least {min_lag_secs}s after source time"))
        }
        CauseCondition::StateGap => {
            let s = ctx.state;
            if s.unconsumed_signals.is_empty() && !s.current_state.is_inconclusive() {
                return None;
            }
            let names: Vec<&str> = s.unconsumed_signals.iter().map(|x| x.as_str()).collect();
            Some(Finding {
                events: s.supporting_events.iter().copied().collect(),
                detail: format!(
                    "{} with unexplained signals [{}]",
                    s.current_state,
                    names.join(", ")
                ),
            })
        }
        CauseCondition::AdapterVersionDrift => {
            let mut by_source: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
            for e in &flow.events {
                by_source
                    .entry(e.source_system.as_str())
                    .or_default()
                    .insert(e.adapter_version.as_str());
            }
            let drifting: BTreeSet<&str> = by_source
                .iter()
                .filter(|(_, v)| v.len() > 1)
                .map(|(s, _)| *s)
                .collect();
            let events = collect(&|e| drifting.contains(e.source_system.as_str()));
            let names: Vec<&str> = drifting.into_iter().collect();
            non_empty(events, format!("adapter version changed for [{}]", names.join(", ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tenon_schemas::{
        CanonicalEvent, Direction, DiscrepancyType, MoneyStateKind, Resolved, SeverityHint, Signal,
    };

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_760_000_000 + secs, 0).unwrap()
    }

    fn ev(n: u8, adapter: &str, unknown: &[&str]) -> CanonicalEvent {
        CanonicalEvent {
            event_id: Uuid::from_bytes([n; 16]),
            source_system: "psp".to_string(),
            source_event_id: Some(format!("e{n}")),
            external_reference: None,
            correlation_id: None,
            event_type: EventType::PaymentInitiated,
            direction: Direction::Inbound,
            amount_micros: Resolved::Unknown,
            currency: Resolved::Known("USD".to_string()),
            observed_at: at(n as i64),
            source_timestamp: None,
            raw_payload_hash: String::new(),
            lineage_links: vec![],
            normalizer_version: String::new(),
            adapter_version: adapter.to_string(),
            unknown_fields: unknown.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn fixture(events: Vec<CanonicalEvent>, ty: DiscrepancyType) -> (MoneyFlow, MoneyState, Discrepancy) {
        let flow = MoneyFlow {
            flow_id: "flow-x".to_string(),
            events,
            links: vec![],
        };
        let state = MoneyState {
            state_id: Uuid::from_bytes([0xAA; 16]),
            flow_id: flow.flow_id.clone(),
            current_state: MoneyStateKind::Initiated,
            state_version: 1,
            supporting_events: flow.event_ids(),
            supporting_links: vec![],
            rule_version: "msm-v1".to_string(),
            machine_version: "msm/1".to_string(),
            confidence_level: Confidence::from_bps(9000),
            explanation: String::new(),
            evaluated_at: at(0),
            path: vec![],
            transition_rule_versions: vec![],
            observed_signals: vec![Signal::new("INITIATION_SIGNAL")],
            unconsumed_signals: vec![],
        };
        let discrepancy = Discrepancy {
            discrepancy_id: Uuid::from_bytes([0xDD; 16]),
            flow_id: flow.flow_id.clone(),
            discrepancy_type: ty,
            severity_hint: SeverityHint::Medium,
            supporting_states: vec![state.state_id],
            supporting_events: flow.event_ids(),
            supporting_links: vec![],
            rule_id: "orphan".to_string(),
            rule_version: "diag-v1".to_string(),
            explanation: String::new(),
            detected_at: at(0),
        };
        (flow, state, discrepancy)
    }

    fn attributor() -> CausalityAttributor {
        let rule = |id: &str, cause, applies_to: Vec<DiscrepancyType>, condition, bps| CausalityRule {
            rule_id: id.to_string(),
            rule_version: "cause-v1".to_string(),
            cause_type: cause,
            applies_to,
            condition,
            confidence_bps: Confidence::from_bps(bps),
        };
        CausalityAttributor::new(CausalityRuleSet {
            model_version: "cause/1".to_string(),
            min_confidence_bps: Confidence::from_bps(3000),
            rules: vec![
                rule(
                    "unresolved",
                    CauseType::NormalizationLoss,
                    vec![],
                    CauseCondition::UnresolvedFields,
                    7000,
                ),
                rule(
                    "adapter-drift",
                    CauseType::ExternalSystemChange,
                    vec![],
                    CauseCondition::AdapterVersionDrift,
                    5000,
                ),
                rule(
                    "weak-orphan",
                    CauseType::CorrelationAmbiguity,
                    vec![DiscrepancyType::OrphanEvent],
                    CauseCondition::Always,
                    1000,
                ),
            ],
        })
        .unwrap()
    }

    #[test]
    fn independent_rules_each_emit() {
        let (flow, state, d) = fixture(
            vec![ev(1, "1", &["amount"]), ev(2, "2", &[])],
            DiscrepancyType::AmountMismatch,
        );
        let flagged = BTreeMap::new();
        let ctx = AttributionContext {
            discrepancy: &d,
            state: &state,
            flow: &flow,
            flagged: &flagged,
            as_of: at(100),
        };
        let out = attributor().attribute(&ctx);
        let causes: Vec<_> = out.iter().map(|a| a.cause_type).collect();
        assert_eq!(causes, vec![CauseType::ExternalSystemChange, CauseType::NormalizationLoss]);
        assert_eq!(out[1].supporting_events, vec![Uuid::from_bytes([1; 16])]);
        assert!(out[1].supporting_rules.contains(&"unresolved@cause-v1".to_string()));
        assert!(out[1].supporting_rules.contains(&"orphan@diag-v1".to_string()));
        assert_ne!(out[0].causality_id, out[1].causality_id);
    }

    #[test]
    fn weak_evidence_falls_back_to_unknown_cause() {
        let (flow, state, d) = fixture(vec![ev(1, "1", &[])], DiscrepancyType::OrphanEvent);
        let flagged = BTreeMap::new();
        let ctx = AttributionContext {
            discrepancy: &d,
            state: &state,
            flow: &flow,
            flagged: &flagged,
            as_of: at(100),
        };
        let out = attributor().attribute(&ctx);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].cause_type, CauseType::UnknownCause);
        assert_eq!(out[0].confidence_level, Confidence::ZERO);
        assert_eq!(out[0].supporting_rules, vec![CAUSALITY_FALLBACK_RULE.to_string()]);
    }

    #[test]
    fn no_discrepancy_is_not_attributed() {
        let (flow, state, d) = fixture(vec![ev(1, "1", &["amount"])], DiscrepancyType::NoDiscrepancy);
        let flagged = BTreeMap::new();
        let ctx = AttributionContext {
            discrepancy: &d,
            state: &state,
            flow: &flow,
            flagged: &flagged,
            as_of: at(100),
        };
        assert!(attributor().attribute(&ctx).is_empty());
    }
}
