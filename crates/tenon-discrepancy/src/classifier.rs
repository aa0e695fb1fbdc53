use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

use tenon_schemas::{
    derive_id, CanonicalEvent, CorrelationLink, Discrepancy, DiscrepancyType, MoneyFlow, MoneyState,
    Resolved, SeverityHint,
};

use crate::rules::{Condition, DiscrepancyRule, DiscrepancyRuleSet};

/// Rule id stamped on INSUFFICIENT_EVIDENCE records.
pub const FALLBACK_RULE_ID: &str = "discrepancy-classifier-fallback";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscrepancyError {
    DuplicateRule { rule_id: String, rule_version: String },
    /// INSUFFICIENT_EVIDENCE is the classifier's own outcome, not a rule target.
    ReservedType { rule_id: String },
    /// NO_DISCREPANCY must be reported from a state condition.
    NoDiscrepancyCondition { rule_id: String },
}

impl fmt::Display for DiscrepancyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscrepancyError::DuplicateRule {
                rule_id,
                rule_version,
            } => write!(f, "discrepancy rule {rule_id}@{rule_version} declared twice"),
            DiscrepancyError::ReservedType { rule_id } => write!(
                f,
                "discrepancy rule {rule_id} targets INSUFFICIENT_EVIDENCE, which is reserved"
            ),
            DiscrepancyError::NoDiscrepancyCondition { rule_id } => write!(
                f,
                "discrepancy rule {rule_id} reports NO_DISCREPANCY without a STATE_IN condition"
            ),
        }
    }
}

impl std::error::Error for DiscrepancyError {}

/// Evidence a condition matched on.
struct Witness {
    events: BTreeSet<Uuid>,
    links: BTreeSet<Uuid>,
    detail: String,
}

impl Witness {
    fn whole(flow: &MoneyFlow, detail: String) -> Self {
        Self {
            events: flow.events.iter().map(|e| e.event_id).collect(),
            links: flow.links.iter().map(|l| l.link_id).collect(),
            detail,
        }
    }

    fn link(l: &CorrelationLink, detail: String) -> Self {
        Self {
            events: [l.from_event_id, l.to_event_id].into(),
            links: [l.link_id].into(),
            detail,
        }
    }

    fn absorb(&mut self, other: Witness) {
        self.events.extend(other.events);
        self.links.extend(other.links);
        self.detail.push_str("; ");
        self.detail.push_str(&other.detail);
    }
}

fn merge(found: Vec<Witness>) -> Option<Witness> {
    let mut it = found.into_iter();
    let mut first = it.next()?;
    for w in it {
        first.absorb(w);
    }
    Some(first)
}

fn effective_time(e: &CanonicalEvent) -> DateTime<Utc> {
    e.source_timestamp.unwrap_or(e.observed_at)
}

#[derive(Debug, Clone)]
pub struct DiscrepancyClassifier {
    classifier_version: String,
    rule_version: String,
    /// Sorted by (rule_id, rule_version).
    rules: Vec<DiscrepancyRule>,
}

impl DiscrepancyClassifier {
    pub fn new(set: DiscrepancyRuleSet) -> Result<Self, DiscrepancyError> {
        let mut rules = set.rules;
        rules.sort_by(|a, b| {
            a.rule_id
                .cmp(&b.rule_id)
                .then_with(|| a.rule_version.cmp(&b.rule_version))
        });
        let mut seen = BTreeSet::new();
        for r in &rules {
            if !seen.insert((r.rule_id.as_str(), r.rule_version.as_str())) {
                return Err(DiscrepancyError::DuplicateRule {
                    rule_id: r.rule_id.clone(),
                    rule_version: r.rule_version.clone(),
                });
            }
            if r.discrepancy_type == DiscrepancyType::InsufficientEvidence {
                return Err(DiscrepancyError::ReservedType {
                    rule_id: r.rule_id.clone(),
                });
            }
            if r.discrepancy_type == DiscrepancyType::NoDiscrepancy
                && !matches!(r.condition, Condition::StateIn { .. })
            {
                return Err(DiscrepancyError::NoDiscrepancyCondition {
                    rule_id: r.rule_id.clone(),
                });
            }
        }
        Ok(Self {
            classifier_version: set.classifier_version,
            rule_version: set.rule_version,
            rules,
        })
    }

    pub fn classifier_version(&self) -> &str {
        &self.classifier_version
    }

    pub fn rule_version(&self) -> &str {
        &self.rule_version
    }

    /// Classifies one state evaluation of `flow`. Never returns an empty list.
    pub fn classify(&self, flow: &MoneyFlow, state: &MoneyState, as_of: DateTime<Utc>) -> Vec<Discrepancy> {
        let mut deviations = Vec::new();
        let mut clean = Vec::new();
        for rule in &self.rules {
            let Some(w) = self.check(&rule.condition, flow, state, as_of) else {
                continue;
            };
            let d = self.record(
                flow,
                state,
                rule.discrepancy_type,
                rule.severity_hint,
                &rule.rule_id,
                &rule.rule_version,
                w,
                as_of,
            );
            if rule.discrepancy_type.is_deviation() {
                deviations.push(d);
            } else {
                clean.push(d);
            }
        }

        if !deviations.is_empty() {
            return deviations;
        }
        if !clean.is_empty() {
            return clean;
        }
        let w = Witness::whole(
            flow,
            format!("no rule matched state {}", state.current_state),
        );
        vec![self.record(
            flow,
            state,
            DiscrepancyType::InsufficientEvidence,
            SeverityHint::Unknown,
            FALLBACK_RULE_ID,
            &self.rule_version,
            w,
            as_of,
        )]
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        flow: &MoneyFlow,
        state: &MoneyState,
        discrepancy_type: DiscrepancyType,
        severity_hint: SeverityHint,
        rule_id: &str,
        rule_version: &str,
        w: Witness,
        as_of: DateTime<Utc>,
    ) -> Discrepancy {
        let state_id = state.state_id.to_string();
        Discrepancy {
            discrepancy_id: derive_id(
                "discrepancy",
                &[
                    flow.flow_id.as_str(),
                    state_id.as_str(),
                    rule_id,
                    rule_version,
                    discrepancy_type.as_str(),
                ],
            ),
            flow_id: flow.flow_id.clone(),
            discrepancy_type,
            severity_hint,
            supporting_states: vec![state.state_id],
            supporting_events: w.events.into_iter().collect(),
            supporting_links: w.links.into_iter().collect(),
            rule_id: rule_id.to_string(),
            rule_version: rule_version.to_string(),
            explanation: format!(
                "{discrepancy_type} by {rule_id}@{rule_version} on {} state {}: {}",
                flow.flow_id, state.current_state, w.detail
            ),
            detected_at: as_of,
        }
    }

    fn check(
        &self,
        condition: &Condition,
        flow: &MoneyFlow,
        state: &MoneyState,
        as_of: DateTime<Utc>,
    ) -> Option<Witness> {
        match condition {
            Condition::AmountMismatch { link_types } => {
                merge(self.link_pairs(flow, link_types, |a, b| match (&a.amount_micros, &b.amount_micros) {
                    (Resolved::Known(x), Resolved::Known(y)) if x.unsigned_abs() != y.unsigned_abs() => {
                        Some(format!("amount {} vs {} micros", x.unsigned_abs(), y.unsigned_abs()))
                    }
                    _ => None,
                }))
            }
            Condition::CurrencyMismatch { link_types } => {
                merge(self.link_pairs(flow, link_types, |a, b| match (&a.currency, &b.currency) {
                    (Resolved::Known(x), Resolved::Known(y)) if x != y => {
                        Some(format!("currency {x} vs {y}"))
                    }
                    _ => None,
                }))
            }
            Condition::DuplicateEvent => {
                let mut groups: BTreeMap<_, Vec<Uuid>> = BTreeMap::new();
                for e in &flow.events {
                    let Some(reference) = e.external_reference.as_deref() else {
                        continue;
                    };
                    let key = (
                        e.source_system.as_str(),
                        e.event_type,
                        reference,
                        e.amount_micros.known().copied(),
                        e.currency.known().map(String::as_str),
                    );
                    groups.entry(key).or_default().push(e.event_id);
                }
                let found = groups
                    .into_iter()
                    .filter(|(_, ids)| ids.len() > 1)
                    .map(|((source, ty, reference, _, _), ids)| Witness {
                        detail: format!("{} x {ty} from {source} for {reference}", ids.len()),
                        events: ids.into_iter().collect(),
                        links: BTreeSet::new(),
                    })
                    .collect();
                merge(found)
            }
            Condition::StatusConflict => (state.current_state
                == tenon_schemas::MoneyStateKind::Ambiguous)
                .then(|| Witness::whole(flow, state.explanation.clone())),
            Condition::UnexpectedReversal {
                event_types,
                unless_states,
            } => {
                if unless_states.contains(&state.current_state) {
                    return None;
                }
                let ids: BTreeSet<Uuid> = flow
                    .events
                    .iter()
                    .filter(|e| event_types.contains(&e.event_type))
                    .map(|e| e.event_id)
                    .collect();
                (!ids.is_empty()).then(|| Witness {
                    detail: format!("{} reversal event(s) in state {}", ids.len(), state.current_state),
                    events: ids,
                    links: BTreeSet::new(),
                })
            }
            Condition::Orphan { min_age_secs } => {
                if !flow.is_singleton() {
                    return None;
                }
                let age = (as_of - flow.first_observed_at()?).num_seconds();
                (age >= *min_age_secs)
                    .then(|| Witness::whole(flow, format!("unlinked for {age}s (window {min_age_secs}s)")))
            }
            Condition::MissingEvent { min_inactive_secs } => {
                if flow.is_singleton()
                    || state.current_state.is_final()
                    || state.current_state.is_inconclusive()
                {
                    return None;
                }
                let idle = (as_of - flow.last_observed_at()?).num_seconds();
                (idle >= *min_inactive_secs).then(|| {
                    Witness::whole(
                        flow,
                        format!("no progress past {} for {idle}s", state.current_state),
                    )
                })
            }
            Condition::TimingDelay { max_span_secs } => {
                if !state.current_state.is_final() {
                    return None;
                }
                let first = flow.events.iter().map(effective_time).min()?;
                let last = flow.events.iter().map(effective_time).max()?;
                let span = (last - first).num_seconds();
                (span > *max_span_secs).then(|| {
                    Witness::whole(flow, format!("lifecycle took {span}s (limit {max_span_secs}s)"))
                })
            }
            Condition::UnconsumedSignals { signals } => {
                if state.current_state.is_inconclusive() {
                    return None;
                }
                let hits: Vec<&str> = state
                    .unconsumed_signals
                    .iter()
                    .filter(|s| signals.is_empty() || signals.contains(s))
                    .map(|s| s.as_str())
                    .collect();
                (!hits.is_empty()).then(|| {
                    Witness::whole(
                        flow,
                        format!("signals [{}] not explained by {}", hits.join(", "), state.current_state),
                    )
                })
            }
            Condition::StateIn { states } => states
                .contains(&state.current_state)
                .then(|| Witness::whole(flow, format!("state {}", state.current_state))),
        }
    }

    fn link_pairs(
        &self,
        flow: &MoneyFlow,
        link_types: &[tenon_schemas::LinkType],
        differs: impl Fn(&CanonicalEvent, &CanonicalEvent) -> Option<String>,
    ) -> Vec<Witness> {
        flow.links
            .iter()
            .filter(|l| link_types.is_empty() || link_types.contains(&l.link_type))
            .filter_map(|l| {
                let a = flow.event(l.from_event_id)?;
                let b = flow.event(l.to_event_id)?;
                differs(a, b).map(|detail| Witness::link(l, detail))
            })
            .collect()
    }
}
