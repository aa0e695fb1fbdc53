use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeSet;
use std::fmt;

use tenon_schemas::{derive_id, Confidence, MoneyFlow, MoneyState, MoneyStateKind, Signal};

use crate::rules::{Transition, TransitionRuleSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    /// AMBIGUOUS and UNKNOWN are outcomes of the walk, never table entries.
    InconclusiveInTable { from: MoneyStateKind, to: MoneyStateKind },
    InconclusiveInitialState(MoneyStateKind),
    DuplicateTransition { from: MoneyStateKind, to: MoneyStateKind },
    SelfTransition(MoneyStateKind),
    NegativeTimeout { from: MoneyStateKind, to: MoneyStateKind },
}

impl fmt::Display for StateMachineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateMachineError::InconclusiveInTable { from, to } => {
                write!(f, "transition {from}->{to} names an inconclusive state")
            }
            StateMachineError::InconclusiveInitialState(s) => {
                write!(f, "initial state {s} is inconclusive")
            }
            StateMachineError::DuplicateTransition { from, to } => {
                write!(f, "transition {from}->{to} declared twice")
            }
            StateMachineError::SelfTransition(s) => write!(f, "self transition on {s}"),
            StateMachineError::NegativeTimeout { from, to } => {
                write!(f, "transition {from}->{to} has a negative timeout")
            }
        }
    }
}

impl std::error::Error for StateMachineError {}

#[derive(Debug, Clone)]
pub struct MoneyStateMachine {
    /// Transitions sorted by (from, to).
    set: TransitionRuleSet,
}

enum Walk<'a> {
    Reached(MoneyStateKind, Vec<&'a Transition>),
    Ambiguous(MoneyStateKind, Vec<&'a Transition>, Vec<MoneyStateKind>),
    Unknown,
}

impl MoneyStateMachine {
    pub fn new(mut set: TransitionRuleSet) -> Result<Self, StateMachineError> {
        if set.initial_state.is_inconclusive() {
            return Err(StateMachineError::InconclusiveInitialState(set.initial_state));
        }
        set.transitions.sort_by_key(|t| (t.from, t.to));
        let mut seen = BTreeSet::new();
        for t in &set.transitions {
            if t.from.is_inconclusive() || t.to.is_inconclusive() {
                return Err(StateMachineError::InconclusiveInTable { from: t.from, to: t.to });
            }
            if t.from == t.to {
                return Err(StateMachineError::SelfTransition(t.from));
            }
            if !seen.insert((t.from, t.to)) {
                return Err(StateMachineError::DuplicateTransition { from: t.from, to: t.to });
            }
            if t.timeout_policy.is_some_and(|p| p.min_inactive_secs < 0) {
                return Err(StateMachineError::NegativeTimeout { from: t.from, to: t.to });
            }
        }
        Ok(Self { set })
    }

    pub fn machine_version(&self) -> &str {
        &self.set.machine_version
    }

    pub fn rule_version(&self) -> &str {
        &self.set.rule_version
    }

    /// Version a transition was written under: its own, else the table's.
    pub fn transition_rule_version<'a>(&'a self, t: &'a Transition) -> &'a str {
        t.rule_version.as_deref().unwrap_or(&self.set.rule_version)
    }

    /// Every signal the flow exhibits under the configured maps.
    pub fn signals(&self, flow: &MoneyFlow) -> BTreeSet<Signal> {
        let mut out = BTreeSet::new();
        for e in &flow.events {
            if let Some(sigs) = self.set.event_signals.get(&e.event_type) {
                out.extend(sigs.iter().cloned());
            }
        }
        for l in &flow.links {
            if let Some(sigs) = self.set.link_signals.get(&l.link_type) {
                out.extend(sigs.iter().cloned());
            }
            for gap in &self.set.link_gap_signals {
                if l.link_type != gap.link_type || l.has_evidence(gap.missing) {
                    continue;
                }
                let in_scope = gap.between.is_empty()
                    || [l.from_event_id, l.to_event_id].iter().all(|id| {
                        flow.event(*id)
                            .is_some_and(|e| gap.between.contains(&e.event_type))
                    });
                if in_scope {
                    out.insert(gap.signal.clone());
                }
            }
        }
        out
    }

    fn enabled(t: &Transition, signals: &BTreeSet<Signal>, inactive_secs: i64) -> bool {
        t.required.iter().all(|s| signals.contains(s))
            && !t.forbidden.iter().any(|s| signals.contains(s))
            && t
                .timeout_policy
                .map_or(true, |p| inactive_secs >= p.min_inactive_secs)
    }

    fn walk(&self, signals: &BTreeSet<Signal>, inactive_secs: i64) -> Walk<'_> {
        let mut current = self.set.initial_state;
        let mut visited = vec![current];
        let mut taken: Vec<&Transition> = Vec::new();
        loop {
            let enabled: Vec<&Transition> = self
                .set
                .transitions
                .iter()
                .filter(|t| t.from == current && Self::enabled(t, signals, inactive_secs))
                .collect();
            match enabled.as_slice() {
                [] => break,
                [t] => {
                    if visited.contains(&t.to) {
                        break;
                    }
                    current = t.to;
                    visited.push(current);
                    taken.push(t);
                }
                many => {
                    let targets = many.iter().map(|t| t.to).collect();
                    return Walk::Ambiguous(current, taken, targets);
                }
            }
        }
        if taken.is_empty() {
            Walk::Unknown
        } else {
            Walk::Reached(current, taken)
        }
    }

    /// Evaluates `flow` at `as_of`. `state_version` is the caller's 1-based evaluation counter.
    pub fn evaluate(&self, flow: &MoneyFlow, as_of: DateTime<Utc>, state_version: u32) -> MoneyState {
        let signals = self.signals(flow);
        let inactive_secs = flow
            .last_observed_at()
            .map_or(0, |t| (as_of - t).num_seconds());

        let initial = self.set.initial_state;
        let (kind, taken, confidence, explanation) = match self.walk(&signals, inactive_secs) {
            Walk::Reached(kind, taken) => {
                let confidence = taken
                    .iter()
                    .map(|t| t.confidence_bps)
                    .min()
                    .unwrap_or(Confidence::ZERO);
                let explanation = format!("{kind} via {}", render_path(initial, &taken));
                (kind, taken, confidence, explanation)
            }
            Walk::Ambiguous(at, taken, targets) => {
                let names: Vec<&str> = targets.iter().map(|t| t.as_str()).collect();
                let explanation = format!(
                    "AMBIGUOUS at {at} after {}: competing transitions to [{}]",
                    render_path(initial, &taken),
                    names.join(", ")
                );
                (
                    MoneyStateKind::Ambiguous,
                    taken,
                    self.set.ambiguous_confidence,
                    explanation,
                )
            }
            Walk::Unknown => (
                MoneyStateKind::Unknown,
                Vec::new(),
                self.set.unknown_confidence,
                format!("UNKNOWN: no transition out of {initial} is enabled"),
            ),
        };

        let mut path = vec![initial];
        path.extend(taken.iter().map(|t| t.to));
        let transition_rule_versions: Vec<String> = taken
            .iter()
            .map(|t| self.transition_rule_version(t).to_string())
            .collect();

        let consumed: BTreeSet<&Signal> = taken.iter().flat_map(|t| t.required.iter()).collect();
        let unconsumed: Vec<Signal> = signals
            .iter()
            .filter(|s| !consumed.contains(s))
            .cloned()
            .collect();
        let observed: Vec<Signal> = signals.into_iter().collect();

        let events = flow.event_ids();
        let links = flow.link_ids();
        let (event_part, link_part) = (join_ids(&events), join_ids(&links));
        let as_of_part = as_of.to_rfc3339_opts(SecondsFormat::Micros, true);
        let transitions_part = transition_rule_versions.join(",");
        let state_id = derive_id(
            "state",
            &[
                flow.flow_id.as_str(),
                self.set.machine_version.as_str(),
                self.set.rule_version.as_str(),
                transitions_part.as_str(),
                event_part.as_str(),
                link_part.as_str(),
                as_of_part.as_str(),
            ],
        );

        let sig_names: Vec<&str> = observed.iter().map(|s| s.as_str()).collect();
        MoneyState {
            state_id,
            flow_id: flow.flow_id.clone(),
            current_state: kind,
            state_version,
            supporting_events: events,
            supporting_links: links,
            rule_version: self.set.rule_version.clone(),
            machine_version: self.set.machine_version.clone(),
            confidence_level: confidence,
            explanation: format!("{explanation}; signals [{}]", sig_names.join(", ")),
            evaluated_at: as_of,
            path,
            transition_rule_versions,
            observed_signals: observed,
            unconsumed_signals: unconsumed,
        }
    }
}

fn render_path(initial: MoneyStateKind, taken: &[&Transition]) -> String {
    let mut s = initial.as_str().to_string();
    for t in taken {
        s.push_str(" -> ");
        s.push_str(t.to.as_str());
    }
    s
}

fn join_ids(ids: &[uuid::Uuid]) -> String {
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",")
}
