use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use tenon_evidence::{EvidenceEvent, EvidenceLog, EvidencePayload, ScanCriteria};
use tenon_schemas::{
    CanonicalEvent, CausalityAttribution, CorrelationLink, Discrepancy, MoneyState,
    NormalizationDiff,
};

/// Where a record sits in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EvidenceRef {
    pub evidence_id: Uuid,
    pub sequence: u64,
}

impl EvidenceRef {
    fn of(ev: &EvidenceEvent) -> Self {
        Self {
            evidence_id: ev.id,
            sequence: ev.sequence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowView {
    pub flow_id: String,
    pub latest_state: MoneyState,
    /// Every evaluation of the flow, oldest first.
    pub state_history: Vec<MoneyState>,
    pub events: Vec<CanonicalEvent>,
    pub links: Vec<CorrelationLink>,
    pub discrepancies: Vec<Discrepancy>,
    pub attributions: Vec<CausalityAttribution>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscrepancyView {
    pub discrepancy: Discrepancy,
    pub evidence: EvidenceRef,
    pub states: Vec<MoneyState>,
    pub attributions: Vec<CausalityAttribution>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventView {
    pub event: CanonicalEvent,
    pub diff: NormalizationDiff,
    pub evidence: EvidenceRef,
    /// Flow of the latest evaluation that included the event.
    pub flow_id: Option<String>,
    pub links: Vec<CorrelationLink>,
}

/// Read model rebuilt from the log. Point lookups only; it never writes.
#[derive(Debug, Clone, Default)]
pub struct Projection {
    next_sequence: u64,
    events: BTreeMap<Uuid, (CanonicalEvent, NormalizationDiff, EvidenceRef)>,
    links: BTreeMap<Uuid, CorrelationLink>,
    states: BTreeMap<Uuid, MoneyState>,
    states_by_flow: BTreeMap<String, Vec<Uuid>>,
    discrepancies: BTreeMap<Uuid, (Discrepancy, EvidenceRef)>,
    discrepancies_by_flow: BTreeMap<String, Vec<Uuid>>,
    attributions: BTreeMap<Uuid, Vec<CausalityAttribution>>,
    flow_of_event: BTreeMap<Uuid, String>,
}

impl Projection {
    pub fn build(log: &EvidenceLog) -> Self {
        let mut p = Self::default();
        p.catch_up(log);
        p
    }

    /// Apply everything committed since the last call. Returns the number of events read.
    pub fn catch_up(&mut self, log: &EvidenceLog) -> u64 {
        let mut read = 0;
        let from = self.next_sequence.max(1);
        for ev in log.snapshot(ScanCriteria::all().from_sequence(from)) {
            self.apply(&ev);
            self.next_sequence = ev.sequence + 1;
            read += 1;
        }
        read
    }

    fn apply(&mut self, ev: &EvidenceEvent) {
        match &ev.payload {
            EvidencePayload::CanonicalEventCommitted(c) => {
                self.events.insert(
                    c.event.event_id,
                    (c.event.clone(), c.diff.clone(), EvidenceRef::of(ev)),
                );
            }
            EvidencePayload::CorrelationLinked(l) => {
                self.links.insert(l.link_id, l.clone());
            }
            EvidencePayload::StateEvaluated(s) => {
                for event_id in &s.supporting_events {
                    self.flow_of_event.insert(*event_id, s.flow_id.clone());
                }
                self.states_by_flow
                    .entry(s.flow_id.clone())
                    .or_default()
                    .push(s.state_id);
                self.states.insert(s.state_id, s.clone());
            }
            EvidencePayload::DiscrepancyDetected(d) => {
                self.discrepancies_by_flow
                    .entry(d.flow_id.clone())
                    .or_default()
                    .push(d.discrepancy_id);
                self.discrepancies
                    .insert(d.discrepancy_id, (d.clone(), EvidenceRef::of(ev)));
            }
            EvidencePayload::CausalityAttributed(a) => {
                self.attributions
                    .entry(a.discrepancy_id)
                    .or_default()
                    .push(a.clone());
            }
            _ => {}
        }
    }

    /// Flows that have at least one state evaluation.
    pub fn flow_ids(&self) -> Vec<&str> {
        self.states_by_flow.keys().map(String::as_str).collect()
    }

    pub fn flow(&self, flow_id: &str) -> Option<FlowView> {
        let history: Vec<MoneyState> = self
            .states_by_flow
            .get(flow_id)?
            .iter()
            .filter_map(|id| self.states.get(id).cloned())
            .collect();
        let latest = history.last()?.clone();

        let events = latest
            .supporting_events
            .iter()
            .filter_map(|id| self.events.get(id).map(|(e, _, _)| e.clone()))
            .collect();
        let links = latest
            .supporting_links
            .iter()
            .filter_map(|id| self.links.get(id).cloned())
            .collect();
        let discrepancies: Vec<Discrepancy> = self
            .discrepancies_by_flow
            .get(flow_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.discrepancies.get(id).map(|(d, _)| d.clone()))
                    .collect()
            })
            .unwrap_or_default();
        let attributions = discrepancies
            .iter()
            .flat_map(|d| self.attributions_of(d.discrepancy_id))
            .collect();

        Some(FlowView {
            flow_id: flow_id.to_string(),
            latest_state: latest,
            state_history: history,
            events,
            links,
            discrepancies,
            attributions,
        })
    }

    pub fn discrepancy(&self, discrepancy_id: Uuid) -> Option<DiscrepancyView> {
        let (discrepancy, evidence) = self.discrepancies.get(&discrepancy_id)?;
        let states = discrepancy
            .supporting_states
            .iter()
            .filter_map(|id| self.states.get(id).cloned())
            .collect();
        Some(DiscrepancyView {
            discrepancy: discrepancy.clone(),
            evidence: *evidence,
            states,
            attributions: self.attributions_of(discrepancy_id),
        })
    }

    pub fn event(&self, event_id: Uuid) -> Option<EventView> {
        let (event, diff, evidence) = self.events.get(&event_id)?;
        let links = self
            .links
            .values()
            .filter(|l| l.touches(event_id))
            .cloned()
            .collect();
        Some(EventView {
            event: event.clone(),
            diff: diff.clone(),
            evidence: *evidence,
            flow_id: self.flow_of_event.get(&event_id).cloned(),
            links,
        })
    }

    fn attributions_of(&self, discrepancy_id: Uuid) -> Vec<CausalityAttribution> {
        self.attributions
            .get(&discrepancy_id)
            .cloned()
            .unwrap_or_default()
    }
}
