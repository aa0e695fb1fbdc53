use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use tenon_causality::{AttributionContext, CausalityAttributor};
use tenon_config::Engines;
use tenon_correlation::{CorrelationEngine, CorrelationError, FlowGraph};
use tenon_discrepancy::DiscrepancyClassifier;
use tenon_evidence::{
    AppendError, Appended, EvidenceDraft, EvidenceEvent, EvidenceKind, EvidenceLog,
    EvidencePayload, ScanCriteria,
};
use tenon_schemas::{
    CanonicalEvent, IdempotencyDecision, IdempotencyRecord, MoneyFlow, MoneyState, Watermark,
};
use tenon_state::MoneyStateMachine;

const PRODUCER: &str = "deriver";

/// Counts of records newly appended by one [`Deriver::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeriveReport {
    pub scanned: u64,
    pub links: usize,
    pub states: usize,
    pub discrepancies: usize,
    pub attributions: usize,
    /// Sequence the next run starts from.
    pub next_sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeriveError {
    Append(AppendError),
    Graph(CorrelationError),
    /// The log returned something it should not have (missing sequence).
    Corrupt(String),
}

impl fmt::Display for DeriveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeriveError::Append(e) => write!(f, "derived record not committed: {e}"),
            DeriveError::Graph(e) => write!(f, "flow graph rejected link: {e}"),
            DeriveError::Corrupt(m) => write!(f, "evidence log inconsistent: {m}"),
        }
    }
}

impl std::error::Error for DeriveError {}

impl From<AppendError> for DeriveError {
    fn from(e: AppendError) -> Self {
        DeriveError::Append(e)
    }
}

impl From<CorrelationError> for DeriveError {
    fn from(e: CorrelationError) -> Self {
        DeriveError::Graph(e)
    }
}

#[derive(Debug, Clone)]
struct LastState {
    state: MoneyState,
    evidence_id: Uuid,
}

/// Consumer of the log that turns committed canonical events, guardian decisions and
/// watermarks into links, states, discrepancies and attributions.
///
/// Every input event is processed to completion before the next one, so the derived
/// records are a function of the log prefix only (not of how runs are batched).
/// A fresh deriver re-derives from sequence 1; records already committed are not
/// written again.
pub struct Deriver {
    log: Arc<EvidenceLog>,
    correlation: CorrelationEngine,
    machine: MoneyStateMachine,
    classifier: DiscrepancyClassifier,
    attributor: CausalityAttributor,

    next_sequence: u64,
    graph: FlowGraph,
    commit_evidence: BTreeMap<Uuid, Uuid>,
    link_evidence: BTreeMap<Uuid, Uuid>,
    watermark: Option<(DateTime<Utc>, Uuid)>,
    /// ACCEPT_FIRST decision evidence id -> idempotency key.
    accepted: BTreeMap<Uuid, String>,
    /// Canonical event id -> FLAG_AMBIGUOUS decisions on its subject.
    flagged: BTreeMap<Uuid, Vec<Uuid>>,
    last_state: BTreeMap<String, LastState>,
}

impl Deriver {
    pub fn new(log: Arc<EvidenceLog>, engines: &Engines) -> Self {
        Self {
            log,
            correlation: engines.correlation.clone(),
            machine: engines.state.clone(),
            classifier: engines.discrepancy.clone(),
            attributor: engines.causality.clone(),
            next_sequence: 1,
            graph: FlowGraph::new(),
            commit_evidence: BTreeMap::new(),
            link_evidence: BTreeMap::new(),
            watermark: None,
            accepted: BTreeMap::new(),
            flagged: BTreeMap::new(),
            last_state: BTreeMap::new(),
        }
    }

    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Current evaluation time: the latest watermark seen, if any.
    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.watermark.map(|(at, _)| at)
    }

    /// Process everything committed since the previous run.
    pub fn run(&mut self) -> Result<DeriveReport, DeriveError> {
        let mut report = DeriveReport::default();
        let upper = self.log.count();
        let criteria = ScanCriteria::all()
            .kinds([
                EvidenceKind::CanonicalEventCommitted,
                EvidenceKind::IdempotencyDecided,
                EvidenceKind::WatermarkAdvanced,
            ])
            .from_sequence(self.next_sequence)
            .to_sequence(upper);

        let log = Arc::clone(&self.log);
        for ev in log.scan(criteria) {
            report.scanned += 1;
            self.apply(&ev, &mut report)?;
        }
        self.next_sequence = self.next_sequence.max(upper + 1);
        report.next_sequence = self.next_sequence;

        debug!(
            scanned = report.scanned,
            links = report.links,
            states = report.states,
            discrepancies = report.discrepancies,
            attributions = report.attributions,
            "derive/run"
        );
        Ok(report)
    }

    fn apply(&mut self, ev: &EvidenceEvent, report: &mut DeriveReport) -> Result<(), DeriveError> {
        match &ev.payload {
            EvidencePayload::CanonicalEventCommitted(c) => self.on_canonical(&c.event, ev.id, report),
            EvidencePayload::IdempotencyDecided(r) => self.on_decision(r, ev.id, report),
            EvidencePayload::WatermarkAdvanced(w) => self.on_watermark(w, ev.id, report),
            _ => Ok(()),
        }
    }

    fn on_canonical(
        &mut self,
        event: &CanonicalEvent,
        evidence_id: Uuid,
        report: &mut DeriveReport,
    ) -> Result<(), DeriveError> {
        if self.graph.contains(event.event_id) {
            return Ok(());
        }
        let links = self.correlation.correlate(event, self.graph.events());
        self.graph.add_event(event.clone());
        self.commit_evidence.insert(event.event_id, evidence_id);

        for link in links {
            let causes: Vec<Uuid> = [link.from_event_id, link.to_event_id]
                .iter()
                .filter_map(|id| self.commit_evidence.get(id).copied())
                .collect();
            let appended = self.log.append_unique(
                EvidenceDraft::new(
                    PRODUCER,
                    link.link_id.to_string(),
                    EvidencePayload::CorrelationLinked(link.clone()),
                    link.created_at,
                )
                .caused_by(causes),
            )?;
            if appended.is_new() {
                report.links += 1;
                info!(
                    link_id = %link.link_id,
                    link_type = %link.link_type,
                    rule = %link.rule_id,
                    confidence = %link.confidence_score,
                    "correlation/linked"
                );
            }
            let link_evidence = self.evidence_id(appended)?;
            self.link_evidence.insert(link.link_id, link_evidence);
            self.graph.add_link(link)?;
        }

        match self.graph.flow_of(event.event_id) {
            Some(flow) => self.evaluate(flow, report),
            None => Ok(()),
        }
    }

    fn on_decision(
        &mut self,
        record: &IdempotencyRecord,
        evidence_id: Uuid,
        report: &mut DeriveReport,
    ) -> Result<(), DeriveError> {
        match record.decision {
            IdempotencyDecision::AcceptFirst => {
                self.accepted.insert(evidence_id, record.key.clone());
                Ok(())
            }
            IdempotencyDecision::FlagAmbiguous => {
                // evidence_refs = [ingest record, accepted decision it conflicts with]
                let Some(key) = record
                    .evidence_refs
                    .iter()
                    .skip(1)
                    .find_map(|id| self.accepted.get(id))
                else {
                    return Ok(());
                };
                let event_id = CanonicalEvent::id_for_key(key);
                let decisions = self.flagged.entry(event_id).or_default();
                if !decisions.contains(&evidence_id) {
                    decisions.push(evidence_id);
                }
                match self.graph.flow_of(event_id) {
                    Some(flow) => self.evaluate(flow, report),
                    None => Ok(()),
                }
            }
            IdempotencyDecision::RejectDuplicate => Ok(()),
        }
    }

    fn on_watermark(
        &mut self,
        watermark: &Watermark,
        evidence_id: Uuid,
        report: &mut DeriveReport,
    ) -> Result<(), DeriveError> {
        if self.watermark.is_some_and(|(at, _)| watermark.as_of <= at) {
            return Ok(());
        }
        self.watermark = Some((watermark.as_of, evidence_id));
        // Final flows do not move with time; only open ones are re-evaluated.
        let open: Vec<MoneyFlow> = self
            .graph
            .flows()
            .into_iter()
            .filter(|f| {
                self.last_state
                    .get(&f.flow_id)
                    .map_or(true, |l| !l.state.current_state.is_final())
            })
            .collect();
        debug!(
            as_of = %watermark.as_of,
            open = open.len(),
            total = self.graph.flow_count(),
            "derive/watermark"
        );
        for flow in open {
            self.evaluate(flow, report)?;
        }
        Ok(())
    }

    fn evaluate(&mut self, flow: MoneyFlow, report: &mut DeriveReport) -> Result<(), DeriveError> {
        let Some(as_of) = flow
            .last_observed_at()
            .into_iter()
            .chain(self.watermark())
            .max()
        else {
            return Ok(());
        };

        let state_version = self
            .last_state
            .get(&flow.flow_id)
            .map_or(1, |l| l.state.state_version + 1);
        let candidate = self.machine.evaluate(&flow, as_of, state_version);

        // A later as_of alone is not a new evaluation: keep the last record.
        let unchanged = self
            .last_state
            .get(&flow.flow_id)
            .filter(|last| {
                last.state.state_id == candidate.state_id
                    || same_assertion(&last.state, &candidate)
            })
            .map(|last| (last.state.clone(), last.evidence_id));

        let (state, state_evidence) = match unchanged {
            Some(last) => last,
            None => {
                let mut causes: Vec<Uuid> = flow
                    .events
                    .iter()
                    .filter_map(|e| self.commit_evidence.get(&e.event_id).copied())
                    .collect();
                causes.extend(
                    flow.links
                        .iter()
                        .filter_map(|l| self.link_evidence.get(&l.link_id).copied()),
                );
                if let Some((at, id)) = self.watermark {
                    if at == as_of {
                        causes.push(id);
                    }
                }
                let appended = self.log.append_unique(
                    EvidenceDraft::new(
                        PRODUCER,
                        flow.flow_id.clone(),
                        EvidencePayload::StateEvaluated(candidate.clone()),
                        as_of,
                    )
                    .caused_by(causes),
                )?;
                if appended.is_new() {
                    report.states += 1;
                    info!(
                        flow_id = %flow.flow_id,
                        state = %candidate.current_state,
                        version = candidate.state_version,
                        confidence = %candidate.confidence_level,
                        "state/evaluated"
                    );
                }
                let evidence_id = self.evidence_id(appended)?;
                self.last_state.insert(
                    flow.flow_id.clone(),
                    LastState {
                        state: candidate.clone(),
                        evidence_id,
                    },
                );
                (candidate, evidence_id)
            }
        };

        for discrepancy in self.classifier.classify(&flow, &state, as_of) {
            let appended = self.log.append_unique(
                EvidenceDraft::new(
                    PRODUCER,
                    flow.flow_id.clone(),
                    EvidencePayload::DiscrepancyDetected(discrepancy.clone()),
                    as_of,
                )
                .caused_by([state_evidence]),
            )?;
            if appended.is_new() {
                report.discrepancies += 1;
                info!(
                    flow_id = %flow.flow_id,
                    discrepancy_type = %discrepancy.discrepancy_type,
                    rule = %discrepancy.rule_id,
                    "discrepancy/detected"
                );
            }
            let discrepancy_evidence = self.evidence_id(appended)?;

            let ctx = AttributionContext {
                discrepancy: &discrepancy,
                state: &state,
                flow: &flow,
                flagged: &self.flagged,
                as_of,
            };
            for attribution in self.attributor.attribute(&ctx) {
                let appended = self.log.append_unique(
                    EvidenceDraft::new(
                        PRODUCER,
                        discrepancy.discrepancy_id.to_string(),
                        EvidencePayload::CausalityAttributed(attribution.clone()),
                        as_of,
                    )
                    .caused_by([discrepancy_evidence]),
                )?;
                if appended.is_new() {
                    report.attributions += 1;
                    info!(
                        discrepancy_id = %attribution.discrepancy_id,
                        cause = %attribution.cause_type,
                        confidence = %attribution.confidence_level,
                        "causality/attributed"
                    );
                }
            }
        }
        Ok(())
    }

    fn evidence_id(&self, appended: Appended) -> Result<Uuid, DeriveError> {
        let sequence = appended.sequence();
        self.log
            .get_by_sequence(sequence)
            .map(|ev| ev.id)
            .ok_or_else(|| DeriveError::Corrupt(format!("sequence {sequence} vanished")))
    }
}

/// True when two evaluations of a flow assert the same thing, whatever their
/// evaluation time and version counter.
fn same_assertion(a: &MoneyState, b: &MoneyState) -> bool {
    a.flow_id == b.flow_id
        && a.current_state == b.current_state
        && a.supporting_events == b.supporting_events
        && a.supporting_links == b.supporting_links
        && a.rule_version == b.rule_version
        && a.machine_version == b.machine_version
        && a.transition_rule_versions == b.transition_rule_versions
        && a.confidence_level == b.confidence_level
        && a.explanation == b.explanation
        && a.path == b.path
        && a.observed_signals == b.observed_signals
        && a.unconsumed_signals == b.unconsumed_signals
}
