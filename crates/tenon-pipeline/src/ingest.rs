use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tenon_config::{AdapterError, AdapterRegistry};
use tenon_evidence::{AppendError, CanonicalCommit, EvidenceDraft, EvidenceLog, EvidencePayload};
use tenon_idempotency::{
    payload_hash, subject_descriptor, AcceptPermit, GuardianError, IdempotencyGuardian,
    IdempotencyRequest,
};
use tenon_normalize::{BuildInput, CanonicalEventBuilder, Normalized};
use tenon_schemas::{
    DeclarationError, IdempotencyDecision, IdempotencyScope, IngestRecord, RawObservation,
    Rejection, RejectionStage, Watermark, INGEST_PROTOCOL_VERSION,
};

use crate::time::TimeSource;

/// The decision, plus the retry's ingest record when the accept was resumed.
fn effect_causes(permit: &AcceptPermit) -> Vec<Uuid> {
    let mut causes = vec![permit.decision_evidence_id()];
    causes.extend(permit.resumed_by());
    causes
}

const PRODUCER: &str = "ingestor";
const WATERMARK_SUBJECT: &str = "watermark";

/// What happened to one observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub ingest_evidence_id: Uuid,
    pub idempotency_key: String,
    pub decision: IdempotencyDecision,
    pub decision_evidence_id: Uuid,
    /// Canonical event committed for this observation: on ACCEPT_FIRST, or on a
    /// duplicate that resumed an accept whose effect was lost.
    pub event_id: Option<Uuid>,
    /// Present when an accepted observation violated a normalization rule.
    pub rejection: Option<Rejection>,
    /// The ACCEPT_FIRST this retry completed, when it resumed one.
    pub resumed_decision: Option<Uuid>,
}

impl IngestReport {
    pub fn committed(&self) -> bool {
        self.event_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    /// Structurally invalid; nothing was written.
    Malformed(DeclarationError),
    /// Adapter not registered for this source; nothing was written.
    UnregisteredAdapter(AdapterError),
    Guardian(GuardianError),
    Append(AppendError),
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::Malformed(e) => write!(f, "malformed observation: {e}"),
            IngestError::UnregisteredAdapter(e) => write!(f, "{e}"),
            IngestError::Guardian(e) => write!(f, "{e}"),
            IngestError::Append(e) => write!(f, "evidence append failed: {e}"),
        }
    }
}

impl std::error::Error for IngestError {}

impl From<DeclarationError> for IngestError {
    fn from(e: DeclarationError) -> Self {
        IngestError::Malformed(e)
    }
}

impl From<AdapterError> for IngestError {
    fn from(e: AdapterError) -> Self {
        IngestError::UnregisteredAdapter(e)
    }
}

impl From<GuardianError> for IngestError {
    fn from(e: GuardianError) -> Self {
        IngestError::Guardian(e)
    }
}

impl From<AppendError> for IngestError {
    fn from(e: AppendError) -> Self {
        IngestError::Append(e)
    }
}

/// An observation whose INGEST_RECORDED is committed, awaiting its decision.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub ingest_evidence_id: Uuid,
    pub received_at: DateTime<Utc>,
    obs: RawObservation,
    request: IdempotencyRequest,
}

impl Recorded {
    pub fn observation(&self) -> &RawObservation {
        &self.obs
    }
}

/// A committed decision, holding the permit when an effect is owed.
#[derive(Debug)]
pub struct Decided {
    report: IngestReport,
    obs: RawObservation,
    permit: Option<AcceptPermit>,
}

impl Decided {
    pub fn report(&self) -> &IngestReport {
        &self.report
    }

    /// True when [`Ingestor::settle`] will commit an effect.
    pub fn owes_effect(&self) -> bool {
        self.permit.is_some()
    }

    /// Build the effect from another observation of the same key.
    pub(crate) fn with_observation(mut self, obs: RawObservation) -> Self {
        self.obs = obs;
        self
    }
}

/// Write side of the core: ingest record, guardian decision, then at most one effect.
///
/// Shared by concurrent workers (`&self` everywhere). [`Ingestor::ingest`] runs the
/// three stages back to back; [`Ingestor::record`], [`Ingestor::decide`] and
/// [`Ingestor::settle`] expose them separately so other effect orderings can be
/// reproduced.
pub struct Ingestor {
    log: Arc<EvidenceLog>,
    guardian: IdempotencyGuardian,
    builder: CanonicalEventBuilder,
    adapters: AdapterRegistry,
    rule_version: String,
    time: Arc<dyn TimeSource>,
}

impl Ingestor {
    /// Opens over `log`, rebuilding the guardian index from the evidence already in it.
    pub fn open(
        log: Arc<EvidenceLog>,
        builder: CanonicalEventBuilder,
        adapters: AdapterRegistry,
        rule_version: impl Into<String>,
        time: Arc<dyn TimeSource>,
    ) -> Result<Self, GuardianError> {
        let guardian = IdempotencyGuardian::recover(Arc::clone(&log))?;
        Ok(Self {
            log,
            guardian,
            builder,
            adapters,
            rule_version: rule_version.into(),
            time,
        })
    }

    pub fn log(&self) -> &Arc<EvidenceLog> {
        &self.log
    }

    pub fn guardian(&self) -> &IdempotencyGuardian {
        &self.guardian
    }

    pub fn ingest(&self, obs: &RawObservation) -> Result<IngestReport, IngestError> {
        self.ingest_at(obs, self.time.now())
    }

    /// Ingest with an explicit receipt time (replays pass the recorded one).
    pub fn ingest_at(
        &self,
        obs: &RawObservation,
        received_at: DateTime<Utc>,
    ) -> Result<IngestReport, IngestError> {
        let recorded = self.record_at(obs, received_at)?;
        let decided = self.decide(&recorded)?;
        self.settle(decided)
    }

    pub fn record(&self, obs: &RawObservation) -> Result<Recorded, IngestError> {
        self.record_at(obs, self.time.now())
    }

    /// Validate and commit INGEST_RECORDED. Malformed input and unregistered
    /// adapters are refused before anything is written.
    pub fn record_at(
        &self,
        obs: &RawObservation,
        received_at: DateTime<Utc>,
    ) -> Result<Recorded, IngestError> {
        if let Err(e) = obs.validate() {
            debug!(source = %obs.declaration.source_system, error = %e, "ingest/malformed");
            return Err(e.into());
        }
        let d = &obs.declaration;
        if let Err(e) = self.adapters.check(d) {
            warn!(source = %d.source_system, adapter = %d.adapter_version, "ingest/unregistered_adapter");
            return Err(e.into());
        }

        let hash = payload_hash(d.payload_format, &d.payload_raw);
        let subject = subject_descriptor(
            d.source_event_id.as_deref(),
            d.external_reference.as_deref(),
            &hash,
        );

        let record = IngestRecord {
            source_system: d.source_system.clone(),
            source_event_id: d.source_event_id.clone(),
            external_reference: d.external_reference.clone(),
            payload_format: d.payload_format,
            source_timestamp: d.source_timestamp.clone(),
            adapter_version: d.adapter_version.clone(),
            schema_hint: d.schema_hint.clone(),
            raw_payload_hash: obs.raw_payload_hash.clone(),
            raw_pointer: obs.raw_pointer.clone(),
            payload_hash: hash.clone(),
            received_at,
            ingest_protocol_version: INGEST_PROTOCOL_VERSION.to_string(),
        };
        let ingest_seq = self.log.append(EvidenceDraft::new(
            PRODUCER,
            format!("{}|{}", d.source_system, subject),
            EvidencePayload::IngestRecorded(record),
            received_at,
        ))?;
        let ingest_evidence_id = self.evidence_id(ingest_seq)?;

        Ok(Recorded {
            ingest_evidence_id,
            received_at,
            obs: obs.clone(),
            request: IdempotencyRequest {
                scope: IdempotencyScope::Ingest,
                source_identity: d.source_system.clone(),
                subject,
                payload_hash: hash,
                rule_version: self.rule_version.clone(),
            },
        })
    }

    /// Ask the guardian. The decision is committed before this returns.
    pub fn decide(&self, recorded: &Recorded) -> Result<Decided, IngestError> {
        let verdict = self.guardian.decide(
            &recorded.request,
            recorded.ingest_evidence_id,
            recorded.received_at,
        )?;

        let report = IngestReport {
            ingest_evidence_id: recorded.ingest_evidence_id,
            idempotency_key: verdict.record.key.clone(),
            decision: verdict.decision(),
            decision_evidence_id: verdict.evidence_id,
            event_id: None,
            rejection: None,
            resumed_decision: verdict
                .permit
                .as_ref()
                .filter(|p| p.is_resumed())
                .map(|p| p.decision_evidence_id()),
        };

        if verdict.permit.is_none() {
            match report.decision {
                IdempotencyDecision::FlagAmbiguous => warn!(
                    key = %report.idempotency_key,
                    subject = %recorded.request.subject,
                    "ingest/flag_ambiguous"
                ),
                _ => debug!(key = %report.idempotency_key, "ingest/duplicate"),
            }
        } else if let Some(resumed) = report.resumed_decision {
            warn!(
                key = %report.idempotency_key,
                accept = %resumed,
                "ingest/resuming_unsettled_accept"
            );
        }

        Ok(Decided {
            report,
            obs: recorded.obs.clone(),
            permit: verdict.permit,
        })
    }

    /// Commit the owed effect, if any: the canonical event, or a normalization
    /// rejection. The permit is settled only once that record is committed.
    pub fn settle(&self, decided: Decided) -> Result<IngestReport, IngestError> {
        let Decided {
            mut report,
            obs,
            permit,
        } = decided;
        let Some(permit) = permit else {
            return Ok(report);
        };
        let d = &obs.declaration;
        let observed_at = permit.first_seen_at();

        let input = BuildInput {
            declaration: d,
            idempotency_key: permit.key(),
            raw_payload_hash: &obs.raw_payload_hash,
            observed_at,
        };
        match self.builder.build(input) {
            Ok(normalized) => {
                let event_id = self.commit(permit, normalized, observed_at)?;
                info!(event_id = %event_id, key = %report.idempotency_key, "ingest/committed");
                report.event_id = Some(event_id);
            }
            Err(e) => {
                let rule = self.builder.select(d).ok();
                let rejection = Rejection {
                    stage: RejectionStage::Normalization,
                    reason_code: e.reason_code().to_string(),
                    detail: e.to_string(),
                    raw_payload_hash: obs.raw_payload_hash.clone(),
                    idempotency_key: permit.key().to_string(),
                    rule_id: rule.map(|r| r.rule_id.clone()),
                    rule_version: rule.map(|r| r.rule_version.clone()),
                };
                self.reject(permit, rejection.clone(), observed_at)?;
                warn!(
                    key = %report.idempotency_key,
                    reason = %rejection.reason_code,
                    "ingest/rejected"
                );
                report.rejection = Some(rejection);
            }
        }
        Ok(report)
    }

    /// The only path to a canonical commit. Consumes the permit.
    fn commit(
        &self,
        permit: AcceptPermit,
        normalized: Normalized,
        at: DateTime<Utc>,
    ) -> Result<Uuid, AppendError> {
        let event_id = normalized.event.event_id;
        let commit = CanonicalCommit {
            event: normalized.event,
            diff: normalized.diff,
        };
        self.log.append(
            EvidenceDraft::new(
                PRODUCER,
                event_id.to_string(),
                EvidencePayload::CanonicalEventCommitted(commit),
                at,
            )
            .caused_by(effect_causes(&permit)),
        )?;
        permit.settle();
        Ok(event_id)
    }

    fn reject(
        &self,
        permit: AcceptPermit,
        rejection: Rejection,
        at: DateTime<Utc>,
    ) -> Result<(), AppendError> {
        self.log.append(
            EvidenceDraft::new(
                PRODUCER,
                permit.key().to_string(),
                EvidencePayload::RejectionRecorded(rejection),
                at,
            )
            .caused_by(effect_causes(&permit)),
        )?;
        permit.settle();
        Ok(())
    }

    /// Record a watermark at the current time.
    pub fn tick(&self, reason: &str) -> Result<u64, IngestError> {
        Ok(self.tick_at(self.time.now(), reason)?)
    }

    pub fn tick_at(&self, as_of: DateTime<Utc>, reason: &str) -> Result<u64, AppendError> {
        let seq = self.log.append(EvidenceDraft::new(
            PRODUCER,
            WATERMARK_SUBJECT,
            EvidencePayload::WatermarkAdvanced(Watermark {
                as_of,
                reason: reason.to_string(),
            }),
            as_of,
        ))?;
        info!(as_of = %as_of, sequence = seq, "watermark/advanced");
        Ok(seq)
    }

    fn evidence_id(&self, sequence: u64) -> Result<Uuid, AppendError> {
        self.log
            .get_by_sequence(sequence)
            .map(|ev| ev.id)
            .ok_or(AppendError::Poisoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tenon_config::LoadedRuleBook;
    use tenon_evidence::{EvidenceKind, ScanCriteria};
    use tenon_schemas::{IngestDeclaration, PayloadFormat};

    use crate::time::FixedTime;

    fn ingestor(log: &Arc<EvidenceLog>) -> Ingestor {
        let engines = LoadedRuleBook::builtin_v1().unwrap().compile().unwrap();
        let time = Arc::new(FixedTime::new(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()));
        Ingestor::open(
            Arc::clone(log),
            engines.builder,
            engines.adapters,
            engines.idempotency_rule_version,
            time,
        )
        .unwrap()
    }

    fn psp(id: &str, event_type: &str, amount: i64) -> RawObservation {
        let payload = format!(
            r#"{{"type":"{event_type}","created":"2026-03-02T08:00:00Z","data":{{"amount":{amount},"currency":"EUR","direction":"credit","reference":"ORD-1"}}}}"#
        );
        RawObservation::content_addressed(IngestDeclaration {
            source_system: "psp".to_string(),
            source_event_id: Some(id.to_string()),
            external_reference: Some("ORD-1".to_string()),
            payload_raw: payload,
            payload_format: PayloadFormat::Json,
            source_timestamp: None,
            adapter_version: "psp-adapter/1".to_string(),
            schema_hint: None,
        })
    }

    #[test]
    fn accepted_observation_commits_one_canonical_event() {
        let log = Arc::new(EvidenceLog::in_memory());
        let ing = ingestor(&log);

        let r = ing.ingest(&psp("evt_1", "payment.created", 10_000)).unwrap();
        assert_eq!(r.decision, IdempotencyDecision::AcceptFirst);
        assert!(r.committed());

        let again = ing.ingest(&psp("evt_1", "payment.created", 10_000)).unwrap();
        assert_eq!(again.decision, IdempotencyDecision::RejectDuplicate);
        assert!(!again.committed());

        let commits = log
            .snapshot(ScanCriteria::all().kind(EvidenceKind::CanonicalEventCommitted))
            .count();
        assert_eq!(commits, 1);
        let ingests = log
            .snapshot(ScanCriteria::all().kind(EvidenceKind::IngestRecorded))
            .count();
        assert_eq!(ingests, 2, "every attempt is preserved");
    }

    #[test]
    fn malformed_observation_never_reaches_the_log() {
        let log = Arc::new(EvidenceLog::in_memory());
        let ing = ingestor(&log);
        let mut obs = psp("evt_1", "payment.created", 1);
        obs.raw_payload_hash = "00".repeat(32);
        assert!(matches!(ing.ingest(&obs), Err(IngestError::Malformed(_))));
        assert_eq!(log.count(), 0);
    }

    #[test]
    fn missing_normalization_rule_is_recorded_as_rejection() {
        let log = Arc::new(EvidenceLog::in_memory());
        let ing = ingestor(&log);
        let mut obs = psp("evt_1", "payment.created", 1);
        obs.declaration.source_system = "erp".to_string();
        obs.declaration.adapter_version = "erp-adapter/1".to_string();

        let r = ing.ingest(&obs).unwrap();
        assert_eq!(r.decision, IdempotencyDecision::AcceptFirst);
        let rejection = r.rejection.unwrap();
        assert_eq!(rejection.reason_code, "NO_RULE");
        assert_eq!(rejection.stage, RejectionStage::Normalization);

        let ev = log.get_record(&format!("rejection:{}", r.idempotency_key)).unwrap();
        assert_eq!(ev.caused_by, vec![r.decision_evidence_id]);
    }

    #[test]
    fn unregistered_adapter_is_refused_before_the_log() {
        let log = Arc::new(EvidenceLog::in_memory());
        let ing = ingestor(&log);
        let mut obs = psp("evt_1", "payment.created", 1);
        obs.declaration.adapter_version = "psp-adapter/99".to_string();

        match ing.ingest(&obs) {
            Err(IngestError::UnregisteredAdapter(AdapterError::Unregistered {
                source_system,
                adapter_version,
            })) => {
                assert_eq!(source_system, "psp");
                assert_eq!(adapter_version, "psp-adapter/99");
            }
            other => panic!("expected UnregisteredAdapter, got {other:?}"),
        }

        obs.declaration.adapter_version = "psp-adapter/1".to_string();
        obs.declaration.payload_format = PayloadFormat::Csv;
        assert!(matches!(
            ing.ingest(&obs),
            Err(IngestError::UnregisteredAdapter(AdapterError::UnsupportedFormat { .. }))
        ));
        assert_eq!(log.count(), 0);
    }

    #[test]
    fn staged_effects_commit_in_settle_order() {
        let log = Arc::new(EvidenceLog::in_memory());
        let ing = ingestor(&log);

        let r1 = ing.record(&psp("evt_1", "payment.created", 100)).unwrap();
        let r2 = ing.record(&psp("evt_2", "payment.created", 200)).unwrap();
        let d1 = ing.decide(&r1).unwrap();
        let d2 = ing.decide(&r2).unwrap();
        assert!(d1.owes_effect() && d2.owes_effect());

        let second = ing.settle(d2).unwrap();
        let first = ing.settle(d1).unwrap();

        let commits: Vec<Uuid> = log
            .snapshot(ScanCriteria::all().kind(EvidenceKind::CanonicalEventCommitted))
            .map(|ev| ev.caused_by[0])
            .collect();
        assert_eq!(
            commits,
            vec![second.decision_evidence_id, first.decision_evidence_id]
        );
    }

    #[test]
    fn crash_between_decision_and_commit_is_completed_by_retry() {
        let log = Arc::new(EvidenceLog::in_memory());
        let obs = psp("evt_1", "payment.created", 10_000);
        let accepted = {
            let ing = ingestor(&log);
            let recorded = ing.record(&obs).unwrap();
            let decided = ing.decide(&recorded).unwrap();
            assert_eq!(decided.report().decision, IdempotencyDecision::AcceptFirst);
            let id = decided.report().decision_evidence_id;
            // Process dies here: the effect is never settled.
            std::mem::forget(decided);
            id
        };

        let ing = ingestor(&log);
        assert_eq!(ing.guardian().pending().unwrap().len(), 1);

        let retry = ing.ingest(&obs).unwrap();
        assert_eq!(retry.decision, IdempotencyDecision::RejectDuplicate);
        assert_eq!(retry.resumed_decision, Some(accepted));
        assert!(retry.committed());

        let commit = log
            .snapshot(ScanCriteria::all().kind(EvidenceKind::CanonicalEventCommitted))
            .next()
            .unwrap();
        assert!(commit.caused_by.contains(&accepted));
        assert!(commit.caused_by.contains(&retry.ingest_evidence_id));

        let again = ing.ingest(&obs).unwrap();
        assert!(!again.committed());
        assert_eq!(again.resumed_decision, None);
        assert!(ing.guardian().pending().unwrap().is_empty());
    }
}
