use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use tenon_schemas::{
    derive_id, CanonicalEvent, Confidence, CorrelationEvidenceKind, CorrelationLink, EventType,
    LineageLink, LinkEvidence, Resolved,
};

use crate::rules::{CorrelationRule, CorrelationRuleSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationError {
    DuplicateRule { rule_id: String, rule_version: String },
    EmptyWeights { rule_id: String },
    MinScoreOutOfRange { rule_id: String, min_score_bps: u16 },
    /// A link endpoint that is not a committed event in the graph.
    UnknownEndpoint(Uuid),
}

impl fmt::Display for CorrelationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationError::DuplicateRule {
                rule_id,
                rule_version,
            } => write!(f, "correlation rule {rule_id}@{rule_version} declared twice"),
            CorrelationError::EmptyWeights { rule_id } => {
                write!(f, "correlation rule {rule_id} has no evidence weights")
            }
            CorrelationError::MinScoreOutOfRange {
                rule_id,
                min_score_bps,
            } => write!(
                f,
                "correlation rule {rule_id} min_score_bps {min_score_bps} exceeds 10000"
            ),
            CorrelationError::UnknownEndpoint(id) => {
                write!(f, "link endpoint {id} is not a committed event")
            }
        }
    }
}

impl std::error::Error for CorrelationError {}

/// Applies a pinned correlation rule set to pairs of canonical events.
#[derive(Debug, Clone)]
pub struct CorrelationEngine {
    engine_version: String,
    candidate_window_secs: i64,
    /// Sorted by (rule_id, rule_version).
    rules: Vec<CorrelationRule>,
}

impl CorrelationEngine {
    pub fn new(set: CorrelationRuleSet) -> Result<Self, CorrelationError> {
        let mut rules = set.rules;
        rules.sort_by(|a, b| {
            a.rule_id
                .cmp(&b.rule_id)
                .then_with(|| a.rule_version.cmp(&b.rule_version))
        });
        for pair in rules.windows(2) {
            if pair[0].rule_id == pair[1].rule_id && pair[0].rule_version == pair[1].rule_version {
                return Err(CorrelationError::DuplicateRule {
                    rule_id: pair[0].rule_id.clone(),
                    rule_version: pair[0].rule_version.clone(),
                });
            }
        }
        for r in &rules {
            if r.weights.values().all(|w| *w == 0) {
                return Err(CorrelationError::EmptyWeights {
                    rule_id: r.rule_id.clone(),
                });
            }
            if r.min_score_bps > Confidence::MAX_BPS {
                return Err(CorrelationError::MinScoreOutOfRange {
                    rule_id: r.rule_id.clone(),
                    min_score_bps: r.min_score_bps,
                });
            }
        }
        Ok(Self {
            engine_version: set.engine_version,
            candidate_window_secs: set.candidate_window_secs,
            rules,
        })
    }

    pub fn engine_version(&self) -> &str {
        &self.engine_version
    }

    /// Links between `new_event` and every earlier event inside the candidate window.
    ///
    /// `earlier` must be in commit order; output is ordered by (candidate, rule).
    pub fn correlate<'a>(
        &self,
        new_event: &CanonicalEvent,
        earlier: impl IntoIterator<Item = &'a CanonicalEvent>,
    ) -> Vec<CorrelationLink> {
        let t_new = effective_time(new_event);
        let mut out = Vec::new();
        for candidate in earlier {
            if candidate.event_id == new_event.event_id {
                continue;
            }
            let gap = (t_new - effective_time(candidate)).num_seconds().abs();
            if gap > self.candidate_window_secs {
                continue;
            }
            out.extend(self.evaluate_pair(candidate, new_event));
        }
        out
    }

    /// Every rule that fires for the ordered pair (earlier, later).
    pub fn evaluate_pair(&self, earlier: &CanonicalEvent, later: &CanonicalEvent) -> Vec<CorrelationLink> {
        let mut links = Vec::new();
        for rule in &self.rules {
            let present = collect_evidence(rule, earlier, later);
            let kinds: BTreeSet<CorrelationEvidenceKind> = present.iter().map(|e| e.kind).collect();

            if !rule.required.iter().all(|k| kinds.contains(k)) {
                continue;
            }

            let total: u64 = rule.weights.values().map(|w| *w as u64).sum();
            let hit: u64 = rule
                .weights
                .iter()
                .filter(|(k, _)| kinds.contains(k))
                .map(|(_, w)| *w as u64)
                .sum();
            let score = Confidence::ratio(hit, total);
            if !score.is_positive() || score.bps() < rule.min_score_bps {
                continue;
            }

            let from = earlier.event_id.to_string();
            let to = later.event_id.to_string();
            let names: Vec<&str> = present.iter().map(|e| e.kind.as_str()).collect();

            links.push(CorrelationLink {
                link_id: derive_id(
                    "link",
                    &[
                        from.as_str(),
                        to.as_str(),
                        rule.rule_id.as_str(),
                        rule.rule_version.as_str(),
                    ],
                ),
                from_event_id: earlier.event_id,
                to_event_id: later.event_id,
                link_type: rule.link_type,
                rule_id: rule.rule_id.clone(),
                rule_version: rule.rule_version.clone(),
                evidence: present,
                confidence_score: score,
                engine_version: self.engine_version.clone(),
                explanation: format!(
                    "rule {}@{} fired on [{}] with score {}",
                    rule.rule_id,
                    rule.rule_version,
                    names.join(", "),
                    score
                ),
                created_at: earlier.observed_at.max(later.observed_at),
            });
        }
        links
    }
}

/// Source time when declared, otherwise the time the core observed the event.
fn effective_time(e: &CanonicalEvent) -> DateTime<Utc> {
    e.source_timestamp.unwrap_or(e.observed_at)
}

/// Lifecycle position used for SEQUENCE_OBSERVED. None for types with no position.
fn lifecycle_rank(t: EventType) -> Option<u8> {
    use EventType::*;
    match t {
        PaymentInitiated | PayoutInitiated => Some(1),
        PaymentAuthorized => Some(2),
        PaymentCaptured => Some(3),
        PaymentSettled | PayoutSettled | PaymentFailed | PayoutFailed => Some(4),
        RefundInitiated | ChargebackOpened => Some(5),
        RefundSettled | ChargebackWon | ChargebackLost | ReversalPosted => Some(6),
        FeeAssessed | AdjustmentPosted | BalanceSnapshot | Unknown => None,
    }
}

/// Lineage entry on `from` pointing at `to`'s source event id, if the rule accepts its type.
fn lineage_hit<'a>(
    rule: &CorrelationRule,
    from: &'a CanonicalEvent,
    to: &CanonicalEvent,
) -> Option<&'a LineageLink> {
    let target = to.source_event_id.as_deref()?;
    from.lineage_links.iter().find(|l| {
        l.target_reference == target
            && (rule.lineage_types.is_empty() || rule.lineage_types.contains(&l.lineage_type))
    })
}

/// Sorted list of evidence observable for the pair under `rule`'s parameters.
pub fn collect_evidence(
    rule: &CorrelationRule,
    earlier: &CanonicalEvent,
    later: &CanonicalEvent,
) -> Vec<LinkEvidence> {
    let mut ev = Vec::new();

    if let (Some(a), Some(b)) = (&earlier.external_reference, &later.external_reference) {
        if a == b {
            ev.push(LinkEvidence {
                kind: CorrelationEvidenceKind::ReferenceMatch,
                detail: format!("external_reference={a}"),
            });
        }
    }

    if let (Some(a), Some(b)) = (&earlier.correlation_id, &later.correlation_id) {
        if a == b {
            ev.push(LinkEvidence {
                kind: CorrelationEvidenceKind::CorrelationIdMatch,
                detail: format!("correlation_id={a}"),
            });
        }
    }

    if let Some(l) =
        lineage_hit(rule, later, earlier).or_else(|| lineage_hit(rule, earlier, later))
    {
        ev.push(LinkEvidence {
            kind: CorrelationEvidenceKind::LineageReference,
            detail: format!("{} {}", l.lineage_type, l.target_reference),
        });
    }

    if let (Resolved::Known(a), Resolved::Known(b)) = (&earlier.amount_micros, &later.amount_micros) {
        let (a, b) = (a.unsigned_abs(), b.unsigned_abs());
        if a == b {
            ev.push(LinkEvidence {
                kind: CorrelationEvidenceKind::AmountExact,
                detail: format!("amount_micros={a}"),
            });
        }
        let diff = a.abs_diff(b) as u128;
        let scale = a.max(b) as u128;
        if diff * 10_000 <= rule.amount_tolerance_bps as u128 * scale {
            ev.push(LinkEvidence {
                kind: CorrelationEvidenceKind::AmountTolerance,
                detail: format!("diff_micros={diff} tolerance_bps={}", rule.amount_tolerance_bps),
            });
        }
    }

    if let (Resolved::Known(a), Resolved::Known(b)) = (&earlier.currency, &later.currency) {
        if a == b {
            ev.push(LinkEvidence {
                kind: CorrelationEvidenceKind::CurrencyMatch,
                detail: format!("currency={a}"),
            });
        }
    }

    let gap = (effective_time(later) - effective_time(earlier)).num_seconds().abs();
    if gap <= rule.time_window_secs {
        ev.push(LinkEvidence {
            kind: CorrelationEvidenceKind::TimeWindow,
            detail: format!("gap_secs={gap}"),
        });
    }

    if let (Some(a), Some(b)) = (lifecycle_rank(earlier.event_type), lifecycle_rank(later.event_type)) {
        if a < b {
            ev.push(LinkEvidence {
                kind: CorrelationEvidenceKind::SequenceObserved,
                detail: format!("{} -> {}", earlier.event_type, later.event_type),
            });
        }
    }

    ev.sort();
    ev
}
