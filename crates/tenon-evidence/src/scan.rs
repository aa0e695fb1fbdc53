use std::collections::BTreeSet;
use std::sync::Arc;

use crate::log::{EvidenceEvent, EvidenceLog};
use crate::payload::EvidenceKind;

/// Filter for [`EvidenceLog::scan`]. Empty `kinds` means every kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanCriteria {
    pub kinds: BTreeSet<EvidenceKind>,
    pub subject_id: Option<String>,
    /// Inclusive; 0 and 1 both mean "from the start".
    pub from_sequence: u64,
    /// Inclusive upper bound.
    pub to_sequence: Option<u64>,
}

impl ScanCriteria {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: EvidenceKind) -> Self {
        self.kinds.insert(kind);
        self
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = EvidenceKind>) -> Self {
        self.kinds.extend(kinds);
        self
    }

    pub fn subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    pub fn from_sequence(mut self, sequence: u64) -> Self {
        self.from_sequence = sequence;
        self
    }

    pub fn to_sequence(mut self, sequence: u64) -> Self {
        self.to_sequence = Some(sequence);
        self
    }

    pub fn matches(&self, ev: &EvidenceEvent) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&ev.kind) {
            return false;
        }
        if let Some(subject) = &self.subject_id {
            if &ev.subject_id != subject {
                return false;
            }
        }
        true
    }
}

/// Lazy, sequence-ordered iterator over the log.
///
/// Restartable: `position()` is the next sequence to examine; a new scan started
/// `from_sequence(position)` continues exactly where this one stopped.
pub struct Scan<'a> {
    log: &'a EvidenceLog,
    criteria: ScanCriteria,
    next_sequence: u64,
}

impl<'a> Scan<'a> {
    pub(crate) fn new(log: &'a EvidenceLog, criteria: ScanCriteria) -> Self {
        let next_sequence = criteria.from_sequence.max(1);
        Self {
            log,
            criteria,
            next_sequence,
        }
    }

    pub fn position(&self) -> u64 {
        self.next_sequence
    }

    /// Criteria that resume this scan at its current position.
    pub fn resume_criteria(&self) -> ScanCriteria {
        self.criteria.clone().from_sequence(self.next_sequence)
    }
}

impl Iterator for Scan<'_> {
    type Item = Arc<EvidenceEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(to) = self.criteria.to_sequence {
                if self.next_sequence > to {
                    return None;
                }
            }
            let ev = self.log.get_by_sequence(self.next_sequence)?;
            self.next_sequence += 1;
            if self.criteria.matches(&ev) {
                return Some(ev);
            }
        }
    }
}
