use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CanonicalEvent, CorrelationLink};

/// Flow identifier for the component anchored at `anchor` (its earliest committed event).
pub fn flow_id_for(anchor: Uuid) -> String {
    format!("flow-{anchor}")
}

/// Snapshot of one money flow: the canonical events of a connected component of the
/// correlation graph, plus the links between them.
///
/// `events` are in commit order; `links` are sorted by `link_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoneyFlow {
    pub flow_id: String,
    pub events: Vec<CanonicalEvent>,
    pub links: Vec<CorrelationLink>,
}

impl MoneyFlow {
    pub fn event(&self, id: Uuid) -> Option<&CanonicalEvent> {
        self.events.iter().find(|e| e.event_id == id)
    }

    /// Sorted event ids.
    pub fn event_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.events.iter().map(|e| e.event_id).collect();
        ids.sort();
        ids
    }

    /// Sorted link ids.
    pub fn link_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.links.iter().map(|l| l.link_id).collect();
        ids.sort();
        ids
    }

    pub fn is_singleton(&self) -> bool {
        self.events.len() == 1 && self.links.is_empty()
    }

    /// Latest observation time in the flow.
    pub fn last_observed_at(&self) -> Option<DateTime<Utc>> {
        self.events.iter().map(|e| e.observed_at).max()
    }

    pub fn first_observed_at(&self) -> Option<DateTime<Utc>> {
        self.events.iter().map(|e| e.observed_at).min()
    }
}

/// Evaluation-time advance. Recorded as evidence so time-based outcomes replay exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub as_of: DateTime<Utc>,
    pub reason: String,
}
