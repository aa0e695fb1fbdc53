use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use tenon_schemas::{flow_id_for, CanonicalEvent, CorrelationLink, MoneyFlow};

use crate::CorrelationError;

/// Arena of committed events and the links between them.
///
/// Nodes are indexed by commit order. Connected components are tracked with a
/// union-find whose root is always the smallest index, so a component's root is
/// its earliest committed event and the flow id is stable under replay.
/// Each root also owns its member and link lists, so materializing a flow costs
/// the size of that flow, not of the graph.
#[derive(Debug, Clone, Default)]
pub struct FlowGraph {
    events: Vec<CanonicalEvent>,
    index: BTreeMap<Uuid, usize>,
    parent: Vec<usize>,
    /// Event indices per root; empty for non-roots.
    members: Vec<Vec<usize>>,
    /// Link indices per root; empty for non-roots.
    member_links: Vec<Vec<usize>>,
    links: Vec<CorrelationLink>,
    link_ids: BTreeSet<Uuid>,
}

impl FlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn contains(&self, event_id: Uuid) -> bool {
        self.index.contains_key(&event_id)
    }

    /// Events in commit order.
    pub fn events(&self) -> impl Iterator<Item = &CanonicalEvent> {
        self.events.iter()
    }

    pub fn event(&self, event_id: Uuid) -> Option<&CanonicalEvent> {
        self.index.get(&event_id).map(|&i| &self.events[i])
    }

    pub fn links(&self) -> &[CorrelationLink] {
        &self.links
    }

    /// Adds a committed event as a singleton flow. Returns false if already present.
    pub fn add_event(&mut self, event: CanonicalEvent) -> bool {
        if self.index.contains_key(&event.event_id) {
            return false;
        }
        let i = self.events.len();
        self.index.insert(event.event_id, i);
        self.parent.push(i);
        self.members.push(vec![i]);
        self.member_links.push(Vec::new());
        self.events.push(event);
        true
    }

    /// Adds a link and joins the two flows it connects. Returns false if the link id
    /// is already present.
    pub fn add_link(&mut self, link: CorrelationLink) -> Result<bool, CorrelationError> {
        let a = *self
            .index
            .get(&link.from_event_id)
            .ok_or(CorrelationError::UnknownEndpoint(link.from_event_id))?;
        let b = *self
            .index
            .get(&link.to_event_id)
            .ok_or(CorrelationError::UnknownEndpoint(link.to_event_id))?;
        if !self.link_ids.insert(link.link_id) {
            return Ok(false);
        }
        self.union(a, b);
        let root = self.find(a);
        self.member_links[root].push(self.links.len());
        self.links.push(link);
        Ok(true)
    }

    fn find(&self, mut i: usize) -> usize {
        while self.parent[i] != i {
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent[child] = root;
        let moved = std::mem::take(&mut self.members[child]);
        self.members[root].extend(moved);
        let moved = std::mem::take(&mut self.member_links[child]);
        self.member_links[root].extend(moved);
        // compress both walks onto the new root
        for start in [a, b] {
            let mut i = start;
            while self.parent[i] != root {
                let next = self.parent[i];
                self.parent[i] = root;
                i = next;
            }
        }
    }

    pub fn flow_id_of(&self, event_id: Uuid) -> Option<String> {
        let i = *self.index.get(&event_id)?;
        Some(flow_id_for(self.events[self.find(i)].event_id))
    }

    /// Flow containing `event_id`.
    pub fn flow_of(&self, event_id: Uuid) -> Option<MoneyFlow> {
        let i = *self.index.get(&event_id)?;
        Some(self.component(self.find(i)))
    }

    /// Flow by id. `None` if the id is unknown or its anchor has since joined an
    /// earlier flow.
    pub fn flow(&self, flow_id: &str) -> Option<MoneyFlow> {
        let anchor = flow_id.strip_prefix("flow-")?.parse::<Uuid>().ok()?;
        let i = *self.index.get(&anchor)?;
        if self.find(i) != i {
            return None;
        }
        Some(self.component(i))
    }

    /// Every current flow, ordered by anchor commit position.
    pub fn flows(&self) -> Vec<MoneyFlow> {
        (0..self.events.len())
            .filter(|&i| self.parent[i] == i)
            .map(|root| self.component(root))
            .collect()
    }

    /// Number of current flows.
    pub fn flow_count(&self) -> usize {
        (0..self.parent.len()).filter(|&i| self.parent[i] == i).count()
    }

    fn component(&self, root: usize) -> MoneyFlow {
        let mut member_idx = self.members[root].clone();
        member_idx.sort_unstable();
        let events: Vec<CanonicalEvent> =
            member_idx.iter().map(|&i| self.events[i].clone()).collect();
        let mut links: Vec<CorrelationLink> = self.member_links[root]
            .iter()
            .map(|&l| self.links[l].clone())
            .collect();
        links.sort_by_key(|l| l.link_id);
        MoneyFlow {
            flow_id: flow_id_for(self.events[root].event_id),
            events,
            links,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tenon_schemas::{Confidence, Direction, EventType, LinkType, Resolved};

    fn ev(n: u8) -> CanonicalEvent {
        CanonicalEvent {
            event_id: Uuid::from_bytes([n; 16]),
            source_system: "psp".to_string(),
            source_event_id: Some(format!("evt_{n}")),
            external_reference: None,
            correlation_id: None,
            event_type: EventType::PaymentInitiated,
            direction: Direction::Inbound,
            amount_micros: Resolved::Known(1),
            currency: Resolved::Known("USD".to_string()),
            observed_at: Utc.timestamp_opt(1_760_000_000 + n as i64, 0).unwrap(),
            source_timestamp: None,
            raw_payload_hash: format!("h{n}"),
            lineage_links: vec![],
            normalizer_version: "n".to_string(),
            adapter_version: "1".to_string(),
            unknown_fields: vec![],
        }
    }

    fn link(id: u8, from: u8, to: u8) -> CorrelationLink {
        CorrelationLink {
            link_id: Uuid::from_bytes([id; 16]),
            from_event_id: Uuid::from_bytes([from; 16]),
            to_event_id: Uuid::from_bytes([to; 16]),
            link_type: LinkType::PotentialMatch,
            rule_id: "r".to_string(),
            rule_version: "corr-v1".to_string(),
            evidence: vec![],
            confidence_score: Confidence::FULL,
            engine_version: "e".to_string(),
            explanation: String::new(),
            created_at: Utc.timestamp_opt(1_760_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn flow_is_anchored_at_earliest_event() {
        let mut g = FlowGraph::new();
        for n in 1..=4 {
            assert!(g.add_event(ev(n)));
        }
        assert!(!g.add_event(ev(2)));
        assert_eq!(g.flows().len(), 4);

        g.add_link(link(100, 3, 4)).unwrap();
        g.add_link(link(101, 2, 4)).unwrap();
        let anchor = flow_id_for(Uuid::from_bytes([2; 16]));
        assert_eq!(g.flow_id_of(Uuid::from_bytes([4; 16])), Some(anchor.clone()));

        let f = g.flow(&anchor).unwrap();
        assert_eq!(f.events.len(), 3);
        assert_eq!(f.links.len(), 2);
        assert!(g.flow(&flow_id_for(Uuid::from_bytes([3; 16]))).is_none());
        assert_eq!(g.flows().len(), 2);
    }

    #[test]
    fn links_need_committed_endpoints_and_dedupe_by_id() {
        let mut g = FlowGraph::new();
        g.add_event(ev(1));
        g.add_event(ev(2));
        assert_eq!(
            g.add_link(link(100, 1, 9)),
            Err(CorrelationError::UnknownEndpoint(Uuid::from_bytes([9; 16])))
        );
        assert_eq!(g.add_link(link(100, 1, 2)), Ok(true));
        assert_eq!(g.add_link(link(100, 1, 2)), Ok(false));
        assert_eq!(g.links().len(), 1);
    }

    #[test]
    fn merging_flows_carries_members_and_links_to_the_earlier_anchor() {
        let mut g = FlowGraph::new();
        for n in 1..=6 {
            g.add_event(ev(n));
        }
        g.add_link(link(100, 5, 6)).unwrap();
        g.add_link(link(101, 2, 3)).unwrap();
        g.add_link(link(102, 6, 3)).unwrap();
        assert_eq!(g.flow_count(), 3);

        let flows = g.flows();
        let ids: Vec<&str> = flows.iter().map(|f| f.flow_id.as_str()).collect();
        let (a1, a2, a4) = (
            flow_id_for(Uuid::from_bytes([1; 16])),
            flow_id_for(Uuid::from_bytes([2; 16])),
            flow_id_for(Uuid::from_bytes([4; 16])),
        );
        assert_eq!(ids, vec![a1.as_str(), a2.as_str(), a4.as_str()]);

        let merged = &flows[1];
        let order: Vec<Uuid> = merged.events.iter().map(|e| e.event_id).collect();
        let expected: Vec<Uuid> = [2u8, 3, 5, 6].iter().map(|n| Uuid::from_bytes([*n; 16])).collect();
        assert_eq!(order, expected, "members stay in commit order");
        assert_eq!(merged.links.len(), 3);
        assert_eq!(g.flow_of(Uuid::from_bytes([5; 16])).unwrap(), *merged);
    }
}
