//! tenon-correlation
//!
//! CorrelationEngine and the MoneyFlow graph.
//!
//! Architectural decisions:
//! - Rules are data: required evidence + integer weights + minimum score, selected by version
//! - A rule with insufficient evidence does not fire; that is not an error
//! - Every plausible link is kept; identities are never merged
//! - Link ids are UUIDv5 over (from, to, rule_id, rule_version): re-evaluation is idempotent,
//!   a new rule version yields new links and old ones remain
//! - The graph is an arena of immutable nodes / edges; flows are connected components
//!   anchored at their earliest committed event
//!
//! Deterministic, pure logic. No IO.

mod engine;
mod graph;
mod rules;

pub use engine::{collect_evidence, CorrelationEngine, CorrelationError};
pub use graph::FlowGraph;
pub use rules::{CorrelationRule, CorrelationRuleSet};
