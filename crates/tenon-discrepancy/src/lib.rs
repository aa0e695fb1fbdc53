//! tenon-discrepancy
//!
//! DiscrepancyClassifier: state + flow evidence -> closed deviation taxonomy.
//!
//! Architectural decisions:
//! - Each rule is a closed condition plus the category it reports; conditions are interpreted,
//!   not scripted
//! - Every firing deviation rule emits its own record
//! - NO_DISCREPANCY is only emitted when no deviation rule fires
//! - Nothing fires => INSUFFICIENT_EVIDENCE (never a silent default)
//! - Records are keyed by (flow, state evaluation, rule, version): re-classification under a
//!   newer rule version adds records and never replaces old ones
//!
//! Deterministic, pure logic. No IO.

mod classifier;
mod rules;

pub use classifier::{DiscrepancyClassifier, DiscrepancyError, FALLBACK_RULE_ID};
pub use rules::{Condition, DiscrepancyRule, DiscrepancyRuleSet};
