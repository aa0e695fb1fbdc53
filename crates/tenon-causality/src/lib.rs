//! tenon-causality
//!
//! CausalityAttributor: zero-to-many evidenced causes per discrepancy.
//!
//! Architectural decisions:
//! - Every rule is evaluated independently; each firing rule emits its own attribution
//! - Causes are never collapsed into a single "root cause"
//! - Firing below the configured confidence floor counts as weak evidence
//! - Weak or absent evidence => one UNKNOWN_CAUSE attribution from the engine fallback
//! - NO_DISCREPANCY records are not attributed
//!
//! Deterministic, pure logic. No IO.

mod attributor;
mod rules;

pub use attributor::{AttributionContext, CausalityAttributor, CausalityError};
pub use rules::{CausalityRule, CausalityRuleSet, CauseCondition};
