//! tenon-normalize
//!
//! CanonicalEventBuilder: version-pinned mapping from a preserved raw observation
//! into the single canonical event shape.
//!
//! Architectural decisions:
//! - Pure: same declaration + same rule version => byte-identical output
//! - Rule selection is by exact signature (source_system, payload_format, schema_hint)
//! - Unmappable values become explicit UNKNOWN with a warning; nothing is guessed or repaired
//! - Amounts convert to integer micros without floating point
//! - Only structurally invalid input or a rule violation is an error
//!
//! No IO.

mod amount;
mod builder;
mod rules;

pub use amount::{amount_to_micros, currency_code, AmountError};
pub use builder::{BuildInput, CanonicalEventBuilder, NormalizeError, Normalized};
pub use rules::{AmountUnit, FieldPaths, LineagePath, NormalizationRule, RuleSignature};

/// Version of the mapping engine itself (rule versions are carried separately).
pub const NORMALIZER_VERSION: &str = "1.0.0";
