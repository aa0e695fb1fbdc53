//! tenon-schemas
//!
//! Shared data model of the reconciliation core.
//!
//! Architectural decisions:
//! - Every classification is a closed enum with an explicit UNKNOWN / AMBIGUOUS member
//! - Unresolved values are explicit (`Resolved::Unknown`), never defaulted
//! - Money is integer micros; confidence is integer basis points (no floats)
//! - Every derived record carries its supporting ids and the rule version that produced it
//! - Ids are UUIDv5 over canonical content (no RNG anywhere)
//!
//! Pure types. No IO.

/// Declares a closed, wire-stable enum.
///
/// Generates `ALL`, `as_str`, `parse` and `Display`; the wire name is used for serde.
macro_rules! closed_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $wire:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
            serde::Serialize, serde::Deserialize,
        )]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $wire)] $variant ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[ $( $name::$variant ),+ ];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $wire ),+
                }
            }

            /// Exact wire-name lookup. Anything else is outside the closed set.
            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $( $wire => Some($name::$variant), )+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

mod canonical;
mod causality;
mod confidence;
mod correlation;
mod discrepancy;
mod flow;
mod hashing;
mod idempotency;
mod ingest;
mod state;

pub use canonical::*;
pub use causality::*;
pub use confidence::Confidence;
pub use correlation::*;
pub use discrepancy::*;
pub use flow::*;
pub use hashing::{canonical_json, derive_id, hash_canonical, sha256_hex, sort_keys};
pub use idempotency::*;
pub use ingest::*;
pub use state::*;

/// Version of the evidence payload schema written by this build.
pub const SCHEMA_VERSION: u32 = 1;
