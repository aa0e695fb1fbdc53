//! tenon-config
//!
//! Versioned rule books: layered YAML, canonical hash, registry.
//!
//! Architectural decisions:
//! - YAML layers merge in order (later overrides earlier); arrays replace wholesale
//! - The effective document is hashed as canonical JSON (sorted keys) => config_hash
//! - Secret-looking literals abort the load (CONFIG_SECRET_DETECTED)
//! - A rule book is validated by compiling every interpreter; one bad section fails the book
//! - Published versions are immutable; the registry refuses a different book under a known version
//! - Adapter contracts are versioned with the book; an unregistered (source, adapter version) cannot ingest
//! - A built-in `v1` book ships with the crate

mod adapters;
mod layered;
mod registry;
mod rulebook;

pub use adapters::{AdapterContract, AdapterError, AdapterRegistry, AdapterType, ContractError};
pub use layered::{load_layered_yaml, load_layered_yaml_from_strings, LoadedConfig};
pub use registry::RuleRegistry;
pub use rulebook::{Engines, IdempotencyRules, LoadedRuleBook, RuleBook, BUILTIN_V1_YAML};
