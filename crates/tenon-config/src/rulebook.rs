use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tenon_causality::{CausalityAttributor, CausalityRuleSet};
use tenon_correlation::{CorrelationEngine, CorrelationRuleSet};
use tenon_discrepancy::{DiscrepancyClassifier, DiscrepancyRuleSet};
use tenon_normalize::{CanonicalEventBuilder, NormalizationRule};
use tenon_state::{MoneyStateMachine, TransitionRuleSet};

use crate::adapters::{AdapterContract, AdapterRegistry};
use crate::layered::{load_layered_yaml, load_layered_yaml_from_strings, LoadedConfig};

/// Source of the built-in v1 rule book.
pub const BUILTIN_V1_YAML: &str = include_str!("../rules/v1.yaml");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdempotencyRules {
    pub rule_version: String,
}

/// Every rule set the core interprets, pinned together under one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleBook {
    pub rulebook_version: String,
    /// Evaluations at or after this instant resolve to this book.
    pub effective_from: DateTime<Utc>,
    pub idempotency: IdempotencyRules,
    /// Adapter contracts; ingestion from an unlisted (source, version) is refused.
    pub adapters: Vec<AdapterContract>,
    pub normalization: Vec<NormalizationRule>,
    pub correlation: CorrelationRuleSet,
    pub state: TransitionRuleSet,
    pub discrepancy: DiscrepancyRuleSet,
    pub causality: CausalityRuleSet,
}

/// A rule book plus the hash of the canonical document it was read from.
#[derive(Debug, Clone)]
pub struct LoadedRuleBook {
    pub book: RuleBook,
    pub config_hash: String,
}

/// Interpreters compiled from one rule book.
#[derive(Debug, Clone)]
pub struct Engines {
    pub idempotency_rule_version: String,
    pub adapters: AdapterRegistry,
    pub builder: CanonicalEventBuilder,
    pub correlation: CorrelationEngine,
    pub state: MoneyStateMachine,
    pub discrepancy: DiscrepancyClassifier,
    pub causality: CausalityAttributor,
}

impl RuleBook {
    pub fn from_loaded(loaded: &LoadedConfig) -> Result<Self> {
        serde_json::from_value(loaded.config_json.clone())
            .context("rule book does not match the RuleBook schema")
    }

    /// Compiles every section; any invalid rule set fails the whole book.
    pub fn compile(&self) -> Result<Engines> {
        let v = &self.rulebook_version;
        Ok(Engines {
            idempotency_rule_version: self.idempotency.rule_version.clone(),
            adapters: AdapterRegistry::from_contracts(self.adapters.iter().cloned())
                .with_context(|| format!("rule book {v}: adapters"))?,
            builder: CanonicalEventBuilder::new(self.normalization.iter().cloned())
                .with_context(|| format!("rule book {v}: normalization"))?,
            correlation: CorrelationEngine::new(self.correlation.clone())
                .with_context(|| format!("rule book {v}: correlation"))?,
            state: MoneyStateMachine::new(self.state.clone())
                .with_context(|| format!("rule book {v}: state machine"))?,
            discrepancy: DiscrepancyClassifier::new(self.discrepancy.clone())
                .with_context(|| format!("rule book {v}: discrepancy"))?,
            causality: CausalityAttributor::new(self.causality.clone())
                .with_context(|| format!("rule book {v}: causality"))?,
        })
    }
}

impl LoadedRuleBook {
    fn from_config(loaded: LoadedConfig) -> Result<Self> {
        let book = RuleBook::from_loaded(&loaded)?;
        book.compile()?;
        Ok(Self {
            book,
            config_hash: loaded.config_hash,
        })
    }

    pub fn builtin_v1() -> Result<Self> {
        Self::from_yaml_layers(&[BUILTIN_V1_YAML])
    }

    /// Layers merge in order over each other (no implicit base).
    pub fn from_yaml_layers(docs: &[&str]) -> Result<Self> {
        Self::from_config(load_layered_yaml_from_strings(docs)?)
    }

    pub fn from_paths(paths: &[&str]) -> Result<Self> {
        Self::from_config(load_layered_yaml(paths)?)
    }

    pub fn version(&self) -> &str {
        &self.book.rulebook_version
    }

    pub fn compile(&self) -> Result<Engines> {
        self.book.compile()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_book_loads_and_compiles() {
        let loaded = LoadedRuleBook::builtin_v1().unwrap();
        assert_eq!(loaded.version(), "v1");
        assert_eq!(loaded.book.idempotency.rule_version, "idem-v1");
        let engines = loaded.compile().unwrap();
        assert_eq!(engines.state.rule_version(), "msm-v1");
        assert_eq!(engines.correlation.engine_version(), "corr-engine/1");
        assert_eq!(engines.builder.rules().count(), 2);
        assert!(engines.adapters.get("psp", "psp-adapter/2").is_some());
        assert!(engines.adapters.get("bank", "bank-adapter/1").is_some());
    }

    #[test]
    fn conflicting_adapter_contracts_fail_the_book() {
        let overlay = r#"
adapters:
  - { adapter_id: bank, adapter_type: BANK, adapter_version: bank-adapter/1, schema_version: "1.0.0", supported_formats: [JSON] }
  - { adapter_id: bank, adapter_type: BANK, adapter_version: bank-adapter/1, schema_version: "1.0.0", supported_formats: [CSV] }
"#;
        let err = LoadedRuleBook::from_yaml_layers(&[BUILTIN_V1_YAML, overlay]).unwrap_err();
        assert!(format!("{err:#}").contains("ADAPTER_CONTRACT_CONFLICT"), "{err:#}");
    }

    #[test]
    fn overlay_changes_version_and_hash() {
        let base = LoadedRuleBook::builtin_v1().unwrap();
        let overlay = "rulebook_version: v1-test\nstate: {ambiguous_confidence: 1000}\n";
        let over = LoadedRuleBook::from_yaml_layers(&[BUILTIN_V1_YAML, overlay]).unwrap();
        assert_eq!(over.version(), "v1-test");
        assert_eq!(over.book.state.ambiguous_confidence.bps(), 1000);
        assert_eq!(over.book.state.transitions, base.book.state.transitions);
        assert_ne!(over.config_hash, base.config_hash);
    }

    #[test]
    fn invalid_section_fails_the_whole_book() {
        let overlay = "state: {initial_state: AMBIGUOUS}\n";
        let err = LoadedRuleBook::from_yaml_layers(&[BUILTIN_V1_YAML, overlay])
            .unwrap_err();
        assert!(format!("{err:#}").contains("state machine"), "{err:#}");
    }

    #[test]
    fn unknown_keys_are_refused() {
        let overlay = "surprise: true\n";
        assert!(LoadedRuleBook::from_yaml_layers(&[BUILTIN_V1_YAML, overlay]).is_err());
    }
}
