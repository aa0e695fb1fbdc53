use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use tenon_schemas::{IngestDeclaration, PayloadFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdapterType {
    Bank,
    Psp,
    Erp,
    Ledger,
}

/// What one adapter version is allowed to declare.
///
/// `adapter_id` is the `source_system` the adapter emits under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdapterContract {
    pub adapter_id: String,
    pub adapter_type: AdapterType,
    pub adapter_version: String,
    pub schema_version: String,
    pub supported_formats: Vec<PayloadFormat>,
    #[serde(default)]
    pub declared_event_capabilities: Vec<String>,
}

/// A declaration the registry refuses. Nothing is written for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    Unregistered {
        source_system: String,
        adapter_version: String,
    },
    UnsupportedFormat {
        source_system: String,
        adapter_version: String,
        format: PayloadFormat,
    },
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterError::Unregistered {
                source_system,
                adapter_version,
            } => write!(
                f,
                "ADAPTER_NOT_REGISTERED source_system={source_system} adapter_version={adapter_version}"
            ),
            AdapterError::UnsupportedFormat {
                source_system,
                adapter_version,
                format,
            } => write!(
                f,
                "ADAPTER_FORMAT_UNSUPPORTED source_system={source_system} adapter_version={adapter_version} format={format}"
            ),
        }
    }
}

impl std::error::Error for AdapterError {}

/// A contract the registry will not accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractError {
    EmptyField(&'static str),
    NoFormats { adapter_id: String },
    DuplicateFormat { adapter_id: String, format: PayloadFormat },
    /// A different contract is already registered under this (id, version).
    Conflict {
        adapter_id: String,
        adapter_version: String,
    },
}

impl fmt::Display for ContractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractError::EmptyField(field) => write!(f, "adapter contract field {field} is empty"),
            ContractError::NoFormats { adapter_id } => {
                write!(f, "adapter {adapter_id} declares no supported formats")
            }
            ContractError::DuplicateFormat { adapter_id, format } => {
                write!(f, "adapter {adapter_id} lists format {format} twice")
            }
            ContractError::Conflict {
                adapter_id,
                adapter_version,
            } => write!(
                f,
                "ADAPTER_CONTRACT_CONFLICT adapter_id={adapter_id} adapter_version={adapter_version}"
            ),
        }
    }
}

impl std::error::Error for ContractError {}

/// Registered adapter contracts, keyed by (source_system, adapter_version).
///
/// Ingestion without a matching contract is refused.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdapterRegistry {
    contracts: BTreeMap<(String, String), AdapterContract>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_contracts(
        contracts: impl IntoIterator<Item = AdapterContract>,
    ) -> Result<Self, ContractError> {
        let mut reg = Self::new();
        for c in contracts {
            reg.register(c)?;
        }
        Ok(reg)
    }

    /// Identical re-registration is a no-op; a changed contract under a known
    /// version is refused.
    pub fn register(&mut self, contract: AdapterContract) -> Result<(), ContractError> {
        for (field, value) in [
            ("adapter_id", &contract.adapter_id),
            ("adapter_version", &contract.adapter_version),
            ("schema_version", &contract.schema_version),
        ] {
            if value.trim().is_empty() {
                return Err(ContractError::EmptyField(field));
            }
        }
        if contract.supported_formats.is_empty() {
            return Err(ContractError::NoFormats {
                adapter_id: contract.adapter_id,
            });
        }
        let mut seen = Vec::with_capacity(contract.supported_formats.len());
        for f in &contract.supported_formats {
            if seen.contains(f) {
                return Err(ContractError::DuplicateFormat {
                    adapter_id: contract.adapter_id.clone(),
                    format: *f,
                });
            }
            seen.push(*f);
        }

        let key = (contract.adapter_id.clone(), contract.adapter_version.clone());
        match self.contracts.get(&key) {
            Some(existing) if *existing == contract => Ok(()),
            Some(_) => Err(ContractError::Conflict {
                adapter_id: key.0,
                adapter_version: key.1,
            }),
            None => {
                self.contracts.insert(key, contract);
                Ok(())
            }
        }
    }

    pub fn get(&self, source_system: &str, adapter_version: &str) -> Option<&AdapterContract> {
        self.contracts
            .get(&(source_system.to_string(), adapter_version.to_string()))
    }

    /// Contract governing `d`, or why the declaration is refused.
    pub fn check(&self, d: &IngestDeclaration) -> Result<&AdapterContract, AdapterError> {
        let contract = self
            .get(&d.source_system, &d.adapter_version)
            .ok_or_else(|| AdapterError::Unregistered {
                source_system: d.source_system.clone(),
                adapter_version: d.adapter_version.clone(),
            })?;
        if !contract.supported_formats.contains(&d.payload_format) {
            return Err(AdapterError::UnsupportedFormat {
                source_system: d.source_system.clone(),
                adapter_version: d.adapter_version.clone(),
                format: d.payload_format,
            });
        }
        Ok(contract)
    }

    pub fn contracts(&self) -> impl Iterator<Item = &AdapterContract> {
        self.contracts.values()
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract(id: &str, version: &str) -> AdapterContract {
        AdapterContract {
            adapter_id: id.to_string(),
            adapter_type: AdapterType::Bank,
            adapter_version: version.to_string(),
            schema_version: "1.0.0".to_string(),
            supported_formats: vec![PayloadFormat::Json, PayloadFormat::Csv],
            declared_event_capabilities: vec!["payment_received".to_string()],
        }
    }

    fn declaration(source: &str, version: &str, format: PayloadFormat) -> IngestDeclaration {
        IngestDeclaration {
            source_system: source.to_string(),
            source_event_id: Some("e1".to_string()),
            external_reference: None,
            payload_raw: "{}".to_string(),
            payload_format: format,
            source_timestamp: None,
            adapter_version: version.to_string(),
            schema_hint: None,
        }
    }

    #[test]
    fn registered_pair_passes_and_others_are_refused() {
        let reg = AdapterRegistry::from_contracts([contract("bank", "bank-adapter/1")]).unwrap();

        assert!(reg
            .check(&declaration("bank", "bank-adapter/1", PayloadFormat::Json))
            .is_ok());
        assert_eq!(
            reg.check(&declaration("bank", "bank-adapter/9", PayloadFormat::Json)),
            Err(AdapterError::Unregistered {
                source_system: "bank".to_string(),
                adapter_version: "bank-adapter/9".to_string(),
            })
        );
        assert!(matches!(
            reg.check(&declaration("psp", "bank-adapter/1", PayloadFormat::Json)),
            Err(AdapterError::Unregistered { .. })
        ));
        assert!(matches!(
            reg.check(&declaration("bank", "bank-adapter/1", PayloadFormat::Xml)),
            Err(AdapterError::UnsupportedFormat {
                format: PayloadFormat::Xml,
                ..
            })
        ));
    }

    #[test]
    fn published_contract_cannot_change() {
        let mut reg = AdapterRegistry::new();
        reg.register(contract("bank", "bank-adapter/1")).unwrap();
        reg.register(contract("bank", "bank-adapter/1")).unwrap();
        assert_eq!(reg.len(), 1);

        let mut changed = contract("bank", "bank-adapter/1");
        changed.supported_formats = vec![PayloadFormat::Json];
        assert!(matches!(
            reg.register(changed),
            Err(ContractError::Conflict { .. })
        ));

        reg.register(contract("bank", "bank-adapter/2")).unwrap();
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn incomplete_contracts_are_refused() {
        let mut reg = AdapterRegistry::new();
        let mut c = contract("bank", "bank-adapter/1");
        c.adapter_version = " ".to_string();
        assert_eq!(
            reg.register(c),
            Err(ContractError::EmptyField("adapter_version"))
        );

        let mut c = contract("bank", "bank-adapter/1");
        c.supported_formats.clear();
        assert!(matches!(reg.register(c), Err(ContractError::NoFormats { .. })));

        let mut c = contract("bank", "bank-adapter/1");
        c.supported_formats.push(PayloadFormat::Json);
        assert!(matches!(
            reg.register(c),
            Err(ContractError::DuplicateFormat { .. })
        ));
        assert!(reg.is_empty());
    }

    #[test]
    fn unknown_adapter_type_does_not_parse() {
        let yaml = r#"
adapter_id: bank
adapter_type: INVALID_TYPE
adapter_version: bank-adapter/1
schema_version: "1.0.0"
supported_formats: [JSON]
"#;
        assert!(serde_yaml::from_str::<AdapterContract>(yaml).is_err());
    }
}
