use anyhow::Result;
use std::sync::Arc;

use tenon_config::{Engines, LoadedRuleBook};
use tenon_evidence::EvidenceLog;
use tenon_schemas::RawObservation;

use crate::derive::{DeriveReport, Deriver};
use crate::ingest::{IngestError, IngestReport, Ingestor};
use crate::projection::Projection;
use crate::time::TimeSource;

/// Ingestor and deriver wired to one log under one rule book.
pub struct Pipeline {
    log: Arc<EvidenceLog>,
    rulebook_version: String,
    engines: Engines,
    ingestor: Ingestor,
    deriver: Deriver,
}

impl Pipeline {
    pub fn open(
        log: Arc<EvidenceLog>,
        book: &LoadedRuleBook,
        time: Arc<dyn TimeSource>,
    ) -> Result<Self> {
        let engines = book.compile()?;
        let ingestor = Ingestor::open(
            Arc::clone(&log),
            engines.builder.clone(),
            engines.adapters.clone(),
            engines.idempotency_rule_version.clone(),
            time,
        )?;
        let deriver = Deriver::new(Arc::clone(&log), &engines);
        Ok(Self {
            log,
            rulebook_version: book.version().to_string(),
            engines,
            ingestor,
            deriver,
        })
    }

    pub fn log(&self) -> &Arc<EvidenceLog> {
        &self.log
    }

    pub fn rulebook_version(&self) -> &str {
        &self.rulebook_version
    }

    pub fn engines(&self) -> &Engines {
        &self.engines
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    pub fn ingest(&self, obs: &RawObservation) -> Result<IngestReport, IngestError> {
        self.ingestor.ingest(obs)
    }

    pub fn tick(&self, reason: &str) -> Result<u64, IngestError> {
        self.ingestor.tick(reason)
    }

    pub fn derive(&mut self) -> Result<DeriveReport> {
        Ok(self.deriver.run()?)
    }

    pub fn projection(&self) -> Projection {
        Projection::build(&self.log)
    }
}
