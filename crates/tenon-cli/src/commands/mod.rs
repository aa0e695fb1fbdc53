//! Command handlers for the `tenon` CLI.
//!
//! Shared helpers (path resolution, rule book loading, log opening) live here;
//! command logic lives in the submodules.

pub mod ingest;
pub mod inspect;
pub mod replay;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use tenon_config::LoadedRuleBook;
use tenon_evidence::EvidenceLog;
use tenon_pipeline::{FsRawStore, Pipeline, SystemTime};

const ENV_EVIDENCE_LOG: &str = "TENON_EVIDENCE_LOG";
const ENV_RAW_DIR: &str = "TENON_RAW_DIR";
const DEFAULT_EVIDENCE_LOG: &str = "tenon-data/evidence.jsonl";
const DEFAULT_RAW_DIR: &str = "tenon-data/raw";

/// Where the CLI reads and writes. Flag, then env var, then default.
#[derive(Debug, Clone)]
pub struct Paths {
    pub log: PathBuf,
    pub raw_dir: PathBuf,
    pub rules: Vec<String>,
}

impl Paths {
    pub fn resolve(log: Option<String>, raw_dir: Option<String>, rules: Vec<String>) -> Self {
        let pick = |flag: Option<String>, env: &str, default: &str| {
            flag.or_else(|| std::env::var(env).ok())
                .unwrap_or_else(|| default.to_string())
        };
        Self {
            log: PathBuf::from(pick(log, ENV_EVIDENCE_LOG, DEFAULT_EVIDENCE_LOG)),
            raw_dir: PathBuf::from(pick(raw_dir, ENV_RAW_DIR, DEFAULT_RAW_DIR)),
            rules,
        }
    }
}

pub fn load_rulebook(layers: &[String]) -> Result<LoadedRuleBook> {
    if layers.is_empty() {
        return LoadedRuleBook::builtin_v1();
    }
    let refs: Vec<&str> = layers.iter().map(|s| s.as_str()).collect();
    LoadedRuleBook::from_paths(&refs)
}

/// Open (or create) the evidence log for writing.
pub fn open_log(path: &Path) -> Result<Arc<EvidenceLog>> {
    let log = EvidenceLog::open(path).with_context(|| format!("open evidence log {:?}", path))?;
    Ok(Arc::new(log))
}

/// Load an existing evidence log for reading. Does not take the writer lock,
/// so queries work while an ingest holds the log. Never creates a log.
pub fn open_existing_log(path: &Path) -> Result<Arc<EvidenceLog>> {
    if !path.exists() {
        bail!("evidence log {:?} does not exist", path);
    }
    let log = EvidenceLog::open_read_only(path)
        .with_context(|| format!("load evidence log {:?}", path))?;
    Ok(Arc::new(log))
}

pub fn open_raw_store(paths: &Paths) -> Result<FsRawStore> {
    FsRawStore::open(&paths.raw_dir)
}

pub fn open_pipeline(paths: &Paths) -> Result<Pipeline> {
    let book = load_rulebook(&paths.rules)?;
    let log = open_log(&paths.log)?;
    Pipeline::open(log, &book, Arc::new(SystemTime))
}

pub fn parse_uuid(what: &str, s: &str) -> Result<Uuid> {
    Uuid::parse_str(s.trim()).with_context(|| format!("invalid {what} uuid: {s}"))
}

pub fn print_json<T: Serialize>(v: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(v).context("serialize output json failed")?;
    println!("{json}");
    Ok(())
}
