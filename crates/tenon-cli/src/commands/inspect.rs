use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;

use tenon_config::{load_layered_yaml, load_layered_yaml_from_strings, BUILTIN_V1_YAML};
use tenon_evidence::{verify_jsonl, ScanCriteria, VerifyResult};
use tenon_pipeline::Projection;

use super::{open_existing_log, parse_uuid, print_json, Paths};

pub fn config_hash(layers: &[String]) -> Result<()> {
    let loaded = if layers.is_empty() {
        load_layered_yaml_from_strings(&[BUILTIN_V1_YAML])?
    } else {
        let refs: Vec<&str> = layers.iter().map(|s| s.as_str()).collect();
        load_layered_yaml(&refs)?
    };
    println!("config_hash={}", loaded.config_hash);
    println!("{}", loaded.canonical_json);
    Ok(())
}

pub fn verify(paths: &Paths) -> Result<()> {
    match verify_jsonl(&paths.log)? {
        VerifyResult::Valid { lines } => {
            println!("evidence_chain=VALID lines={lines}");
            Ok(())
        }
        VerifyResult::Broken { line, reason } => {
            bail!("EVIDENCE_CHAIN_BROKEN line={line} reason={reason}")
        }
    }
}

fn projection(paths: &Paths) -> Result<Projection> {
    let log = open_existing_log(&paths.log)?;
    Ok(Projection::build(&log))
}

pub fn flows(paths: &Paths) -> Result<()> {
    let p = projection(paths)?;
    for flow_id in p.flow_ids() {
        println!("{flow_id}");
    }
    Ok(())
}

pub fn flow(paths: &Paths, flow_id: &str) -> Result<()> {
    let p = projection(paths)?;
    let view = p
        .flow(flow_id)
        .with_context(|| format!("FLOW_NOT_FOUND flow_id={flow_id}"))?;
    print_json(&view)
}

pub fn discrepancy(paths: &Paths, discrepancy_id: &str) -> Result<()> {
    let id = parse_uuid("discrepancy", discrepancy_id)?;
    let p = projection(paths)?;
    let view = p
        .discrepancy(id)
        .with_context(|| format!("DISCREPANCY_NOT_FOUND discrepancy_id={id}"))?;
    print_json(&view)
}

pub fn event(paths: &Paths, event_id: &str) -> Result<()> {
    let id = parse_uuid("event", event_id)?;
    let p = projection(paths)?;
    let view = p
        .event(id)
        .with_context(|| format!("EVENT_NOT_FOUND event_id={id}"))?;
    print_json(&view)
}

pub fn count(paths: &Paths) -> Result<()> {
    let log = open_existing_log(&paths.log)?;
    let mut by_kind: BTreeMap<&'static str, u64> = BTreeMap::new();
    for ev in log.snapshot(ScanCriteria::all()) {
        *by_kind.entry(ev.payload.kind().as_str()).or_default() += 1;
    }
    println!("total={}", log.count());
    for (kind, n) in by_kind {
        println!("{kind}={n}");
    }
    Ok(())
}
