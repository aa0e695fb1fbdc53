use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs;

use tenon_pipeline::{observe, DeriveReport, Pipeline};
use tenon_schemas::IngestDeclaration;

use super::{open_pipeline, open_raw_store, Paths};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Read declarations from a JSON array or JSON Lines file (UTF-8, BOM tolerated).
pub fn read_declarations(path: &str) -> Result<Vec<IngestDeclaration>> {
    let bytes = fs::read(path).with_context(|| format!("read declarations failed: {path}"))?;
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes[..]);
    let raw = std::str::from_utf8(body).context("declarations file must be UTF-8 text")?;
    let trimmed = raw.trim();

    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).context("declarations array is not valid");
    }
    let mut out = Vec::new();
    for (i, line) in trimmed.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let d: IngestDeclaration = serde_json::from_str(line)
            .with_context(|| format!("declaration at line {} is not valid", i + 1))?;
        out.push(d);
    }
    Ok(out)
}

pub fn ingest(paths: &Paths, file: &str, derive_after: bool) -> Result<()> {
    let declarations = read_declarations(file)?;
    let raw = open_raw_store(paths)?;
    let mut pipeline = open_pipeline(paths)?;

    let mut malformed = 0usize;
    for (i, d) in declarations.into_iter().enumerate() {
        let obs = observe(&raw, d)?;
        match pipeline.ingest(&obs) {
            Ok(r) => {
                let event = r.event_id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string());
                let rejected = r
                    .rejection
                    .as_ref()
                    .map(|x| x.reason_code.as_str())
                    .unwrap_or("-");
                println!(
                    "item={} decision={} key={} event_id={} rejection={}",
                    i, r.decision, r.idempotency_key, event, rejected
                );
                if let Some(accept) = r.resumed_decision {
                    println!("item={} resumed_accept={}", i, accept);
                }
            }
            Err(tenon_pipeline::IngestError::Malformed(e)) => {
                malformed += 1;
                println!("item={} malformed=true reason={}", i, e);
            }
            Err(tenon_pipeline::IngestError::UnregisteredAdapter(e)) => {
                malformed += 1;
                println!("item={} refused=true reason={}", i, e);
            }
            Err(e) => return Err(e.into()),
        }
    }
    if malformed > 0 {
        eprintln!("{malformed} malformed or unregistered declaration(s) were not recorded");
    }

    if derive_after {
        print_derive(&pipeline.derive()?);
    }
    Ok(())
}

pub fn tick(paths: &Paths, at: Option<&str>, reason: &str) -> Result<()> {
    let mut pipeline = open_pipeline(paths)?;
    let sequence = match at {
        Some(s) => {
            let at: DateTime<Utc> = DateTime::parse_from_rfc3339(s)
                .with_context(|| format!("invalid --at (expected RFC 3339): {s}"))?
                .with_timezone(&Utc);
            pipeline.ingestor().tick_at(at, reason)?
        }
        None => pipeline.tick(reason)?,
    };
    println!("watermark_sequence={sequence}");
    print_derive(&pipeline.derive()?);
    Ok(())
}

pub fn derive(paths: &Paths) -> Result<()> {
    let mut pipeline: Pipeline = open_pipeline(paths)?;
    print_derive(&pipeline.derive()?);
    Ok(())
}

fn print_derive(r: &DeriveReport) {
    println!(
        "derived links={} states={} discrepancies={} attributions={} next_sequence={}",
        r.links, r.states, r.discrepancies, r.attributions, r.next_sequence
    );
}
