use anyhow::{bail, Result};
use tracing::info;

use tenon_pipeline::replay as replay_log;

use super::{load_rulebook, open_existing_log, open_raw_store, Paths};

/// Re-derive the log into a scratch copy with the selected rule book and compare.
/// Exits non-zero on any difference.
pub fn replay(paths: &Paths) -> Result<()> {
    let book = load_rulebook(&paths.rules)?;
    let log = open_existing_log(&paths.log)?;
    let raw = open_raw_store(paths)?;

    let outcome = replay_log(&log, &raw, &book)?;
    let r = &outcome.report;

    println!("rulebook_version={}", r.rulebook_version);
    println!("config_hash={}", r.config_hash);
    println!("observations={} watermarks={}", r.observations, r.watermarks);
    println!("original_fingerprint={}", r.original_fingerprint);
    println!("replayed_fingerprint={}", r.replayed_fingerprint);
    for k in &r.missing {
        println!("missing {k}");
    }
    for k in &r.extra {
        println!("extra {k}");
    }
    for k in &r.changed {
        println!("changed {k}");
    }
    info!(replayed_events = outcome.replayed.count(), "cli/replay");

    if !r.matches() {
        bail!(
            "REPLAY_MISMATCH missing={} extra={} changed={}",
            r.missing.len(),
            r.extra.len(),
            r.changed.len()
        );
    }
    println!("replay=MATCH");
    Ok(())
}
