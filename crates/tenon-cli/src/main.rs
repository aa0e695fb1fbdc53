use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::Paths;

#[derive(Parser)]
#[command(name = "tenon")]
#[command(about = "Deterministic reconciliation core CLI", long_about = None)]
struct Cli {
    /// Evidence log (JSONL). Env: TENON_EVIDENCE_LOG
    #[arg(long, global = true)]
    log: Option<String>,

    /// Raw payload store directory. Env: TENON_RAW_DIR
    #[arg(long = "raw-dir", global = true)]
    raw_dir: Option<String>,

    /// Rule book layers in merge order (built-in v1 when omitted)
    #[arg(long = "rules", global = true)]
    rules: Vec<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute layered rule book hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (built-in v1 when empty)
        paths: Vec<String>,
    },

    /// Ingest adapter declarations (JSON array or one JSON object per line)
    Ingest {
        /// Declarations file
        #[arg(long)]
        file: String,

        /// Record only; skip derivation
        #[arg(long = "no-derive", default_value_t = false)]
        no_derive: bool,
    },

    /// Record a watermark (evaluation time advance) and derive
    Tick {
        /// RFC 3339 instant (now when omitted)
        #[arg(long)]
        at: Option<String>,

        #[arg(long, default_value = "manual")]
        reason: String,
    },

    /// Derive links / states / discrepancies / causes for everything committed
    Derive,

    /// Verify the evidence hash chain
    Verify,

    /// Re-ingest recorded observations into a scratch log and compare derived records
    Replay,

    /// Point lookups against the evidence log
    Query {
        #[command(subcommand)]
        target: QueryCmd,
    },

    /// Count evidence events by kind
    Count,
}

#[derive(Subcommand)]
enum QueryCmd {
    /// List flow ids that have been evaluated
    Flows,
    Flow {
        flow_id: String,
    },
    Discrepancy {
        discrepancy_id: String,
    },
    Event {
        event_id: String,
    },
}

fn main() -> Result<()> {
    // Load .env.local if present (dev convenience); silent when absent.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cli = Cli::parse();
    let paths = Paths::resolve(cli.log, cli.raw_dir, cli.rules);

    match cli.cmd {
        Commands::ConfigHash { paths: layers } => commands::inspect::config_hash(&layers),
        Commands::Ingest { file, no_derive } => commands::ingest::ingest(&paths, &file, !no_derive),
        Commands::Tick { at, reason } => commands::ingest::tick(&paths, at.as_deref(), &reason),
        Commands::Derive => commands::ingest::derive(&paths),
        Commands::Verify => commands::inspect::verify(&paths),
        Commands::Replay => commands::replay::replay(&paths),
        Commands::Query { target } => match target {
            QueryCmd::Flows => commands::inspect::flows(&paths),
            QueryCmd::Flow { flow_id } => commands::inspect::flow(&paths, &flow_id),
            QueryCmd::Discrepancy { discrepancy_id } => {
                commands::inspect::discrepancy(&paths, &discrepancy_id)
            }
            QueryCmd::Event { event_id } => commands::inspect::event(&paths, &event_id),
        },
        Commands::Count => commands::inspect::count(&paths),
    }
}

/// Logs go to stderr; stdout carries command output only.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("TENON_LOG")
        .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| "warn".into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
