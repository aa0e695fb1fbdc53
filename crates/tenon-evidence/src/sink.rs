use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

use tenon_schemas::canonical_json;

use crate::log::{EvidenceEvent, OpenError};

/// Append-only JSON Lines file. One event == one canonical JSON line.
///
/// The file is held under an exclusive advisory lock for the sink's lifetime,
/// so at most one writer (in any process) can extend the chain.
pub(crate) struct JsonlSink {
    path: PathBuf,
    file: File,
    /// Byte length of the durable prefix. A failed write is cut back to this.
    len: u64,
}

/// Parsed content of a log file.
pub(crate) struct ParsedLog {
    pub(crate) events: Vec<EvidenceEvent>,
    /// Byte offset just past the last complete, parseable line.
    pub(crate) good_len: usize,
    /// Why the tail past `good_len` was discarded, when it was.
    pub(crate) torn: Option<String>,
}

impl JsonlSink {
    /// Opens for append, ensures parent dirs exist and takes the writer lock.
    ///
    /// A torn final line (crash mid-write) is truncated away with a warning.
    /// Any other unparseable line is corruption and refuses to open.
    pub(crate) fn open(path: &Path) -> Result<(Self, Vec<EvidenceEvent>), OpenError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create_dir_all {:?}", parent))
                    .map_err(io_err)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open evidence log {:?}", path))
            .map_err(io_err)?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                return Err(OpenError::Locked {
                    path: path.to_path_buf(),
                });
            }
            return Err(OpenError::Io(format!("lock evidence log {path:?}: {e}")));
        }

        let mut content = String::new();
        file.read_to_string(&mut content)
            .with_context(|| format!("read evidence log {:?}", path))
            .map_err(io_err)?;

        let parsed = parse_lines(&content).map_err(|(line, reason)| OpenError::Corrupt {
            path: path.to_path_buf(),
            line,
            reason,
        })?;

        if let Some(reason) = &parsed.torn {
            warn!(
                path = ?path,
                kept_bytes = parsed.good_len,
                dropped_bytes = content.len() - parsed.good_len,
                %reason,
                "truncating torn evidence log tail"
            );
            file.set_len(parsed.good_len as u64)
                .and_then(|_| file.sync_data())
                .with_context(|| format!("truncate torn tail of {:?}", path))
                .map_err(io_err)?;
        }

        let sink = Self {
            path: path.to_path_buf(),
            file,
            len: parsed.good_len as u64,
        };
        Ok((sink, parsed.events))
    }

    /// Writes one line and syncs it. On any failure the file is cut back to the
    /// previous durable length so memory and disk never disagree.
    pub(crate) fn write(&mut self, ev: &EvidenceEvent) -> Result<()> {
        let mut line = canonical_json(ev).context("serialize evidence event failed")?;
        line.push('\n');
        let written = self
            .file
            .write_all(line.as_bytes())
            .and_then(|_| self.file.sync_data());
        if let Err(e) = written {
            if let Err(cut) = self.file.set_len(self.len) {
                warn!(path = ?self.path, error = %cut, "could not roll back partial evidence write");
            }
            return Err(e).with_context(|| format!("write evidence line to {:?}", self.path));
        }
        self.len += line.len() as u64;
        Ok(())
    }

    /// Complete lines present at `path`, without taking the writer lock.
    /// A partial tail (a writer mid-append) is ignored, not repaired.
    pub(crate) fn read_snapshot(path: &Path) -> Result<Vec<EvidenceEvent>, OpenError> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("read evidence log {:?}", path))
            .map_err(io_err)?;
        let parsed = parse_lines(&content).map_err(|(line, reason)| OpenError::Corrupt {
            path: path.to_path_buf(),
            line,
            reason,
        })?;
        Ok(parsed.events)
    }
}

fn io_err(e: anyhow::Error) -> OpenError {
    OpenError::Io(format!("{e:#}"))
}

/// Splits JSONL content into events. Only the last line may be incomplete:
/// a chunk without a trailing newline, or a final line that does not parse,
/// is reported as torn. An unparseable line earlier in the file is an error.
pub(crate) fn parse_lines(content: &str) -> std::result::Result<ParsedLog, (usize, String)> {
    let chunks: Vec<&str> = content.split_inclusive('\n').collect();
    let mut events = Vec::new();
    let mut good_len = 0usize;
    let mut torn = None;

    for (i, chunk) in chunks.iter().enumerate() {
        let line_no = i + 1;
        let last = line_no == chunks.len();
        if !chunk.ends_with('\n') {
            torn = Some(format!("line {line_no} has no trailing newline"));
            break;
        }
        let trimmed = chunk.trim();
        if !trimmed.is_empty() {
            match serde_json::from_str::<EvidenceEvent>(trimmed) {
                Ok(ev) => events.push(ev),
                Err(e) if last => {
                    torn = Some(format!("line {line_no} does not parse: {e}"));
                    break;
                }
                Err(e) => return Err((line_no, format!("parse evidence event: {e}"))),
            }
        }
        good_len += chunk.len();
    }

    Ok(ParsedLog {
        events,
        good_len,
        torn,
    })
}
