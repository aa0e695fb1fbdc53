use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tenon_schemas::{sha256_hex, IngestDeclaration, RawObservation};

const POINTER_PREFIX: &str = "raw:";

/// Receipt handed back once raw bytes are durable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReceipt {
    pub raw_payload_hash: String,
    pub raw_pointer: String,
}

/// Content-addressed raw payload store. The core reads from it only during replay.
pub trait RawStore: Send + Sync {
    /// Persist `payload_raw`. Storing the same bytes twice returns the same receipt.
    fn put(&self, payload_raw: &str) -> Result<RawReceipt>;

    fn get(&self, raw_pointer: &str) -> Result<Option<String>>;
}

/// Store the payload, then wrap the declaration with the receipt.
pub fn observe(store: &dyn RawStore, declaration: IngestDeclaration) -> Result<RawObservation> {
    let receipt = store.put(&declaration.payload_raw)?;
    Ok(RawObservation {
        declaration,
        raw_payload_hash: receipt.raw_payload_hash,
        raw_pointer: receipt.raw_pointer,
    })
}

fn receipt_for(payload_raw: &str) -> RawReceipt {
    let raw_payload_hash = sha256_hex(payload_raw.as_bytes());
    RawReceipt {
        raw_pointer: format!("{POINTER_PREFIX}{raw_payload_hash}"),
        raw_payload_hash,
    }
}

fn parse_pointer(raw_pointer: &str) -> Result<&str> {
    let Some(hash) = raw_pointer.strip_prefix(POINTER_PREFIX) else {
        bail!("RAW_POINTER_INVALID pointer={raw_pointer}");
    };
    if hash.len() != 64 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        bail!("RAW_POINTER_INVALID pointer={raw_pointer}");
    }
    Ok(hash)
}

#[derive(Debug, Default)]
pub struct MemoryRawStore {
    blobs: Mutex<BTreeMap<String, String>>,
}

impl MemoryRawStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RawStore for MemoryRawStore {
    fn put(&self, payload_raw: &str) -> Result<RawReceipt> {
        let receipt = receipt_for(payload_raw);
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| anyhow::anyhow!("raw store poisoned"))?;
        blobs
            .entry(receipt.raw_payload_hash.clone())
            .or_insert_with(|| payload_raw.to_string());
        Ok(receipt)
    }

    fn get(&self, raw_pointer: &str) -> Result<Option<String>> {
        let hash = parse_pointer(raw_pointer)?;
        let blobs = self
            .blobs
            .lock()
            .map_err(|_| anyhow::anyhow!("raw store poisoned"))?;
        Ok(blobs.get(hash).cloned())
    }
}

/// One file per payload under `<root>/<hash[..2]>/<hash>.raw`. Files are never rewritten.
#[derive(Debug, Clone)]
pub struct FsRawStore {
    root: PathBuf,
}

impl FsRawStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).with_context(|| format!("create raw store dir {:?}", root))?;
        Ok(Self { root })
    }

    fn path_for(&self, hash: &str) -> PathBuf {
        self.root.join(&hash[..2]).join(format!("{hash}.raw"))
    }
}

impl RawStore for FsRawStore {
    fn put(&self, payload_raw: &str) -> Result<RawReceipt> {
        let receipt = receipt_for(payload_raw);
        let path = self.path_for(&receipt.raw_payload_hash);
        if path.exists() {
            return Ok(receipt);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create_dir_all {:?}", parent))?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, payload_raw.as_bytes())
            .with_context(|| format!("write raw payload {:?}", tmp))?;
        fs::rename(&tmp, &path).with_context(|| format!("rename raw payload to {:?}", path))?;
        Ok(receipt)
    }

    fn get(&self, raw_pointer: &str) -> Result<Option<String>> {
        let hash = parse_pointer(raw_pointer)?;
        let path = self.path_for(hash);
        if !path.exists() {
            return Ok(None);
        }
        let content =
            fs::read_to_string(&path).with_context(|| format!("read raw payload {:?}", path))?;
        if sha256_hex(content.as_bytes()) != hash {
            bail!("RAW_PAYLOAD_CORRUPT pointer={raw_pointer}");
        }
        Ok(Some(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_is_content_addressed() {
        let store = MemoryRawStore::new();
        let a = store.put(r#"{"a":1}"#).unwrap();
        let b = store.put(r#"{"a":1}"#).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&a.raw_pointer).unwrap().as_deref(), Some(r#"{"a":1}"#));
    }

    #[test]
    fn fs_store_round_trips_and_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRawStore::open(dir.path()).unwrap();
        let r = store.put("hello raw").unwrap();
        assert_eq!(store.get(&r.raw_pointer).unwrap().as_deref(), Some("hello raw"));

        let missing = format!("raw:{}", "0".repeat(64));
        assert_eq!(store.get(&missing).unwrap(), None);

        fs::write(store.path_for(&r.raw_payload_hash), "tampered").unwrap();
        let err = store.get(&r.raw_pointer).unwrap_err().to_string();
        assert!(err.contains("RAW_PAYLOAD_CORRUPT"), "{err}");
    }

    #[test]
    fn pointers_must_be_content_addresses() {
        let store = MemoryRawStore::new();
        assert!(store.get("s3://bucket/key").is_err());
        assert!(store.get("raw:abc").is_err());
    }
}
