use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::rulebook::LoadedRuleBook;

/// Immutable rule books held side by side, selected by version or by effective time.
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    by_version: BTreeMap<String, Arc<LoadedRuleBook>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a book. Re-registering identical content is a no-op; a different book
    /// under an existing version is refused (published versions never change).
    pub fn register(&mut self, book: LoadedRuleBook) -> Result<Arc<LoadedRuleBook>> {
        let version = book.version().to_string();
        if let Some(existing) = self.by_version.get(&version) {
            if existing.config_hash != book.config_hash {
                bail!(
                    "RULEBOOK_VERSION_CONFLICT version={} registered_hash={} new_hash={}",
                    version,
                    existing.config_hash,
                    book.config_hash
                );
            }
            return Ok(existing.clone());
        }
        let book = Arc::new(book);
        self.by_version.insert(version, book.clone());
        Ok(book)
    }

    pub fn get(&self, version: &str) -> Option<Arc<LoadedRuleBook>> {
        self.by_version.get(version).cloned()
    }

    /// Book in force at `at`: the latest `effective_from` not after `at`.
    /// Ties on `effective_from` resolve to the greatest version string.
    pub fn resolve_at(&self, at: DateTime<Utc>) -> Option<Arc<LoadedRuleBook>> {
        self.by_version
            .values()
            .filter(|b| b.book.effective_from <= at)
            .max_by(|a, b| {
                a.book
                    .effective_from
                    .cmp(&b.book.effective_from)
                    .then_with(|| a.book.rulebook_version.cmp(&b.book.rulebook_version))
            })
            .cloned()
    }

    pub fn versions(&self) -> Vec<&str> {
        self.by_version.keys().map(String::as_str).collect()
    }
}
