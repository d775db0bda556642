//! Durable record of every URL the frontier has seen.
//!
//! The store is an append-only log of [`CacheRecord`]s. Replaying it yields
//! one record per URL; the most advanced state wins, so a `Crawled` line can
//! never be undone by a later `Queued` one.
//!
//! ## File Layout
//!
//! ```text
//! crycrawler.cache       # JSON lines, one CacheRecord per line
//! crycrawler.cache.tmp   # Compaction output, renamed over the log
//! ```

pub mod local;
pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::CacheRecord;

pub use local::FileCacheStore;
pub use memory::MemoryCacheStore;

/// Trait for frontier cache backends.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Replay the log into one record per URL, in first-seen order.
    async fn load(&self) -> Result<Vec<CacheRecord>>;

    /// Durably append state transitions.
    async fn append(&self, records: &[CacheRecord]) -> Result<()>;

    /// Delete every record.
    async fn clear(&self) -> Result<()>;
}

/// Fold a record stream into one record per URL.
pub fn replay(records: impl IntoIterator<Item = CacheRecord>) -> Vec<CacheRecord> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<CacheRecord> = Vec::new();

    for record in records {
        match index.get(&record.url) {
            Some(&i) => {
                let existing = &mut merged[i];
                if record.state > existing.state {
                    existing.depth = record.depth;
                }
                existing.state = existing.state.merge(record.state);
            }
            None => {
                index.insert(record.url.clone(), merged.len());
                merged.push(record);
            }
        }
    }

    merged
}
