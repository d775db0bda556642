//! Work item and frontier entry types.

use serde::{Deserialize, Serialize};

/// Where a work item came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkSource {
    /// Configured seed URL
    #[default]
    Seed,
    /// Link extracted from a crawled page
    Discovered,
    /// Delivered by the host
    Host,
}

/// A URL scheduled for crawling.
///
/// Identity is the normalized URL; two items with the same `url` are the
/// same piece of work regardless of depth or source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkItem {
    /// Normalized URL (the dedup key)
    pub url: String,

    /// Number of hops from a seed
    #[serde(default)]
    pub depth: u32,

    #[serde(default)]
    pub source: WorkSource,
}

impl WorkItem {
    pub fn new(url: impl Into<String>, depth: u32, source: WorkSource) -> Self {
        Self {
            url: url.into(),
            depth,
            source,
        }
    }

    /// Same URL, relabelled as host-delivered.
    pub fn delivered(mut self) -> Self {
        self.source = WorkSource::Host;
        self
    }
}

/// Processing state of a frontier entry.
///
/// Transitions are monotonic: `Queued` may become `Crawled`, never the reverse.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Queued,
    Crawled,
}

impl EntryState {
    /// Combine two observations of the same key; `Crawled` absorbs.
    pub fn merge(self, other: EntryState) -> EntryState {
        self.max(other)
    }
}

/// One line of the persisted cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheRecord {
    pub url: String,
    pub state: EntryState,
    #[serde(default)]
    pub depth: u32,
}

impl CacheRecord {
    pub fn queued(item: &WorkItem) -> Self {
        Self {
            url: item.url.clone(),
            state: EntryState::Queued,
            depth: item.depth,
        }
    }

    pub fn crawled(url: impl Into<String>, depth: u32) -> Self {
        Self {
            url: url.into(),
            state: EntryState::Crawled,
            depth,
        }
    }
}

/// Outcome a worker reports back to the host for one item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkResult {
    /// The crawled URL, as delivered
    pub url: String,

    /// Depth of the crawled item
    #[serde(default)]
    pub depth: u32,

    /// Links found on the page, unfiltered
    #[serde(default)]
    pub discovered: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crawled_absorbs_queued() {
        assert_eq!(EntryState::Queued.merge(EntryState::Crawled), EntryState::Crawled);
        assert_eq!(EntryState::Crawled.merge(EntryState::Queued), EntryState::Crawled);
        assert_eq!(EntryState::Queued.merge(EntryState::Queued), EntryState::Queued);
    }

    #[test]
    fn test_cache_record_json_shape() {
        let record = CacheRecord::crawled("http://example.com/", 2);
        let line = serde_json::to_string(&record).unwrap();
        assert_eq!(line, r#"{"url":"http://example.com/","state":"crawled","depth":2}"#);
    }

    #[test]
    fn test_delivered_keeps_identity() {
        let item = WorkItem::new("http://example.com/a", 3, WorkSource::Discovered).delivered();
        assert_eq!(item.url, "http://example.com/a");
        assert_eq!(item.depth, 3);
        assert_eq!(item.source, WorkSource::Host);
    }
}
