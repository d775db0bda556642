// src/frontier/mod.rs

//! Work frontier: the single source of truth for "seen" and "pending".
//!
//! All admission, dequeue and completion decisions happen under one lock
//! over the whole frontier, which is what makes `try_enqueue` at-most-once
//! under concurrent callers. Durable I/O happens outside that lock in the
//! [`writer`] task; records are handed over while the lock is held so the
//! log order always matches the order of in-memory transitions.
//!
//! On the host, items handed to a worker move from the queue into a
//! [`LeaseTable`] until the worker reports a result, disconnects or lets the
//! lease expire.

mod lease;
mod writer;

pub use lease::LeaseTable;
pub use writer::CacheWriter;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Notify;

use crate::error::{AppError, Result};
use crate::models::{CacheRecord, EntryState, WorkItem, WorkSource};
use crate::policy::UrlPolicy;
use crate::storage::CacheStore;
use crate::utils::url::normalize;

/// Where crawlable URLs come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlSource {
    /// Seeds and discovered links, deduplicated against the cache
    Local,
    /// Items delivered by a remote host, which owns deduplication
    Host,
}

/// Frontier tunables.
#[derive(Debug, Clone)]
pub struct FrontierSettings {
    pub source: UrlSource,
    /// Newest first instead of breadth-first
    pub depth_search: bool,
    pub lease_timeout: Duration,
}

impl Default for FrontierSettings {
    fn default() -> Self {
        Self {
            source: UrlSource::Local,
            depth_search: false,
            lease_timeout: Duration::from_secs(300),
        }
    }
}

/// Counters for the status view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrontierStats {
    /// Items waiting in the queue
    pub work_count: usize,
    /// Every URL the frontier knows about
    pub cached_count: usize,
    pub crawled_count: usize,
    /// Items currently held by workers
    pub leased_count: usize,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    state: EntryState,
    depth: u32,
}

#[derive(Default)]
struct FrontierState {
    entries: HashMap<String, Entry>,
    queue: VecDeque<WorkItem>,
    leases: LeaseTable,
    crawled: usize,
}

impl FrontierState {
    /// Queue slots go stale when their entry is crawled, cleared or leased
    /// while they wait; those are skipped rather than removed.
    fn is_pending(&self, item: &WorkItem) -> bool {
        let queued = self
            .entries
            .get(&item.url)
            .is_some_and(|e| e.state == EntryState::Queued);
        queued && !self.leases.contains(&item.url)
    }

    fn pending_count(&self) -> usize {
        self.queue.iter().filter(|item| self.is_pending(item)).count()
    }
}

pub struct Frontier {
    state: Mutex<FrontierState>,
    policy: RwLock<Arc<UrlPolicy>>,
    settings: FrontierSettings,
    writer: CacheWriter,
    notify: Notify,
    closed: AtomicBool,
}

impl Frontier {
    /// Open the frontier over `store`, re-offering every entry that was
    /// queued but never crawled.
    pub async fn open(
        store: Arc<dyn CacheStore>,
        policy: UrlPolicy,
        settings: FrontierSettings,
    ) -> Result<Self> {
        let records = store.load().await?;

        let mut state = FrontierState::default();
        for record in records {
            match record.state {
                EntryState::Crawled => state.crawled += 1,
                EntryState::Queued => state
                    .queue
                    .push_back(WorkItem::new(record.url.clone(), record.depth, WorkSource::Seed)),
            }
            state.entries.insert(
                record.url,
                Entry {
                    state: record.state,
                    depth: record.depth,
                },
            );
        }

        if !state.entries.is_empty() {
            log::info!(
                "Restored {} cached entries ({} pending, {} crawled)",
                state.entries.len(),
                state.queue.len(),
                state.crawled
            );
        }

        let (writer, _task) = CacheWriter::spawn(store);

        Ok(Self {
            state: Mutex::new(state),
            policy: RwLock::new(Arc::new(policy)),
            settings,
            writer,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn source(&self) -> UrlSource {
        self.settings.source
    }

    /// Swap the admission rules; entries already admitted stay.
    pub fn set_policy(&self, policy: UrlPolicy) {
        match self.policy.write() {
            Ok(mut current) => *current = Arc::new(policy),
            Err(poisoned) => *poisoned.into_inner() = Arc::new(policy),
        }
    }

    fn policy(&self) -> Arc<UrlPolicy> {
        match self.policy.read() {
            Ok(current) => current.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FrontierState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Offer a seed URL. See [`Frontier::try_enqueue_with`].
    pub fn try_enqueue(&self, url: &str) -> bool {
        self.try_enqueue_with(url, 0, WorkSource::Seed)
    }

    /// Admit a URL exactly once.
    ///
    /// Returns false without touching any state when the URL does not
    /// normalize, the policy rejects it, or it was seen before.
    pub fn try_enqueue_with(&self, url: &str, depth: u32, source: WorkSource) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }

        let key = match normalize(url) {
            Ok(key) => key,
            Err(e) => {
                log::debug!("Ignoring unparsable URL '{}': {}", url, e);
                return false;
            }
        };

        if !self.policy().admit(&key) {
            return false;
        }

        let item = WorkItem::new(key, depth, source);
        {
            let mut state = self.lock();
            if state.entries.contains_key(&item.url) {
                return false;
            }
            state.entries.insert(
                item.url.clone(),
                Entry {
                    state: EntryState::Queued,
                    depth,
                },
            );
            self.writer.append(CacheRecord::queued(&item));
            state.queue.push_back(item);
        }

        self.notify.notify_one();
        true
    }

    /// Buffer items delivered by the host.
    ///
    /// The host already applied the policy and owns deduplication, so only
    /// items currently pending here are skipped. Returns how many were added.
    pub fn accept_delivered(&self, items: Vec<WorkItem>) -> usize {
        let mut added = 0;
        {
            let mut state = self.lock();
            for item in items {
                let item = item.delivered();
                let pending = state
                    .entries
                    .get(&item.url)
                    .is_some_and(|e| e.state == EntryState::Queued);
                if pending {
                    continue;
                }
                state.entries.insert(
                    item.url.clone(),
                    Entry {
                        state: EntryState::Queued,
                        depth: item.depth,
                    },
                );
                state.queue.push_back(item);
                added += 1;
            }
        }

        if added > 0 {
            self.notify.notify_waiters();
        }
        added
    }

    /// Remove the next pending item.
    pub fn dequeue(&self) -> Option<WorkItem> {
        let mut state = self.lock();
        self.pop_pending(&mut state)
    }

    fn pop_pending(&self, state: &mut FrontierState) -> Option<WorkItem> {
        loop {
            let item = if self.settings.depth_search {
                state.queue.pop_back()
            } else {
                state.queue.pop_front()
            }?;

            if state.is_pending(&item) {
                return Some(item);
            }
        }
    }

    /// Wait for the next pending item; `None` once the frontier is closed.
    pub async fn next(&self) -> Option<WorkItem> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.dequeue() {
                return Some(item);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Transition to `Crawled`. Idempotent; also drops any lease on the URL.
    pub fn mark_crawled(&self, url: &str) {
        let key = match normalize(url) {
            Ok(key) => key,
            Err(e) => {
                log::debug!("Ignoring completion for unparsable URL '{}': {}", url, e);
                return;
            }
        };

        let mut state = self.lock();
        state.leases.remove(&key);

        if self.settings.source == UrlSource::Host {
            // Host keeps the permanent record
            state.entries.remove(&key);
            return;
        }

        let depth = match state.entries.get(&key) {
            Some(entry) if entry.state == EntryState::Crawled => return,
            Some(entry) => entry.depth,
            None => 0,
        };
        state.entries.insert(
            key.clone(),
            Entry {
                state: EntryState::Crawled,
                depth,
            },
        );
        state.crawled += 1;
        self.writer.append(CacheRecord::crawled(key, depth));
    }

    /// State of a URL, `None` if never seen.
    pub fn state_of(&self, url: &str) -> Option<EntryState> {
        let key = normalize(url).ok()?;
        self.lock().entries.get(&key).map(|e| e.state)
    }

    /// Wipe all frontier and cache state to start a fresh session.
    ///
    /// Only valid while crawling is stopped. Fails without touching anything
    /// when URLs come from a host.
    pub async fn clear_cache(&self) -> Result<()> {
        if self.settings.source == UrlSource::Host {
            return Err(AppError::policy(
                "Can not clear cache when using Host as Url source!",
            ));
        }

        let cleared = {
            let mut state = self.lock();
            let count = state.entries.len();
            *state = FrontierState::default();
            count
        };
        // Ordered after every append issued under the lock above
        self.writer.clear().await?;

        log::info!("Cleared {} cached entries", cleared);
        Ok(())
    }

    /// Offer the seed list again; returns how many were newly admitted.
    pub fn reload_url_source(&self, seeds: &[String]) -> Result<usize> {
        if self.settings.source == UrlSource::Host {
            return Err(AppError::policy(
                "Can not reload URLs when using Host as Url source!",
            ));
        }

        let added = seeds.iter().filter(|url| self.try_enqueue(url)).count();
        log::info!("Loaded {} of {} seed URL(s)", added, seeds.len());
        Ok(added)
    }

    pub fn is_work_available(&self) -> bool {
        let state = self.lock();
        state.queue.iter().any(|item| state.is_pending(item))
    }

    pub fn stats(&self) -> FrontierStats {
        let state = self.lock();
        FrontierStats {
            work_count: state.pending_count(),
            cached_count: state.entries.len(),
            crawled_count: state.crawled,
            leased_count: state.leases.len(),
        }
    }

    /// Hand up to `max` pending items to `client_id`.
    pub fn lease(&self, client_id: &str, max: usize) -> Vec<WorkItem> {
        let deadline = Instant::now() + self.settings.lease_timeout;
        let mut state = self.lock();

        let mut items = Vec::new();
        while items.len() < max {
            let Some(item) = self.pop_pending(&mut state) else {
                break;
            };
            state.leases.insert(client_id, item.clone(), deadline);
            items.push(item);
        }
        items
    }

    /// Number of items `client_id` currently holds.
    pub fn leased_to(&self, client_id: &str) -> usize {
        self.lock().leases.held_by(client_id)
    }

    /// Return every item held by `client_id` to the front of the queue.
    pub fn release_client(&self, client_id: &str) -> usize {
        let items = self.lock().leases.release_client(client_id);
        self.requeue(items)
    }

    /// Return specific items, if still leased, to the front of the queue.
    pub fn release_items(&self, items: Vec<WorkItem>) -> usize {
        let held: Vec<WorkItem> = {
            let mut state = self.lock();
            items
                .into_iter()
                .filter(|item| state.leases.remove(&item.url).is_some())
                .collect()
        };
        self.requeue(held)
    }

    /// Return every lease that expired by `now`.
    pub fn reclaim_expired(&self, now: Instant) -> usize {
        let items = self.lock().leases.take_expired(now);
        self.requeue(items)
    }

    fn requeue(&self, items: Vec<WorkItem>) -> usize {
        if items.is_empty() {
            return 0;
        }

        let count = items.len();
        {
            let mut state = self.lock();
            // Served next in either queue order
            for item in items.into_iter().rev() {
                if self.settings.depth_search {
                    state.queue.push_back(item);
                } else {
                    state.queue.push_front(item);
                }
            }
        }
        self.notify.notify_waiters();
        count
    }

    /// Wait until every transition issued so far has reached the store.
    pub async fn flush(&self) {
        self.writer.flush().await;
    }

    /// Stop admitting work, wake every waiter and flush.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.flush().await;
    }
}
