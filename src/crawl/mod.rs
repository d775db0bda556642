//! Crawl pool.
//!
//! A fixed number of tasks pull items from the [`Frontier`], hand them to a
//! [`PageProcessor`] and complete them. Links found on pages the content
//! policy marks for scanning go back into the local frontier, or to the host
//! inside a `WorkResult` when the worker is host-sourced.
//!
//! Every item taken from the frontier is marked crawled exactly once, even
//! when processing fails.

#[cfg(feature = "http")]
pub mod http;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::frontier::Frontier;
use crate::models::{WorkItem, WorkResult, WorkSource};
use crate::network::{ChannelSender, NetworkMessage};
use crate::policy::ContentPolicy;

/// What a processor learned about one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageOutcome {
    /// `Content-Type` as reported by the server
    pub media_type: Option<String>,
    pub size_bytes: Option<u64>,
    /// Absolute URLs found on the page
    pub links: Vec<String>,
}

/// Fetches and inspects one work item.
#[async_trait]
pub trait PageProcessor: Send + Sync {
    async fn process(&self, item: &WorkItem) -> Result<PageOutcome>;

    /// Called for resources the content policy decides to keep.
    async fn store(&self, _item: &WorkItem, _outcome: &PageOutcome) -> Result<()> {
        Ok(())
    }
}

/// Current connection to the host, swapped by the worker on reconnect.
#[derive(Clone, Default)]
pub struct Uplink {
    sender: Arc<Mutex<Option<ChannelSender>>>,
}

impl Uplink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, sender: ChannelSender) {
        if let Ok(mut current) = self.sender.lock() {
            *current = Some(sender);
        }
    }

    pub fn detach(&self) {
        if let Ok(mut current) = self.sender.lock() {
            *current = None;
        }
    }

    pub fn is_attached(&self) -> bool {
        self.sender
            .lock()
            .is_ok_and(|s| s.as_ref().is_some_and(|s| !s.is_closed()))
    }

    /// Returns false when there is no live connection.
    pub fn send(&self, message: NetworkMessage) -> bool {
        let sender = self.sender.lock().ok().and_then(|s| s.clone());
        sender.is_some_and(|s| s.send(message).is_ok())
    }
}

/// Where discovered links go once an item is done.
#[derive(Clone)]
pub enum Completion {
    /// Offer them to the local frontier
    Local,
    /// Report them to the host
    Host(Uplink),
}

#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub concurrency: usize,
    /// Pause after each item, per task
    pub crawl_delay: Duration,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            concurrency: 3,
            crawl_delay: Duration::ZERO,
        }
    }
}

struct CrawlContext {
    frontier: Arc<Frontier>,
    processor: Arc<dyn PageProcessor>,
    content: RwLock<ContentPolicy>,
    completion: Completion,
    settings: CrawlSettings,
    processed: AtomicUsize,
}

impl CrawlContext {
    async fn crawl(&self, item: WorkItem) {
        let links = match self.processor.process(&item).await {
            Ok(outcome) => {
                let decision = match self.content.read() {
                    Ok(policy) => policy.decide(
                        &item.url,
                        outcome.media_type.as_deref(),
                        outcome.size_bytes,
                    ),
                    Err(poisoned) => poisoned.into_inner().decide(
                        &item.url,
                        outcome.media_type.as_deref(),
                        outcome.size_bytes,
                    ),
                };

                if decision.save {
                    if let Err(e) = self.processor.store(&item, &outcome).await {
                        log::warn!("Failed to store {}: {}", item.url, e);
                    }
                }
                if decision.scan { outcome.links } else { Vec::new() }
            }
            Err(e) => {
                log::debug!("Failed to crawl {}: {}", item.url, e);
                Vec::new()
            }
        };

        match &self.completion {
            Completion::Local => {
                let depth = item.depth.saturating_add(1);
                for link in &links {
                    self.frontier.try_enqueue_with(link, depth, WorkSource::Discovered);
                }
            }
            Completion::Host(uplink) => {
                let result = WorkResult {
                    url: item.url.clone(),
                    depth: item.depth,
                    discovered: links,
                };
                if !uplink.send(NetworkMessage::WorkResult(result)) {
                    log::debug!("No connection to host, result for {} dropped", item.url);
                }
            }
        }

        self.frontier.mark_crawled(&item.url);
        self.processed.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct CrawlPool {
    context: Arc<CrawlContext>,
    running: Mutex<Option<(CancellationToken, Vec<JoinHandle<()>>)>>,
}

impl CrawlPool {
    pub fn new(
        frontier: Arc<Frontier>,
        processor: Arc<dyn PageProcessor>,
        content: ContentPolicy,
        completion: Completion,
        settings: CrawlSettings,
    ) -> Self {
        Self {
            context: Arc::new(CrawlContext {
                frontier,
                processor,
                content: RwLock::new(content),
                completion,
                settings,
                processed: AtomicUsize::new(0),
            }),
            running: Mutex::new(None),
        }
    }

    pub fn set_content_policy(&self, content: ContentPolicy) {
        if let Ok(mut current) = self.context.content.write() {
            *current = content;
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_ok_and(|r| r.is_some())
    }

    /// Items completed since the pool was created.
    pub fn processed(&self) -> usize {
        self.context.processed.load(Ordering::Relaxed)
    }

    pub fn start(&self) -> Result<()> {
        let mut running = self
            .running
            .lock()
            .map_err(|_| AppError::state("crawl pool lock poisoned"))?;
        if running.is_some() {
            return Err(AppError::state("Crawl pool already running!"));
        }

        let token = CancellationToken::new();
        let tasks = (0..self.context.settings.concurrency.max(1))
            .map(|_| tokio::spawn(crawl_loop(self.context.clone(), token.clone())))
            .collect();
        *running = Some((token, tasks));

        log::info!(
            "Started {} crawl task(s)",
            self.context.settings.concurrency.max(1)
        );
        Ok(())
    }

    /// Stop taking new items and wait for the ones in flight.
    pub async fn stop(&self) {
        let running = self.running.lock().ok().and_then(|mut r| r.take());
        if let Some((token, tasks)) = running {
            token.cancel();
            futures::future::join_all(tasks).await;
            log::info!("Crawl tasks stopped");
        }
    }
}

async fn crawl_loop(context: Arc<CrawlContext>, token: CancellationToken) {
    let delay = context.settings.crawl_delay;

    loop {
        let item = tokio::select! {
            _ = token.cancelled() => break,
            item = context.frontier.next() => match item {
                Some(item) => item,
                None => break,
            },
        };

        context.crawl(item).await;

        if !delay.is_zero() {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
