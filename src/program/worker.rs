//! Worker mode: crawls either its own frontier or work leased from a host.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::ConfigContext;
use crate::crawl::{Completion, CrawlPool, CrawlSettings, PageProcessor, Uplink};
use crate::error::Result;
use crate::frontier::{Frontier, FrontierSettings, UrlSource};
use crate::models::PolicyConfig;
use crate::network::{
    ConnectionSupervisor, Connector, NetworkMessage, SupervisorEvent, SupervisorSettings,
    TlsHostConnector,
};
use crate::policy::{ContentPolicy, UrlPolicy};
use crate::program::{Program, StateUpdate, StatusSnapshot, apply_policy, ensure_local_source};
use crate::storage::{CacheStore, FileCacheStore, MemoryCacheStore};

/// Connection to the host, present only when host-sourced.
struct HostLink {
    supervisor: ConnectionSupervisor,
    uplink: Uplink,
    /// Taken by the relay task on first start
    events: Mutex<Option<mpsc::UnboundedReceiver<SupervisorEvent>>>,
}

pub struct WorkerProgram {
    config: ConfigContext,
    frontier: Arc<Frontier>,
    pool: Arc<CrawlPool>,
    host: Option<HostLink>,
}

impl WorkerProgram {
    /// Worker over the configured cache file, or over the configured host
    /// when `worker.host.use_host` is set.
    pub async fn new(config: ConfigContext, processor: Arc<dyn PageProcessor>) -> Result<Self> {
        let (use_host, cache_file, endpoint) = config.read(|c| {
            (
                c.worker.host.use_host,
                c.cache_file.clone(),
                c.worker.host.clone(),
            )
        });

        let store: Arc<dyn CacheStore> = if use_host {
            Arc::new(MemoryCacheStore::new())
        } else {
            Arc::new(FileCacheStore::new(cache_file))
        };
        let connector = Arc::new(TlsHostConnector::new(&endpoint));

        Self::build(config, store, processor, connector, SupervisorSettings::default()).await
    }

    /// Assemble from explicit parts. The store is only used when crawling
    /// locally.
    pub async fn build(
        config: ConfigContext,
        store: Arc<dyn CacheStore>,
        processor: Arc<dyn PageProcessor>,
        connector: Arc<dyn Connector>,
        supervisor_settings: SupervisorSettings,
    ) -> Result<Self> {
        let snapshot = config.snapshot();
        let use_host = snapshot.worker.host.use_host;

        let (source, policy, store) = if use_host {
            // Host applies the URL policy before delivering work
            let store: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new());
            (UrlSource::Host, UrlPolicy::allow_all(), store)
        } else {
            (UrlSource::Local, UrlPolicy::new(&snapshot.worker.policy)?, store)
        };

        let frontier = Arc::new(
            Frontier::open(
                store,
                policy,
                FrontierSettings {
                    source,
                    depth_search: snapshot.worker.depth_search,
                    ..FrontierSettings::default()
                },
            )
            .await?,
        );

        let host = use_host.then(|| {
            let (supervisor, events) = ConnectionSupervisor::new(
                &snapshot.worker.host,
                connector,
                supervisor_settings,
            );
            HostLink {
                supervisor,
                uplink: Uplink::new(),
                events: Mutex::new(Some(events)),
            }
        });

        let completion = match &host {
            Some(link) => Completion::Host(link.uplink.clone()),
            None => Completion::Local,
        };
        let settings = CrawlSettings {
            concurrency: snapshot.worker.max_concurrency,
            crawl_delay: Duration::from_secs_f64(snapshot.worker.crawl_delay_secs.max(0.0)),
        };
        let pool = Arc::new(CrawlPool::new(
            frontier.clone(),
            processor,
            ContentPolicy::new(&snapshot.worker.policy),
            completion,
            settings,
        ));

        Ok(Self {
            config,
            frontier,
            pool,
            host,
        })
    }

    pub fn frontier(&self) -> &Arc<Frontier> {
        &self.frontier
    }

    pub fn is_running(&self) -> bool {
        self.pool.is_running()
    }

    fn spawn_relay(&self, link: &HostLink) {
        let events = link.events.lock().ok().and_then(|mut e| e.take());
        let Some(events) = events else {
            return;
        };

        tokio::spawn(relay_events(
            events,
            self.config.clone(),
            self.frontier.clone(),
            self.pool.clone(),
            link.uplink.clone(),
        ));
    }
}

/// Apply supervisor events for as long as the supervisor exists.
async fn relay_events(
    mut events: mpsc::UnboundedReceiver<SupervisorEvent>,
    config: ConfigContext,
    frontier: Arc<Frontier>,
    pool: Arc<CrawlPool>,
    uplink: Uplink,
) {
    while let Some(event) = events.recv().await {
        match event {
            SupervisorEvent::Connected { client_id, sender } => {
                let changed = config.update(|c| {
                    let changed = c.worker.host.client_id.as_deref() != Some(client_id.as_str());
                    c.worker.host.client_id = Some(client_id.clone());
                    changed
                });
                if changed {
                    if let Err(e) = config.save() {
                        log::warn!("Failed to save client id: {}", e);
                    }
                }

                uplink.attach(sender.clone());
                let _ = sender.send(NetworkMessage::WorkRequest);
            }
            SupervisorEvent::Message { message, .. } => match message {
                NetworkMessage::ConfigUpdate(policy) => {
                    log::info!("Received configuration from host");
                    pool.set_content_policy(ContentPolicy::new(&policy));
                }
                NetworkMessage::WorkLimitUpdate(limit) => {
                    log::debug!("Host work limit set to {}", limit);
                }
                NetworkMessage::Work(items) => {
                    let added = frontier.accept_delivered(items);
                    log::debug!("Accepted {} item(s) from host", added);
                }
                NetworkMessage::StatusCheck
                | NetworkMessage::Disconnect
                | NetworkMessage::Hello { .. }
                | NetworkMessage::Welcome { .. }
                | NetworkMessage::Rejected { .. }
                | NetworkMessage::WorkRequest
                | NetworkMessage::WorkResult(_) => {}
            },
            SupervisorEvent::Disconnected { .. } => uplink.detach(),
        }
    }
}

#[async_trait]
impl Program for WorkerProgram {
    async fn start(&self) -> Result<()> {
        match &self.host {
            Some(link) => {
                self.spawn_relay(link);
                link.supervisor.start().await?;
            }
            None => {
                let seeds = self.config.read(|c| c.worker.policy.urls.clone());
                self.frontier.reload_url_source(&seeds)?;
            }
        }
        self.pool.start()
    }

    async fn stop(&self) {
        self.pool.stop().await;
        if let Some(link) = &self.host {
            link.supervisor.stop().await;
            link.uplink.detach();
        }
        self.frontier.flush().await;
    }

    async fn status(&self) -> StatusSnapshot {
        let mut snapshot = StatusSnapshot::base(
            &self.config,
            self.frontier.stats(),
            self.frontier.is_work_available(),
        );
        snapshot.is_active = self.pool.is_running();
        if let Some(link) = &self.host {
            snapshot.connected_to_host = link.supervisor.is_connected();
            snapshot.host_endpoint = link.supervisor.host_address();
        }
        snapshot
    }

    async fn handle_state_update(&self, update: StateUpdate) -> Result<()> {
        if !update.is_active {
            self.stop().await;
        } else if !self.pool.is_running() {
            self.start().await?;
        }

        if update.clear_cache {
            ensure_local_source(&self.config, "clear cache")?;

            if self.pool.is_running() {
                self.stop().await;
                self.frontier.clear_cache().await?;
                self.start().await?;
            } else {
                self.frontier.clear_cache().await?;
            }
        }
        Ok(())
    }

    async fn handle_config_update(&self, policy: PolicyConfig) -> Result<()> {
        let compiled = apply_policy(&self.config, policy.clone())?;
        self.frontier.set_policy(compiled);
        self.pool.set_content_policy(ContentPolicy::new(&policy));
        self.frontier.reload_url_source(&policy.urls)?;

        log::info!("Configuration updated");
        Ok(())
    }
}
