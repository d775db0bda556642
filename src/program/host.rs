//! Host mode: owns the frontier and distributes it to workers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ConfigContext;
use crate::error::Result;
use crate::frontier::{Frontier, FrontierSettings, UrlSource};
use crate::models::PolicyConfig;
use crate::network::{ClientRegistry, NetworkMessage, WorkerListener};
use crate::policy::UrlPolicy;
use crate::program::{Program, StateUpdate, StatusSnapshot, apply_policy, ensure_local_source};
use crate::storage::{CacheStore, FileCacheStore};

pub struct HostProgram {
    config: ConfigContext,
    frontier: Arc<Frontier>,
    registry: Arc<ClientRegistry>,
    listener: WorkerListener,
}

impl HostProgram {
    /// Open the cache file named in the configuration.
    pub async fn new(config: ConfigContext) -> Result<Self> {
        let store = Arc::new(FileCacheStore::new(config.read(|c| c.cache_file.clone())));
        Self::with_store(config, store).await
    }

    pub async fn with_store(config: ConfigContext, store: Arc<dyn CacheStore>) -> Result<Self> {
        let snapshot = config.snapshot();

        let settings = FrontierSettings {
            source: UrlSource::Local,
            depth_search: snapshot.worker.depth_search,
            lease_timeout: Duration::from_secs(snapshot.host.lease_timeout_secs),
        };
        let policy = UrlPolicy::new(&snapshot.worker.policy)?;
        let frontier = Arc::new(Frontier::open(store, policy, settings).await?);
        let registry = Arc::new(ClientRegistry::new());
        let listener = WorkerListener::new(config.clone(), frontier.clone(), registry.clone())?;

        Ok(Self {
            config,
            frontier,
            registry,
            listener,
        })
    }

    pub fn frontier(&self) -> &Arc<Frontier> {
        &self.frontier
    }

    pub fn listener(&self) -> &WorkerListener {
        &self.listener
    }
}

#[async_trait]
impl Program for HostProgram {
    async fn start(&self) -> Result<()> {
        let seeds = self.config.read(|c| c.worker.policy.urls.clone());
        self.frontier.reload_url_source(&seeds)?;
        self.listener.start().await?;
        Ok(())
    }

    async fn stop(&self) {
        self.listener.stop().await;
        self.frontier.flush().await;
    }

    async fn status(&self) -> StatusSnapshot {
        let mut snapshot = StatusSnapshot::base(
            &self.config,
            self.frontier.stats(),
            self.frontier.is_work_available(),
        );
        snapshot.is_listening = self.listener.is_listening();
        snapshot.is_active = snapshot.is_listening;
        snapshot.clients = self.registry.sessions().await;
        snapshot
    }

    async fn handle_state_update(&self, update: StateUpdate) -> Result<()> {
        if !update.is_active {
            self.stop().await;
        } else if !self.listener.is_listening() {
            self.start().await?;
        }

        if update.clear_cache {
            ensure_local_source(&self.config, "clear cache")?;

            if self.listener.is_listening() {
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
        self.frontier.reload_url_source(&policy.urls)?;

        let reached = self
            .registry
            .broadcast(&NetworkMessage::ConfigUpdate(policy))
            .await;
        log::info!("Configuration updated, pushed to {} worker(s)", reached);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::{Config, EntryState};
    use crate::storage::MemoryCacheStore;

    fn config() -> Config {
        let mut config = Config::default();
        config.host.listener.ip = "127.0.0.1".to_string();
        config.host.listener.port = 0;
        config.worker.policy.urls = vec!["http://example.com/".to_string()];
        config
    }

    async fn program(config: Config) -> HostProgram {
        HostProgram::with_store(
            ConfigContext::in_memory(config),
            Arc::new(MemoryCacheStore::new()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_state_update_starts_and_stops_listener() {
        let host = program(config()).await;

        host.handle_state_update(StateUpdate {
            is_active: true,
            clear_cache: false,
        })
        .await
        .unwrap();
        let status = host.status().await;
        assert!(status.is_listening);
        assert_eq!(status.stats.work_count, 1);

        host.handle_state_update(StateUpdate::default()).await.unwrap();
        assert!(!host.status().await.is_listening);
    }

    #[tokio::test]
    async fn test_clear_cache_while_listening_restarts() {
        let host = program(config()).await;
        host.start().await.unwrap();
        host.frontier().mark_crawled("http://example.com/");
        assert_eq!(host.frontier().stats().crawled_count, 1);

        host.handle_state_update(StateUpdate {
            is_active: true,
            clear_cache: true,
        })
        .await
        .unwrap();

        assert!(host.listener().is_listening());
        // Seeds are offered again after the wipe
        assert_eq!(
            host.frontier().state_of("http://example.com/"),
            Some(EntryState::Queued)
        );
        host.stop().await;
    }

    #[tokio::test]
    async fn test_clear_cache_refused_when_host_sourced() {
        let mut config = config();
        config.worker.host.use_host = true;
        let host = program(config).await;
        host.frontier().try_enqueue("http://example.com/a");

        let result = host
            .handle_state_update(StateUpdate {
                is_active: false,
                clear_cache: true,
            })
            .await;

        assert!(matches!(result, Err(AppError::Policy(_))));
        assert_eq!(host.frontier().stats().cached_count, 1);
    }

    #[tokio::test]
    async fn test_config_update_reloads_seeds_under_new_policy() {
        let host = program(config()).await;

        let policy = PolicyConfig {
            urls: vec![
                "http://allowed.org/".to_string(),
                "http://blocked.org/".to_string(),
            ],
            domain_blacklist: vec!["blocked.org".to_string()],
            ..PolicyConfig::default()
        };
        host.handle_config_update(policy).await.unwrap();

        assert_eq!(
            host.frontier().state_of("http://allowed.org/"),
            Some(EntryState::Queued)
        );
        assert!(host.frontier().state_of("http://blocked.org/").is_none());
        assert_eq!(host.status().await.policy.domain_blacklist, vec!["blocked.org"]);
    }
}
