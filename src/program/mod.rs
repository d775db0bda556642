//! Host and worker programs.
//!
//! Each program owns the components of one run mode and exposes the
//! commands the dashboard issues: status, start/stop with an optional cache
//! wipe, and a replacement of the crawl policy.

mod host;
mod worker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ConfigContext;
use crate::error::{AppError, Result};
use crate::frontier::FrontierStats;
use crate::models::{ClientSession, PolicyConfig};
use crate::policy::UrlPolicy;

pub use host::HostProgram;
pub use worker::WorkerProgram;

/// Dashboard request to change the run state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub is_active: bool,
    #[serde(default)]
    pub clear_cache: bool,
}

/// Everything the dashboard shows.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub is_listening: bool,
    pub is_active: bool,
    pub work_available: bool,
    pub connected_to_host: bool,
    pub using_host: bool,
    pub host_endpoint: String,
    pub client_id: Option<String>,
    #[serde(flatten)]
    pub stats: FrontierStats,
    pub clients: Vec<ClientSession>,
    /// Locally configured policy, never the one a host pushed
    pub policy: PolicyConfig,
}

impl StatusSnapshot {
    fn base(config: &ConfigContext, stats: FrontierStats, work_available: bool) -> Self {
        config.read(|c| Self {
            is_listening: false,
            is_active: false,
            work_available,
            connected_to_host: false,
            using_host: c.worker.host.use_host,
            host_endpoint: format!("{}:{}", c.worker.host.hostname, c.worker.host.port),
            client_id: c.worker.host.client_id.clone(),
            stats,
            clients: Vec::new(),
            policy: c.worker.policy.clone(),
        })
    }
}

#[async_trait]
pub trait Program: Send + Sync {
    async fn start(&self) -> Result<()>;

    /// Stop all activity and flush persisted state.
    async fn stop(&self);

    async fn status(&self) -> StatusSnapshot;

    /// Start or stop, then optionally wipe the cache.
    ///
    /// Wiping while running stops, clears and restarts. It is refused when
    /// URLs come from a host.
    async fn handle_state_update(&self, update: StateUpdate) -> Result<()>;

    /// Replace the crawl policy, persist it and re-offer the seed URLs.
    async fn handle_config_update(&self, policy: PolicyConfig) -> Result<()>;
}

fn ensure_local_source(config: &ConfigContext, action: &str) -> Result<()> {
    if config.read(|c| c.worker.host.use_host) {
        return Err(AppError::policy(format!(
            "Can not {action} when using Host as Url source!"
        )));
    }
    Ok(())
}

/// Compile, store and save a new policy. Nothing changes if it is invalid.
fn apply_policy(config: &ConfigContext, policy: PolicyConfig) -> Result<UrlPolicy> {
    ensure_local_source(config, "update configuration")?;

    let compiled = UrlPolicy::new(&policy)?;
    config.update(|c| c.worker.policy = policy);
    config.save()?;
    Ok(compiled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Config;

    #[test]
    fn test_state_update_parses_dashboard_payload() {
        let update: StateUpdate = serde_json::from_str(r#"{"is_active":true}"#).unwrap();
        assert_eq!(
            update,
            StateUpdate {
                is_active: true,
                clear_cache: false
            }
        );
    }

    #[test]
    fn test_apply_policy_rejected_when_host_sourced() {
        let mut config = Config::default();
        config.worker.host.use_host = true;
        let context = ConfigContext::in_memory(config);

        let result = apply_policy(&context, PolicyConfig::default());
        match result {
            Err(AppError::Policy(message)) => assert_eq!(
                message,
                "Can not update configuration when using Host as Url source!"
            ),
            other => panic!("expected policy error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_invalid_policy_leaves_config_untouched() {
        let context = ConfigContext::in_memory(Config::default());
        let policy = PolicyConfig {
            blacklisted_url_patterns: vec!["http://".to_string()],
            ..PolicyConfig::default()
        };

        let result = apply_policy(&context, policy);
        assert!(result.is_err());
        assert_eq!(context.snapshot(), Config::default());
    }

    #[test]
    fn test_snapshot_serializes_flat_counts() {
        let context = ConfigContext::in_memory(Config::default());
        let snapshot = StatusSnapshot::base(&context, FrontierStats::default(), false);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["work_count"], 0);
        assert_eq!(json["host_endpoint"], "localhost:6000");
        assert!(json["policy"]["urls"].is_array());
    }
}
