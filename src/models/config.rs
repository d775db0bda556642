//! Application configuration structures.

use std::fs;
use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::policy::UrlPattern;

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Path of the persisted frontier cache
    #[serde(default = "defaults::cache_file")]
    pub cache_file: String,

    /// Settings used when running as host
    #[serde(default)]
    pub host: HostConfig,

    /// Settings used when running as worker
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        let listener = &self.host.listener;
        if listener.ip.parse::<IpAddr>().is_err() {
            return Err(AppError::config(format!(
                "'{}' is not a valid IP address for listener!",
                listener.ip
            )));
        }
        if listener.port == 0 {
            return Err(AppError::config("host.listener.port must be > 0"));
        }
        if self.host.work_batch_size == 0 {
            return Err(AppError::config("host.work_batch_size must be > 0"));
        }
        if self.worker.user_agent.trim().is_empty() {
            return Err(AppError::config("User agent can not be empty!"));
        }
        if !self.worker.crawl_delay_secs.is_finite() || self.worker.crawl_delay_secs < 0.0 {
            return Err(AppError::config("Crawl-Delay can not be negative!"));
        }
        if self.worker.max_concurrency == 0 {
            return Err(AppError::config("worker.max_concurrency must be > 0"));
        }
        if self.worker.host.use_host && self.worker.host.port == 0 {
            return Err(AppError::config("worker.host.port must be > 0"));
        }

        let policy = &self.worker.policy;
        for pattern in policy
            .url_must_match_patterns
            .iter()
            .chain(&policy.blacklisted_url_patterns)
        {
            UrlPattern::new(pattern)?;
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_file: defaults::cache_file(),
            host: HostConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

/// Host mode settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    /// Interval between liveness probes and lease sweeps
    #[serde(default = "defaults::status_check_interval")]
    pub status_check_interval_ms: u64,

    /// Seconds a worker may hold an item before it returns to the pool
    #[serde(default = "defaults::lease_timeout")]
    pub lease_timeout_secs: u64,

    /// Maximum items handed to one worker at a time
    #[serde(default = "defaults::work_batch_size")]
    pub work_batch_size: usize,

    /// Where workers connect to
    #[serde(default)]
    pub listener: ListenerConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            status_check_interval_ms: defaults::status_check_interval(),
            lease_timeout_secs: defaults::lease_timeout(),
            work_batch_size: defaults::work_batch_size(),
        }
    }
}

/// Host listening endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListenerConfig {
    #[serde(default = "defaults::listener_ip")]
    pub ip: String,

    #[serde(default = "defaults::port")]
    pub port: u16,

    /// Shared secret workers must present
    #[serde(default)]
    pub password: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            ip: defaults::listener_ip(),
            port: defaults::port(),
            password: String::new(),
        }
    }
}

/// Worker mode settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfig {
    /// Number of items crawled in parallel
    #[serde(default = "defaults::max_concurrency")]
    pub max_concurrency: usize,

    /// Crawl newest discoveries first instead of breadth-first
    #[serde(default)]
    pub depth_search: bool,

    /// Pause after each crawled item, per crawl task
    #[serde(default)]
    pub crawl_delay_secs: f64,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Host to pull work from when `use_host` is set
    #[serde(default)]
    pub host: HostEndpoint,

    /// Admission and content rules
    #[serde(default)]
    pub policy: PolicyConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            host: HostEndpoint::default(),
            max_concurrency: defaults::max_concurrency(),
            depth_search: false,
            crawl_delay_secs: 0.0,
            user_agent: defaults::user_agent(),
            policy: PolicyConfig::default(),
        }
    }
}

/// Remote host a worker connects to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostEndpoint {
    #[serde(default = "defaults::hostname")]
    pub hostname: String,

    #[serde(default = "defaults::port")]
    pub port: u16,

    #[serde(default)]
    pub password: String,

    /// Pull work from the host instead of the local frontier
    #[serde(default)]
    pub use_host: bool,

    /// Identity assigned by the host, reused on reconnect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// SHA-256 hex fingerprint the host certificate must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_fingerprint: Option<String>,
}

impl Default for HostEndpoint {
    fn default() -> Self {
        Self {
            hostname: defaults::hostname(),
            port: defaults::port(),
            password: String::new(),
            use_host: false,
            client_id: None,
            certificate_fingerprint: None,
        }
    }
}

/// URL admission and content acceptance rules.
///
/// Shipped to workers verbatim in a `ConfigUpdate` message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyConfig {
    /// Seed URLs
    #[serde(default)]
    pub urls: Vec<String>,

    #[serde(default)]
    pub domain_whitelist: Vec<String>,

    #[serde(default)]
    pub domain_blacklist: Vec<String>,

    /// At least one must match when non-empty
    #[serde(default)]
    pub url_must_match_patterns: Vec<String>,

    /// Any match rejects
    #[serde(default)]
    pub blacklisted_url_patterns: Vec<String>,

    #[serde(default = "defaults::accepted_extensions")]
    pub accepted_extensions: Vec<String>,

    #[serde(default = "defaults::accepted_media_types")]
    pub accepted_media_types: Vec<String>,

    /// Media types parsed for links even when not saved
    #[serde(default = "defaults::scan_target_media_types")]
    pub scan_target_media_types: Vec<String>,

    #[serde(default)]
    pub accept_all_files: bool,

    /// Upper size bound in kB, disabled when <= 0
    #[serde(default)]
    pub maximum_allowed_file_size_kb: f64,

    /// Lower size bound in kB, disabled when <= 0
    #[serde(default)]
    pub minimum_allowed_file_size_kb: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            domain_whitelist: Vec::new(),
            domain_blacklist: Vec::new(),
            url_must_match_patterns: Vec::new(),
            blacklisted_url_patterns: Vec::new(),
            accepted_extensions: defaults::accepted_extensions(),
            accepted_media_types: defaults::accepted_media_types(),
            scan_target_media_types: defaults::scan_target_media_types(),
            accept_all_files: false,
            maximum_allowed_file_size_kb: 0.0,
            minimum_allowed_file_size_kb: 0.0,
        }
    }
}

mod defaults {
    pub fn cache_file() -> String {
        "crycrawler.cache".into()
    }

    // Host defaults
    pub fn listener_ip() -> String {
        "0.0.0.0".into()
    }
    pub fn port() -> u16 {
        6000
    }
    pub fn status_check_interval() -> u64 {
        2000
    }
    pub fn lease_timeout() -> u64 {
        300
    }
    pub fn work_batch_size() -> usize {
        20
    }

    // Worker defaults
    pub fn hostname() -> String {
        "localhost".into()
    }
    pub fn max_concurrency() -> usize {
        3
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; CryCrawler/1.0)".into()
    }

    // Policy defaults
    pub fn accepted_extensions() -> Vec<String> {
        [".jpg", ".jpeg", ".png", ".gif", ".webm", ".mp4", ".txt"]
            .into_iter()
            .map(String::from)
            .collect()
    }
    pub fn accepted_media_types() -> Vec<String> {
        [
            "image/png",
            "image/jpeg",
            "audio/mpeg",
            "audio/vorbis",
            "video/mp4",
            "application/pdf",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }
    pub fn scan_target_media_types() -> Vec<String> {
        ["text/html", "text/css", "application/javascript"]
            .into_iter()
            .map(String::from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_listener_ip() {
        let mut config = Config::default();
        config.host.listener.ip = "not-an-ip".to_string();
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn validate_rejects_empty_user_agent() {
        let mut config = Config::default();
        config.worker.user_agent = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_negative_crawl_delay() {
        let mut config = Config::default();
        config.worker.crawl_delay_secs = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.worker.max_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            [worker.policy]
            urls = ["https://example.com"]
            domain_whitelist = ["example.com"]
            "#,
        )
        .unwrap();

        assert_eq!(config.cache_file, "crycrawler.cache");
        assert_eq!(config.host.listener.port, 6000);
        assert_eq!(config.worker.max_concurrency, 3);
        assert_eq!(config.worker.policy.urls, vec!["https://example.com"]);
        assert_eq!(config.worker.policy.accepted_extensions.len(), 7);
        assert!(config.worker.policy.scan_target_media_types.contains(&"text/html".to_string()));
    }

    #[test]
    fn toml_round_trip_keeps_client_id() {
        let mut config = Config::default();
        config.worker.host.client_id = Some("3f1c".to_string());

        let text = toml::to_string(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }
}
