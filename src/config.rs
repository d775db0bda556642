// src/config.rs

//! Configuration context.
//!
//! [`ConfigContext`] is the one shared handle to the live configuration. Every
//! component that reads settings after startup gets a clone of it, and only
//! `update` can change them; `save` writes the current state back to disk.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::error::{AppError, Result};
use crate::models::Config;

/// Default configuration file name.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Clone)]
pub struct ConfigContext {
    inner: Arc<RwLock<Config>>,
    path: Option<PathBuf>,
}

impl ConfigContext {
    /// Context backed by a file.
    pub fn new(config: Config, path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
            path: Some(path.into()),
        }
    }

    /// Context with nothing on disk; `save` is a no-op.
    pub fn in_memory(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
            path: None,
        }
    }

    /// Load and validate `path`, creating it from defaults when missing.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let config = Config::load(path).map_err(|e| {
                AppError::config(format!("Failed to load {}: {e}", path.display()))
            })?;
            log::debug!("Loaded configuration from {}", path.display());
            config
        } else {
            log::info!("Creating default configuration at {}", path.display());
            Config::default()
        };
        config.validate()?;

        let context = Self::new(config, path);
        if !path.exists() {
            context.save()?;
        }
        Ok(context)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` against the current configuration.
    pub fn read<R>(&self, f: impl FnOnce(&Config) -> R) -> R {
        match self.inner.read() {
            Ok(config) => f(&config),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    /// Clone of the current configuration.
    pub fn snapshot(&self) -> Config {
        self.read(Config::clone)
    }

    /// Change the configuration in place.
    pub fn update<R>(&self, f: impl FnOnce(&mut Config) -> R) -> R {
        match self.inner.write() {
            Ok(mut config) => f(&mut config),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Write the configuration atomically (write to temp, then rename).
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let text = toml::to_string_pretty(&self.snapshot())?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, path)?;

        log::debug!("Saved configuration to {}", path.display());
        Ok(())
    }
}
