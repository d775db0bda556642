//! In-process cache store, used for ephemeral sessions and tests.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::CacheRecord;
use crate::storage::{CacheStore, replay};

#[derive(Default)]
pub struct MemoryCacheStore {
    log: Mutex<Vec<CacheRecord>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing log, as if reopened after a restart.
    pub fn with_records(records: Vec<CacheRecord>) -> Self {
        Self {
            log: Mutex::new(records),
        }
    }

    /// Raw appended records, uncompacted.
    pub fn records(&self) -> Vec<CacheRecord> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn load(&self) -> Result<Vec<CacheRecord>> {
        let mut log = self
            .log
            .lock()
            .map_err(|_| AppError::persistence("memory store poisoned"))?;
        let merged = replay(log.drain(..));
        log.extend(merged.iter().cloned());
        Ok(merged)
    }

    async fn append(&self, records: &[CacheRecord]) -> Result<()> {
        self.log
            .lock()
            .map_err(|_| AppError::persistence("memory store poisoned"))?
            .extend_from_slice(records);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.log
            .lock()
            .map_err(|_| AppError::persistence("memory store poisoned"))?
            .clear();
        Ok(())
    }
}
