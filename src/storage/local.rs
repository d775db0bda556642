//! Local filesystem cache store.
//!
//! Records are appended as JSON lines through a single lazily opened handle.
//! [`CacheStore::load`] replays the log and rewrites it compacted, so the file
//! only grows by the transitions of one session.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::CacheRecord;
use crate::storage::{CacheStore, replay};

/// Append-only JSON lines file.
pub struct FileCacheStore {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileCacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Compaction output, the log's file name plus `.tmp`.
    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    async fn ensure_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    async fn open_append(&self) -> Result<File> {
        self.ensure_dir().await?;
        Ok(OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?)
    }

    /// Rewrite the log as exactly `records` (write to temp, then rename).
    async fn write_compacted(&self, records: &[CacheRecord]) -> Result<()> {
        self.ensure_dir().await?;

        let tmp = self.tmp_path();
        let mut file = File::create(&tmp).await?;
        file.write_all(&encode_lines(records)?).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

fn encode_lines(records: &[CacheRecord]) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(records.len() * 64);
    for record in records {
        serde_json::to_writer(&mut buf, record)?;
        buf.push(b'\n');
    }
    Ok(buf)
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn load(&self) -> Result<Vec<CacheRecord>> {
        let mut handle = self.file.lock().await;
        *handle = None;

        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::Io(e)),
        };

        let mut skipped = 0usize;
        let records = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<CacheRecord>(line) {
                Ok(record) => Some(record),
                Err(_) => {
                    // Torn tail from an abrupt stop
                    skipped += 1;
                    None
                }
            })
            .collect::<Vec<_>>();

        if skipped > 0 {
            log::warn!(
                "Skipped {} unreadable line(s) in cache file {}",
                skipped,
                self.path.display()
            );
        }

        let merged = replay(records);
        self.write_compacted(&merged).await?;
        log::debug!(
            "Loaded {} cache entries from {}",
            merged.len(),
            self.path.display()
        );

        Ok(merged)
    }

    async fn append(&self, records: &[CacheRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut handle = self.file.lock().await;
        if handle.is_none() {
            *handle = Some(self.open_append().await?);
        }
        let Some(file) = handle.as_mut() else {
            return Err(AppError::persistence("cache file handle unavailable"));
        };

        let bytes = encode_lines(records)?;
        if let Err(e) = async {
            file.write_all(&bytes).await?;
            file.flush().await
        }
        .await
        {
            // Reopen on the next attempt
            *handle = None;
            return Err(AppError::persistence(format!(
                "append to {} failed: {e}",
                self.path.display()
            )));
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut handle = self.file.lock().await;
        *handle = None;

        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::persistence(format!(
                "could not delete {}: {e}",
                self.path.display()
            ))),
        }
    }
}
