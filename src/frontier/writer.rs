//! Background task that makes frontier transitions durable.
//!
//! The frontier enqueues records while holding its lock, which fixes their
//! order, and the task performs the I/O after the lock is gone. Consecutive
//! appends are written as one batch.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{AppError, Result};
use crate::models::CacheRecord;
use crate::storage::CacheStore;

enum Command {
    Append(CacheRecord),
    Clear(oneshot::Sender<Result<()>>),
    Flush(oneshot::Sender<()>),
}

/// Handle to the writer task. The task ends once every handle is dropped.
#[derive(Clone)]
pub struct CacheWriter {
    tx: mpsc::UnboundedSender<Command>,
}

impl CacheWriter {
    pub fn spawn(store: Arc<dyn CacheStore>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(store, rx));
        (Self { tx }, handle)
    }

    /// Queue a record; never blocks.
    pub fn append(&self, record: CacheRecord) {
        if self.tx.send(Command::Append(record)).is_err() {
            log::warn!("Cache writer stopped, transition not persisted");
        }
    }

    /// Wait until everything queued so far has been handed to the store.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Wipe the store after every earlier append has been written.
    pub async fn clear(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Command::Clear(tx))
            .map_err(|_| AppError::persistence("cache writer stopped"))?;
        rx.await
            .map_err(|_| AppError::persistence("cache writer stopped"))?
    }
}

async fn run(store: Arc<dyn CacheStore>, mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut batch: Vec<CacheRecord> = Vec::new();

    while let Some(command) = rx.recv().await {
        let mut pending = Some(command);

        while let Some(command) = pending.take() {
            match command {
                Command::Append(record) => {
                    batch.push(record);
                    // Coalesce whatever is already queued
                    match rx.try_recv() {
                        Ok(next) => pending = Some(next),
                        Err(_) => write_batch(store.as_ref(), &mut batch).await,
                    }
                }
                Command::Clear(reply) => {
                    write_batch(store.as_ref(), &mut batch).await;
                    let _ = reply.send(store.clear().await);
                }
                Command::Flush(reply) => {
                    write_batch(store.as_ref(), &mut batch).await;
                    let _ = reply.send(());
                }
            }
        }
    }

    write_batch(store.as_ref(), &mut batch).await;
    log::debug!("Cache writer finished");
}

async fn write_batch(store: &dyn CacheStore, batch: &mut Vec<CacheRecord>) {
    if batch.is_empty() {
        return;
    }
    if let Err(e) = store.append(batch).await {
        // Crawling goes on with reduced durability
        log::warn!("Failed to persist {} cache record(s): {}", batch.len(), e);
    }
    batch.clear();
}
