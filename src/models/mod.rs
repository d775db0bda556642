// src/models/mod.rs

//! Domain models for the crawler core.
//!
//! Configuration, work items and their persisted state, and the host's record
//! of each worker.

mod config;
mod session;
mod work;

pub use config::{
    Config, HostConfig, HostEndpoint, ListenerConfig, PolicyConfig, WorkerConfig,
};
pub use session::{ClientSession, LAST_CONNECTED_FORMAT};
pub use work::{CacheRecord, EntryState, WorkItem, WorkResult, WorkSource};
