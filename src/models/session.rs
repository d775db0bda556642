//! Host-side view of a connected worker.

use std::net::SocketAddr;

use chrono::{DateTime, Local};
use serde::{Serialize, Serializer};

/// Timestamp format shown on the dashboard.
pub const LAST_CONNECTED_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

/// A worker identity known to the host.
///
/// Created on the first successful handshake and kept for the life of the
/// host process; a disconnect only flips `online`.
#[derive(Debug, Clone, Serialize)]
pub struct ClientSession {
    /// Stable identity, survives reconnects
    pub id: String,

    pub online: bool,

    /// Whether the worker currently holds leased work
    pub is_active: bool,

    #[serde(serialize_with = "serialize_last_connected")]
    pub last_connected: DateTime<Local>,

    pub remote_endpoint: SocketAddr,

    /// Maximum items this worker may hold, if limited
    pub work_limit: Option<usize>,
}

impl ClientSession {
    pub fn new(id: impl Into<String>, remote_endpoint: SocketAddr) -> Self {
        Self {
            id: id.into(),
            online: true,
            is_active: false,
            last_connected: Local::now(),
            remote_endpoint,
            work_limit: None,
        }
    }

    /// Mark a fresh connection for an existing identity.
    pub fn reconnect(&mut self, remote_endpoint: SocketAddr) {
        self.online = true;
        self.last_connected = Local::now();
        self.remote_endpoint = remote_endpoint;
    }
}

fn serialize_last_connected<S: Serializer>(
    value: &DateTime<Local>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.format(LAST_CONNECTED_FORMAT).to_string())
}
