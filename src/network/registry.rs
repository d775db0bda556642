//! Host-side registry of worker sessions.
//!
//! A session is created on a worker's first successful handshake and lives
//! as long as the host process. Disconnects only mark it offline, so the same
//! identity reconnecting picks up its old entry.
//!
//! Every registration gets a connection number. A worker may reconnect
//! before the host notices its previous socket is gone; only the latest
//! connection of an identity can take the session offline.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;

use crate::models::ClientSession;
use crate::network::{ChannelSender, NetworkMessage};

struct Slot {
    session: ClientSession,
    sender: Option<ChannelSender>,
    connection: u64,
}

#[derive(Default)]
pub struct ClientRegistry {
    slots: RwLock<HashMap<String, Slot>>,
    next_connection: AtomicU64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number a new connection; pass it to [`ClientRegistry::register`].
    pub fn reserve_connection(&self) -> u64 {
        self.next_connection.fetch_add(1, Ordering::Relaxed)
    }

    /// Record a completed handshake.
    ///
    /// A connection the identity still had open is told to disconnect.
    pub async fn register(
        &self,
        client_id: &str,
        connection: u64,
        remote_endpoint: SocketAddr,
        sender: ChannelSender,
    ) {
        let mut slots = self.slots.write().await;
        match slots.get_mut(client_id) {
            Some(slot) => {
                if let Some(previous) = slot.sender.replace(sender) {
                    let _ = previous.disconnect();
                }
                slot.connection = connection;
                slot.session.reconnect(remote_endpoint);
                log::info!("Client {} reconnected from {}", client_id, remote_endpoint);
            }
            None => {
                slots.insert(
                    client_id.to_string(),
                    Slot {
                        session: ClientSession::new(client_id, remote_endpoint),
                        sender: Some(sender),
                        connection,
                    },
                );
                log::info!("Client {} connected from {}", client_id, remote_endpoint);
            }
        }
    }

    /// Whether `connection` is still the latest one for `client_id`.
    pub async fn is_current(&self, client_id: &str, connection: u64) -> bool {
        self.slots
            .read()
            .await
            .get(client_id)
            .is_some_and(|slot| slot.connection == connection)
    }

    /// Keep the session, drop its connection.
    ///
    /// Does nothing and returns false when a newer connection has taken
    /// over the identity.
    pub async fn mark_offline(&self, client_id: &str, connection: u64) -> bool {
        let mut slots = self.slots.write().await;
        match slots.get_mut(client_id) {
            Some(slot) if slot.connection == connection => {
                slot.session.online = false;
                slot.session.is_active = false;
                slot.sender = None;
                true
            }
            _ => false,
        }
    }

    pub async fn set_active(&self, client_id: &str, active: bool) {
        if let Some(slot) = self.slots.write().await.get_mut(client_id) {
            slot.session.is_active = active;
        }
    }

    pub async fn set_work_limit(&self, client_id: &str, limit: Option<usize>) {
        if let Some(slot) = self.slots.write().await.get_mut(client_id) {
            slot.session.work_limit = limit;
        }
    }

    pub async fn get(&self, client_id: &str) -> Option<ClientSession> {
        self.slots
            .read()
            .await
            .get(client_id)
            .map(|slot| slot.session.clone())
    }

    /// Every known session, most recently connected first.
    pub async fn sessions(&self) -> Vec<ClientSession> {
        let mut sessions: Vec<ClientSession> = self
            .slots
            .read()
            .await
            .values()
            .map(|slot| slot.session.clone())
            .collect();
        sessions.sort_by(|a, b| b.last_connected.cmp(&a.last_connected));
        sessions
    }

    pub async fn online_count(&self) -> usize {
        self.slots
            .read()
            .await
            .values()
            .filter(|slot| slot.session.online)
            .count()
    }

    /// Send to every online worker; returns how many were reached.
    pub async fn broadcast(&self, message: &NetworkMessage) -> usize {
        self.slots
            .read()
            .await
            .values()
            .filter_map(|slot| slot.sender.as_ref())
            .filter(|sender| sender.send(message.clone()).is_ok())
            .count()
    }
}
