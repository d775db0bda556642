//! Worker side connection supervisor.
//!
//! Runs one long-lived task per supervisor:
//!
//! ```text
//! Disconnected -> Connecting -> Handshaking -> Connected
//!       ^                                          |
//!       +------------- fault / Disconnect ---------+
//! ```
//!
//! Every fault is logged at debug level and followed by a fixed retry delay.
//! The worker identity learned from the first successful handshake is
//! presented again on every later attempt, so the host sees the same client
//! across reconnects.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::HostEndpoint;
use crate::network::channel::{ChannelSender, CloseReason, MessageChannel, MessageHandler};
use crate::network::security::{Role, handshake, hash_password, secure_client};
use crate::network::{BoxedStream, NetworkMessage};

/// Opens the raw, secured stream for one attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: SocketAddr) -> Result<BoxedStream>;
}

/// TCP + TLS towards the configured host.
pub struct TlsHostConnector {
    hostname: String,
    fingerprint: Option<String>,
}

impl TlsHostConnector {
    pub fn new(endpoint: &HostEndpoint) -> Self {
        Self {
            hostname: endpoint.hostname.clone(),
            fingerprint: endpoint.certificate_fingerprint.clone(),
        }
    }
}

#[async_trait]
impl Connector for TlsHostConnector {
    async fn connect(&self, address: SocketAddr) -> Result<BoxedStream> {
        let tcp = TcpStream::connect(address)
            .await
            .map_err(|e| AppError::transport(format!("connect to {address}: {e}")))?;
        tcp.set_nodelay(true)?;

        log::debug!("Establishing secure connection...");
        let tls = secure_client(tcp, &self.hostname, self.fingerprint.as_deref()).await?;
        Ok(Box::new(tls))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Disconnected,
    Connecting,
    Handshaking,
    Connected,
}

/// What the supervisor reports to its owner, in order, from its own task.
#[derive(Debug)]
pub enum SupervisorEvent {
    Connected {
        client_id: String,
        sender: ChannelSender,
    },
    Message {
        message: NetworkMessage,
        sender: ChannelSender,
    },
    Disconnected {
        client_id: String,
    },
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Quiet period after the handshake before inbound traffic counts
    pub settle_interval: Duration,
    /// Pause between connection attempts
    pub retry_delay: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            settle_interval: Duration::from_millis(100),
            retry_delay: Duration::from_millis(300),
        }
    }
}

/// State shared with the connection task.
struct Link {
    hostname: String,
    port: u16,
    password_hash: String,
    connector: Arc<dyn Connector>,
    settings: SupervisorSettings,
    client_id: Mutex<Option<String>>,
    state: Mutex<SupervisorState>,
    attempts: AtomicUsize,
    events: mpsc::UnboundedSender<SupervisorEvent>,
}

impl Link {
    fn set_state(&self, state: SupervisorState) {
        if let Ok(mut current) = self.state.lock() {
            *current = state;
        }
    }

    fn state(&self) -> SupervisorState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(SupervisorState::Disconnected)
    }

    fn client_id(&self) -> Option<String> {
        self.client_id.lock().ok().and_then(|id| id.clone())
    }

    fn emit(&self, event: SupervisorEvent) {
        // Receiver gone means the owner shut down
        let _ = self.events.send(event);
    }
}

pub struct ConnectionSupervisor {
    link: Arc<Link>,
    active: AtomicBool,
    running: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl ConnectionSupervisor {
    /// Build a supervisor for `endpoint`; events arrive on the returned receiver.
    pub fn new(
        endpoint: &HostEndpoint,
        connector: Arc<dyn Connector>,
        settings: SupervisorSettings,
    ) -> (Self, mpsc::UnboundedReceiver<SupervisorEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let link = Link {
            hostname: endpoint.hostname.clone(),
            port: endpoint.port,
            password_hash: hash_password(&endpoint.password),
            connector,
            settings,
            client_id: Mutex::new(endpoint.client_id.clone().filter(|id| !id.is_empty())),
            state: Mutex::new(SupervisorState::Disconnected),
            attempts: AtomicUsize::new(0),
            events,
        };

        (
            Self {
                link: Arc::new(link),
                active: AtomicBool::new(false),
                running: Mutex::new(None),
            },
            rx,
        )
    }

    /// Resolve the host and launch the connection loop.
    pub async fn start(&self) -> Result<()> {
        if self.active.swap(true, Ordering::AcqRel) {
            return Err(AppError::state("Connection supervisor already running!"));
        }

        let address = match resolve(&self.link.hostname, self.link.port).await {
            Ok(address) => address,
            Err(e) => {
                self.active.store(false, Ordering::Release);
                return Err(e);
            }
        };

        let token = CancellationToken::new();
        let task = tokio::spawn(connection_loop(self.link.clone(), address, token.clone()));
        if let Ok(mut running) = self.running.lock() {
            *running = Some((token, task));
        }
        Ok(())
    }

    /// Cancel the loop, closing any open connection, and wait for it to end.
    pub async fn stop(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }

        let running = self.running.lock().ok().and_then(|mut r| r.take());
        if let Some((token, task)) = running {
            token.cancel();
            let _ = task.await;
        }
        self.link.set_state(SupervisorState::Disconnected);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        self.link.state() == SupervisorState::Connected
    }

    pub fn state(&self) -> SupervisorState {
        self.link.state()
    }

    /// Identity assigned by the host, once known.
    pub fn client_id(&self) -> Option<String> {
        self.link.client_id()
    }

    /// Connection attempts made so far.
    pub fn attempts(&self) -> usize {
        self.link.attempts.load(Ordering::Acquire)
    }

    pub fn host_address(&self) -> String {
        format!("{}:{}", self.link.hostname, self.link.port)
    }
}

/// Numeric addresses are used as is; names take the last resolved address.
async fn resolve(hostname: &str, port: u16) -> Result<SocketAddr> {
    if let Ok(ip) = hostname.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    tokio::net::lookup_host((hostname, port))
        .await
        .map_err(|e| AppError::transport(format!("Failed to resolve hostname '{hostname}': {e}")))?
        .last()
        .ok_or_else(|| AppError::transport(format!("Failed to resolve hostname '{hostname}'")))
}

async fn connection_loop(link: Arc<Link>, address: SocketAddr, token: CancellationToken) {
    while !token.is_cancelled() {
        link.attempts.fetch_add(1, Ordering::AcqRel);

        match run_session(&link, address, &token).await {
            Err(e) if e.is_retryable() => log::debug!("Host connection error. {}", e),
            Err(e) => log::warn!("Host connection error. {}", e),
            Ok(()) => {}
        }
        link.set_state(SupervisorState::Disconnected);

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(link.settings.retry_delay) => {}
        }
    }
}

/// One attempt: connect, handshake, serve until the channel ends.
async fn run_session(link: &Link, address: SocketAddr, token: &CancellationToken) -> Result<()> {
    link.set_state(SupervisorState::Connecting);
    log::debug!("Connecting to host...");
    let mut stream = tokio::select! {
        _ = token.cancelled() => return Ok(()),
        stream = link.connector.connect(address) => stream?,
    };

    link.set_state(SupervisorState::Handshaking);
    log::debug!("Validating host...");
    let role = Role::Initiator {
        client_id: link.client_id(),
    };
    let client_id = tokio::select! {
        _ = token.cancelled() => return Ok(()),
        id = handshake(&mut stream, &link.password_hash, role) => id?,
    };
    if let Ok(mut slot) = link.client_id.lock() {
        *slot = Some(client_id.clone());
    }

    let live = Arc::new(AtomicBool::new(false));
    let relay = Relay {
        events: link.events.clone(),
        live: live.clone(),
    };
    let channel = MessageChannel::spawn(stream, Arc::new(relay));

    tokio::select! {
        _ = token.cancelled() => return Ok(()),
        _ = tokio::time::sleep(link.settings.settle_interval) => {}
    }

    if channel.is_closed() {
        let reason = channel.closed().await;
        return Err(AppError::transport(format!(
            "connection lost while settling: {reason:?}"
        )));
    }

    live.store(true, Ordering::Release);
    link.set_state(SupervisorState::Connected);
    log::info!("Connected to host. (Id: {})", client_id);
    link.emit(SupervisorEvent::Connected {
        client_id: client_id.clone(),
        sender: channel.sender(),
    });

    let reason = tokio::select! {
        reason = channel.closed() => reason,
        _ = token.cancelled() => {
            channel.abort();
            CloseReason::Aborted
        }
    };

    log::info!("Disconnected from host");
    link.emit(SupervisorEvent::Disconnected { client_id });

    match reason {
        CloseReason::Faulted(reason) => Err(AppError::transport(reason)),
        CloseReason::Graceful | CloseReason::Aborted => Ok(()),
    }
}

/// Forwards inbound traffic as events, holding back everything but
/// configuration until the connection has settled.
struct Relay {
    events: mpsc::UnboundedSender<SupervisorEvent>,
    live: Arc<AtomicBool>,
}

#[async_trait]
impl MessageHandler for Relay {
    async fn handle(&self, message: NetworkMessage, sender: &ChannelSender) {
        if message.is_configuration() || self.live.load(Ordering::Acquire) {
            let _ = self.events.send(SupervisorEvent::Message {
                message,
                sender: sender.clone(),
            });
        }
    }
}
