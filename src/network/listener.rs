//! Host side: accepts workers and feeds them leased work.
//!
//! Each accepted connection is upgraded to TLS, authenticated, registered in
//! the [`ClientRegistry`] and then served from its own task: configuration on
//! connect, a status probe plus work top-up on every tick, and more work
//! whenever the worker reports a result or asks for it. When a connection
//! ends the session goes offline and its leases return to the pool.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ConfigContext;
use crate::error::{AppError, Result};
use crate::frontier::Frontier;
use crate::models::{WorkResult, WorkSource};
use crate::network::security::{HostIdentity, Role, handshake, hash_password};
use crate::network::{ChannelSender, ClientRegistry, MessageChannel, MessageHandler, NetworkMessage};

/// Everything a connection task needs.
struct HostShared {
    config: ConfigContext,
    frontier: Arc<Frontier>,
    registry: Arc<ClientRegistry>,
    identity: HostIdentity,
}

impl HostShared {
    fn batch_size(&self) -> usize {
        self.config.read(|c| c.host.work_batch_size)
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.config.read(|c| c.host.status_check_interval_ms).max(1))
    }

    /// Top the worker up to its batch size.
    async fn serve_work(&self, client_id: &str, connection: u64, sender: &ChannelSender) {
        if !self.registry.is_current(client_id, connection).await {
            return;
        }

        let room = self.batch_size().saturating_sub(self.frontier.leased_to(client_id));
        if room == 0 {
            return;
        }

        let items = self.frontier.lease(client_id, room);
        if items.is_empty() {
            return;
        }

        log::debug!("Sending {} item(s) to client {}", items.len(), client_id);
        if let Err(e) = sender.send(NetworkMessage::Work(items.clone())) {
            log::debug!("Work for client {} not sent: {}", client_id, e);
            self.frontier.release_items(items);
            return;
        }
        self.registry.set_active(client_id, true).await;
    }

    async fn accept_result(&self, client_id: &str, result: WorkResult) {
        let depth = result.depth.saturating_add(1);
        for link in &result.discovered {
            self.frontier.try_enqueue_with(link, depth, WorkSource::Discovered);
        }
        self.frontier.mark_crawled(&result.url);

        if self.frontier.leased_to(client_id) == 0 {
            self.registry.set_active(client_id, false).await;
        }
    }
}

/// Per-connection message handler.
struct WorkerSession {
    client_id: String,
    connection: u64,
    shared: Arc<HostShared>,
}

#[async_trait]
impl MessageHandler for WorkerSession {
    async fn handle(&self, message: NetworkMessage, sender: &ChannelSender) {
        match message {
            NetworkMessage::WorkRequest => {
                self.shared
                    .serve_work(&self.client_id, self.connection, sender)
                    .await
            }
            NetworkMessage::WorkResult(result) => {
                self.shared.accept_result(&self.client_id, result).await;
                self.shared
                    .serve_work(&self.client_id, self.connection, sender)
                    .await;
            }
            NetworkMessage::StatusCheck | NetworkMessage::Disconnect => {}
            other @ (NetworkMessage::Hello { .. }
            | NetworkMessage::Welcome { .. }
            | NetworkMessage::Rejected { .. }
            | NetworkMessage::ConfigUpdate(_)
            | NetworkMessage::WorkLimitUpdate(_)
            | NetworkMessage::Work(_)) => {
                log::debug!(
                    "Ignoring unexpected {} from client {}",
                    other.kind(),
                    self.client_id
                );
            }
        }
    }
}

pub struct WorkerListener {
    shared: Arc<HostShared>,
    running: Mutex<Option<(CancellationToken, JoinHandle<()>, SocketAddr)>>,
}

impl WorkerListener {
    /// Generates the host certificate; nothing is bound until `start`.
    pub fn new(
        config: ConfigContext,
        frontier: Arc<Frontier>,
        registry: Arc<ClientRegistry>,
    ) -> Result<Self> {
        let identity = HostIdentity::generate()?;
        log::info!("Host certificate fingerprint: {}", identity.fingerprint());

        Ok(Self {
            shared: Arc::new(HostShared {
                config,
                frontier,
                registry,
                identity,
            }),
            running: Mutex::new(None),
        })
    }

    pub fn fingerprint(&self) -> &str {
        self.shared.identity.fingerprint()
    }

    pub fn is_listening(&self) -> bool {
        self.running.lock().is_ok_and(|r| r.is_some())
    }

    /// Bind the configured endpoint and start accepting workers.
    pub async fn start(&self) -> Result<SocketAddr> {
        if self.is_listening() {
            return Err(AppError::state("Listener already running!"));
        }

        let (ip, port) = self
            .shared
            .config
            .read(|c| (c.host.listener.ip.clone(), c.host.listener.port));
        let ip = ip
            .parse::<std::net::IpAddr>()
            .map_err(|_| AppError::config(format!("'{ip}' is not a valid IP address for listener!")))?;

        let listener = TcpListener::bind(SocketAddr::new(ip, port))
            .await
            .map_err(|e| AppError::transport(format!("bind {ip}:{port}: {e}")))?;
        let local = listener.local_addr()?;

        let token = CancellationToken::new();
        let task = tokio::spawn(accept_loop(self.shared.clone(), listener, token.clone()));
        if let Ok(mut running) = self.running.lock() {
            *running = Some((token, task, local));
        }

        log::info!("Listening for workers on {}", local);
        Ok(local)
    }

    /// Stop accepting, disconnect every worker and wait for the tasks to end.
    pub async fn stop(&self) {
        let running = self.running.lock().ok().and_then(|mut r| r.take());
        if let Some((token, task, local)) = running {
            token.cancel();
            let _ = task.await;
            log::info!("Stopped listening on {}", local);
        }
    }
}

async fn accept_loop(shared: Arc<HostShared>, listener: TcpListener, token: CancellationToken) {
    let mut sweep = tokio::time::interval(shared.tick_interval());
    let mut connections: Vec<JoinHandle<()>> = Vec::new();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = sweep.tick() => {
                let reclaimed = shared.frontier.reclaim_expired(Instant::now());
                if reclaimed > 0 {
                    log::info!("Returned {} expired lease(s) to the pool", reclaimed);
                }
                connections.retain(|c| !c.is_finished());
            }
            accepted = listener.accept() => match accepted {
                Ok((tcp, peer)) => {
                    connections.push(tokio::spawn(serve_connection(
                        shared.clone(),
                        tcp,
                        peer,
                        token.child_token(),
                    )));
                }
                Err(e) => log::debug!("Failed to accept connection: {}", e),
            },
        }
    }

    futures::future::join_all(connections).await;
}

async fn serve_connection(
    shared: Arc<HostShared>,
    tcp: TcpStream,
    peer: SocketAddr,
    token: CancellationToken,
) {
    let _ = tcp.set_nodelay(true);

    let mut tls = tokio::select! {
        _ = token.cancelled() => return,
        tls = shared.identity.accept(tcp) => match tls {
            Ok(tls) => tls,
            Err(e) => {
                log::debug!("Connection from {} failed: {}", peer, e);
                return;
            }
        },
    };

    let password_hash = shared.config.read(|c| hash_password(&c.host.listener.password));
    let client_id = tokio::select! {
        _ = token.cancelled() => return,
        id = handshake(&mut tls, &password_hash, Role::Acceptor) => match id {
            Ok(id) => id,
            Err(e) => {
                log::debug!("Rejected client from {}: {}", peer, e);
                return;
            }
        },
    };

    // Numbered before the reader starts so handlers know their connection
    let session = Arc::new(WorkerSession {
        client_id: client_id.clone(),
        connection: shared.registry.reserve_connection(),
        shared: shared.clone(),
    });
    let connection = session.connection;
    let channel = MessageChannel::spawn(tls, session);
    let sender = channel.sender();

    let batch = shared.batch_size();
    shared
        .registry
        .register(&client_id, connection, peer, sender.clone())
        .await;
    shared.registry.set_work_limit(&client_id, Some(batch)).await;

    let policy = shared.config.read(|c| c.worker.policy.clone());
    let greeted = sender
        .send(NetworkMessage::ConfigUpdate(policy))
        .and_then(|_| sender.send(NetworkMessage::WorkLimitUpdate(batch)));

    if greeted.is_ok() {
        // First batch goes out on the worker's request, once it has settled
        let period = shared.tick_interval();
        let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                reason = channel.closed() => {
                    log::debug!("Channel to client {} closed: {:?}", client_id, reason);
                    break;
                }
                _ = token.cancelled() => {
                    let _ = sender.disconnect();
                    channel.closed().await;
                    break;
                }
                _ = tick.tick() => {
                    if !shared.registry.is_current(&client_id, connection).await {
                        log::debug!("Connection of client {} superseded", client_id);
                        let _ = sender.disconnect();
                        channel.closed().await;
                        break;
                    }
                    if sender.send(NetworkMessage::StatusCheck).is_ok() {
                        shared.serve_work(&client_id, connection, &sender).await;
                    }
                }
            }
        }
    }

    if !shared.registry.mark_offline(&client_id, connection).await {
        // Leases now belong to the newer connection
        log::debug!("Superseded connection of client {} closed", client_id);
        return;
    }
    let released = shared.frontier.release_client(&client_id);
    log::info!(
        "Client {} disconnected, {} item(s) returned to the pool",
        client_id,
        released
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontier::FrontierSettings;
    use crate::models::Config;
    use crate::network::codec::{read_frame, write_frame};
    use crate::network::security::secure_client;
    use crate::policy::UrlPolicy;
    use crate::storage::MemoryCacheStore;

    async fn host(seeds: &[&str]) -> (WorkerListener, Arc<Frontier>, Arc<ClientRegistry>) {
        let mut config = Config::default();
        config.host.listener.ip = "127.0.0.1".to_string();
        config.host.listener.port = 0;
        config.host.listener.password = "pw".to_string();
        config.host.work_batch_size = 2;
        config.worker.policy.domain_whitelist = vec!["example.com".to_string()];

        let frontier = Arc::new(
            Frontier::open(
                Arc::new(MemoryCacheStore::new()),
                UrlPolicy::new(&config.worker.policy).unwrap(),
                FrontierSettings::default(),
            )
            .await
            .unwrap(),
        );
        for seed in seeds {
            assert!(frontier.try_enqueue(seed));
        }

        let registry = Arc::new(ClientRegistry::new());
        let listener = WorkerListener::new(
            ConfigContext::in_memory(config),
            frontier.clone(),
            registry.clone(),
        )
        .unwrap();
        (listener, frontier, registry)
    }

    async fn next_non_status<S>(stream: &mut S) -> NetworkMessage
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        loop {
            match read_frame(stream).await.unwrap() {
                Some(NetworkMessage::StatusCheck) => continue,
                Some(message) => return message,
                None => panic!("host closed the connection"),
            }
        }
    }

    #[tokio::test]
    async fn test_worker_session_lifecycle() {
        let (listener, frontier, registry) = host(&[
            "http://example.com/1",
            "http://example.com/2",
            "http://example.com/3",
        ])
        .await;
        let addr = listener.start().await.unwrap();
        assert!(listener.is_listening());

        let tcp = TcpStream::connect(addr).await.unwrap();
        let mut tls = secure_client(tcp, "localhost", Some(listener.fingerprint()))
            .await
            .unwrap();
        let id = handshake(&mut tls, &hash_password("pw"), Role::Initiator { client_id: None })
            .await
            .unwrap();

        assert!(matches!(next_non_status(&mut tls).await, NetworkMessage::ConfigUpdate(_)));
        assert_eq!(next_non_status(&mut tls).await, NetworkMessage::WorkLimitUpdate(2));
        write_frame(&mut tls, &NetworkMessage::WorkRequest).await.unwrap();

        let NetworkMessage::Work(batch) = next_non_status(&mut tls).await else {
            panic!("expected work");
        };
        assert_eq!(batch.len(), 2);
        assert_eq!(frontier.leased_to(&id), 2);
        assert!(registry.get(&id).await.unwrap().online);

        // Report one result with a new link and one rejected by the whitelist
        let result = WorkResult {
            url: batch[0].url.clone(),
            depth: batch[0].depth,
            discovered: vec![
                "http://example.com/4".to_string(),
                "http://other.org/".to_string(),
            ],
        };
        write_frame(&mut tls, &NetworkMessage::WorkResult(result)).await.unwrap();

        let NetworkMessage::Work(refill) = next_non_status(&mut tls).await else {
            panic!("expected refill");
        };
        assert_eq!(refill.len(), 1);
        assert_eq!(
            frontier.state_of(&batch[0].url),
            Some(crate::models::EntryState::Crawled)
        );
        assert!(frontier.state_of("http://other.org/").is_none());

        // Dropping the connection returns the remaining leases
        drop(tls);
        tokio::time::timeout(Duration::from_secs(5), async {
            while frontier.leased_to(&id) > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.get(&id).await.unwrap().online {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(frontier.stats().work_count, 3);

        listener.stop().await;
        assert!(!listener.is_listening());
    }

    #[tokio::test]
    async fn test_stale_connection_closing_keeps_reconnected_session() {
        let (listener, frontier, registry) = host(&[
            "http://example.com/1",
            "http://example.com/2",
            "http://example.com/3",
        ])
        .await;
        let addr = listener.start().await.unwrap();

        let tcp = TcpStream::connect(addr).await.unwrap();
        let mut stale = secure_client(tcp, "localhost", Some(listener.fingerprint()))
            .await
            .unwrap();
        let id = handshake(&mut stale, &hash_password("pw"), Role::Initiator { client_id: None })
            .await
            .unwrap();
        assert!(matches!(next_non_status(&mut stale).await, NetworkMessage::ConfigUpdate(_)));

        // Same identity reconnects while the old socket is still open
        let tcp = TcpStream::connect(addr).await.unwrap();
        let mut live = secure_client(tcp, "localhost", Some(listener.fingerprint()))
            .await
            .unwrap();
        let reused = handshake(
            &mut live,
            &hash_password("pw"),
            Role::Initiator {
                client_id: Some(id.clone()),
            },
        )
        .await
        .unwrap();
        assert_eq!(reused, id);

        assert!(matches!(next_non_status(&mut live).await, NetworkMessage::ConfigUpdate(_)));
        assert_eq!(next_non_status(&mut live).await, NetworkMessage::WorkLimitUpdate(2));
        write_frame(&mut live, &NetworkMessage::WorkRequest).await.unwrap();
        let NetworkMessage::Work(batch) = next_non_status(&mut live).await else {
            panic!("expected work");
        };
        assert_eq!(batch.len(), 2);

        // The old connection is told to leave, then goes away
        loop {
            match read_frame(&mut stale).await {
                Ok(Some(NetworkMessage::Disconnect)) | Ok(None) | Err(_) => break,
                Ok(Some(_)) => continue,
            }
        }
        drop(stale);
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(registry.get(&id).await.unwrap().online);
        assert_eq!(frontier.leased_to(&id), 2);
        assert_eq!(frontier.stats().work_count, 1);
        assert_eq!(
            registry.broadcast(&NetworkMessage::StatusCheck).await,
            1
        );

        listener.stop().await;
    }

    #[tokio::test]
    async fn test_wrong_password_never_registers() {
        let (listener, _frontier, registry) = host(&[]).await;
        let addr = listener.start().await.unwrap();

        let tcp = TcpStream::connect(addr).await.unwrap();
        let mut tls = secure_client(tcp, "localhost", None).await.unwrap();
        let result = handshake(&mut tls, &hash_password("nope"), Role::Initiator { client_id: None })
            .await;

        assert!(matches!(result, Err(AppError::Handshake(_))));
        assert!(registry.sessions().await.is_empty());
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_stop_disconnects_workers() {
        let (listener, _frontier, registry) = host(&[]).await;
        let addr = listener.start().await.unwrap();

        let tcp = TcpStream::connect(addr).await.unwrap();
        let mut tls = secure_client(tcp, "localhost", None).await.unwrap();
        let id = handshake(&mut tls, &hash_password("pw"), Role::Initiator { client_id: None })
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.get(&id).await.is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        listener.stop().await;
        assert!(!registry.get(&id).await.unwrap().online);

        loop {
            match read_frame(&mut tls).await {
                Ok(Some(NetworkMessage::Disconnect)) | Ok(None) | Err(_) => break,
                Ok(Some(_)) => continue,
            }
        }
    }
}
