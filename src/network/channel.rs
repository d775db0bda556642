//! Framed, bidirectional message channel over one secured stream.
//!
//! A reader task decodes frames and awaits the registered
//! [`MessageHandler`] once per message, so a slow handler holds back further
//! reads on that channel. A separate writer task drains an outbound queue,
//! which serializes concurrent senders without touching the read path.
//!
//! The first fault or close wins: it is recorded as the [`CloseReason`], both
//! tasks stop, and dropping their stream halves closes the socket. The
//! channel never reconnects by itself.

use std::fmt;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::network::NetworkMessage;
use crate::network::codec::{read_frame, write_frame};

/// Receives every inbound message, in order, on the channel's reader task.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: NetworkMessage, sender: &ChannelSender);
}

/// Why a channel ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `Disconnect` was sent or received
    Graceful,
    /// Closed locally without notifying the peer
    Aborted,
    /// Stream or decode failure
    Faulted(String),
}

struct Shared {
    token: CancellationToken,
    reason: OnceLock<CloseReason>,
}

impl Shared {
    fn finish(&self, reason: CloseReason) {
        let _ = self.reason.set(reason);
        self.token.cancel();
    }
}

/// Cloneable send handle; safe to use from any task.
#[derive(Clone)]
pub struct ChannelSender {
    tx: mpsc::UnboundedSender<NetworkMessage>,
    shared: Arc<Shared>,
}

impl ChannelSender {
    /// Queue a message for the writer task.
    pub fn send(&self, message: NetworkMessage) -> Result<()> {
        if self.shared.token.is_cancelled() {
            return Err(AppError::transport("channel closed"));
        }
        self.tx
            .send(message)
            .map_err(|_| AppError::transport("channel closed"))
    }

    /// Send `Disconnect`; the channel closes once it is written.
    pub fn disconnect(&self) -> Result<()> {
        self.send(NetworkMessage::Disconnect)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.token.is_cancelled()
    }
}

impl fmt::Debug for ChannelSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSender")
            .field("closed", &self.is_closed())
            .finish()
    }
}

pub struct MessageChannel {
    sender: ChannelSender,
    shared: Arc<Shared>,
}

impl MessageChannel {
    /// Take ownership of `stream` and start the reader and writer tasks.
    pub fn spawn<S>(stream: S, handler: Arc<dyn MessageHandler>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let shared = Arc::new(Shared {
            token: CancellationToken::new(),
            reason: OnceLock::new(),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let sender = ChannelSender {
            tx,
            shared: shared.clone(),
        };

        let (reader, writer) = tokio::io::split(stream);
        tokio::spawn(read_loop(reader, handler, sender.clone()));
        tokio::spawn(write_loop(writer, rx, shared.clone()));

        Self { sender, shared }
    }

    pub fn sender(&self) -> ChannelSender {
        self.sender.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.token.is_cancelled()
    }

    /// Tear the channel down immediately, unblocking any pending read.
    pub fn abort(&self) {
        self.shared.finish(CloseReason::Aborted);
    }

    /// Wait until the channel has ended.
    pub async fn closed(&self) -> CloseReason {
        self.shared.token.cancelled().await;
        self.shared
            .reason
            .get()
            .cloned()
            .unwrap_or(CloseReason::Aborted)
    }
}

impl Drop for MessageChannel {
    fn drop(&mut self) {
        self.abort();
    }
}

async fn read_loop<R>(mut reader: R, handler: Arc<dyn MessageHandler>, sender: ChannelSender)
where
    R: AsyncRead + Unpin,
{
    let shared = sender.shared.clone();

    loop {
        let frame = tokio::select! {
            _ = shared.token.cancelled() => break,
            frame = read_frame(&mut reader) => frame,
        };

        let message = match frame {
            Ok(Some(message)) => message,
            Ok(None) => {
                shared.finish(CloseReason::Faulted("connection closed by peer".to_string()));
                break;
            }
            Err(e) => {
                shared.finish(CloseReason::Faulted(e.to_string()));
                break;
            }
        };

        if !message.is_status_check() {
            log::debug!("Received message -> {}", message.kind());
        }
        let disconnect = matches!(message, NetworkMessage::Disconnect);

        tokio::select! {
            _ = shared.token.cancelled() => break,
            _ = handler.handle(message, &sender) => {}
        }

        if disconnect {
            shared.finish(CloseReason::Graceful);
            break;
        }
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<NetworkMessage>,
    shared: Arc<Shared>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let message = tokio::select! {
            _ = shared.token.cancelled() => break,
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        if !message.is_status_check() {
            log::debug!("Sending message -> {}", message.kind());
        }

        if let Err(e) = write_frame(&mut writer, &message).await {
            shared.finish(CloseReason::Faulted(e.to_string()));
            break;
        }

        if matches!(message, NetworkMessage::Disconnect) {
            shared.finish(CloseReason::Graceful);
            break;
        }
    }

    let _ = writer.shutdown().await;
}
