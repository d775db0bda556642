//! Host/worker networking.
//!
//! Length-prefixed JSON frames over TLS. The host side is the
//! [`WorkerListener`] with its [`ClientRegistry`]; the worker side is the
//! [`ConnectionSupervisor`], which keeps one connection to the host alive.

pub mod channel;
pub mod codec;
pub mod listener;
pub mod message;
pub mod registry;
pub mod security;
pub mod supervisor;

use tokio::io::{AsyncRead, AsyncWrite};

pub use channel::{ChannelSender, CloseReason, MessageChannel, MessageHandler};
pub use listener::WorkerListener;
pub use message::NetworkMessage;
pub use registry::ClientRegistry;
pub use security::{HostIdentity, hash_password};
pub use supervisor::{
    ConnectionSupervisor, Connector, SupervisorEvent, SupervisorSettings, SupervisorState,
    TlsHostConnector,
};

/// Any bidirectional byte stream a channel can run over.
pub trait AsyncReadWrite: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncReadWrite for T {}

pub type BoxedStream = Box<dyn AsyncReadWrite>;
