//! Socket relay for plugin `openSocket` requests.
//!
//! The plugin cannot open network sockets itself. When a relay is configured
//! the host dials on its behalf and shuttles bytes in both directions.

mod tcp;

pub use tcp::TcpRelay;

use async_trait::async_trait;
use nassh_core::wire::StreamId;
use tokio::io::{AsyncRead, AsyncWrite};

/// A byte pipe to a remote host, opened by a [`Relay`].
pub struct RelayConnection {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
}

impl RelayConnection {
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

/// Network proxy used when the plugin asks for a socket.
#[async_trait]
pub trait Relay: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> Result<RelayConnection, RelayError>;

    /// Relay name for logs.
    fn name(&self) -> &'static str;
}

/// Notifications produced by open relay sockets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// Bytes arrived from the remote end.
    Data {
        stream_id: StreamId,
        fd: i32,
        data: Vec<u8>,
    },
    /// The remote end went away.
    Closed { stream_id: StreamId, reason: String },
}

/// Errors from relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Failed to connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },
}
