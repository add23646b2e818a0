//! Direct TCP relay.

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

use super::{Relay, RelayConnection, RelayError};

/// Dials the requested host directly from the host process.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpRelay;

impl TcpRelay {
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Relay for TcpRelay {
    async fn connect(&self, host: &str, port: u16) -> Result<RelayConnection, RelayError> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| RelayError::Connect {
                host: host.to_string(),
                port,
                reason: e.to_string(),
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(host, port, error = %e, "Failed to set TCP_NODELAY");
        }
        let (reader, writer) = stream.into_split();
        debug!(host, port, "Relay connected");
        Ok(RelayConnection::new(reader, writer))
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}
