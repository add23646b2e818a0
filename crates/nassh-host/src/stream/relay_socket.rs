//! Plugin socket proxied through a [`Relay`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use nassh_core::wire::StreamId;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{Stream, StreamError, StreamState};
use crate::relay::{Relay, RelayEvent};

const READ_CHUNK: usize = 16 * 1024;

/// Where a relay socket should connect and whom to tell about incoming data.
#[derive(Clone)]
pub struct RelayTarget {
    pub relay: Arc<dyn Relay>,
    /// Plugin-side descriptor; incoming data is delivered as `onRead(fd, ..)`.
    pub fd: i32,
    pub host: String,
    pub port: u16,
    pub events: mpsc::UnboundedSender<RelayEvent>,
}

impl fmt::Debug for RelayTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayTarget")
            .field("relay", &self.relay.name())
            .field("fd", &self.fd)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

/// Socket stream. Reads are pushed as [`RelayEvent::Data`] rather than
/// pulled, so `read` is not implemented.
pub struct RelaySocket {
    state: StreamState,
    target: RelayTarget,
    writer: Option<Box<dyn AsyncWrite + Send + Unpin>>,
    reader_task: Option<JoinHandle<()>>,
    written: u64,
}

impl RelaySocket {
    pub fn new(id: StreamId, path: &str, target: RelayTarget) -> Self {
        Self {
            state: StreamState::new(id, path),
            target,
            writer: None,
            reader_task: None,
            written: 0,
        }
    }
}

#[async_trait]
impl Stream for RelaySocket {
    fn state(&self) -> &StreamState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut StreamState {
        &mut self.state
    }

    async fn open(&mut self, _path: &str) -> bool {
        let target = &self.target;
        let conn = match target.relay.connect(&target.host, target.port).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(
                    stream_id = self.state.id,
                    relay = target.relay.name(),
                    error = %e,
                    "Relay connect failed"
                );
                return false;
            }
        };

        let stream_id = self.state.id;
        let fd = target.fd;
        let events = target.events.clone();
        let mut reader = conn.reader;
        self.reader_task = Some(tokio::spawn(async move {
            let mut buf = vec![0u8; READ_CHUNK];
            let reason = loop {
                match reader.read(&mut buf).await {
                    Ok(0) => break "closed by peer".to_string(),
                    Ok(n) => {
                        let event = RelayEvent::Data {
                            stream_id,
                            fd,
                            data: buf[..n].to_vec(),
                        };
                        if events.send(event).is_err() {
                            debug!(stream_id, "Relay event channel closed");
                            return;
                        }
                    }
                    Err(e) => break e.to_string(),
                }
            };
            let _ = events.send(RelayEvent::Closed { stream_id, reason });
        }));
        self.writer = Some(conn.writer);
        true
    }

    /// Acknowledges with the cumulative number of bytes sent.
    async fn write(&mut self, data: &[u8]) -> Result<u64, StreamError> {
        if !self.state.open {
            return Err(StreamError::StreamClosed);
        }
        let writer = self.writer.as_mut().ok_or(StreamError::StreamClosed)?;
        writer.write_all(data).await?;
        writer.flush().await?;
        self.written += data.len() as u64;
        Ok(self.written)
    }

    fn release(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        self.writer = None;
    }
}

impl Drop for RelaySocket {
    fn drop(&mut self) {
        self.release();
    }
}
