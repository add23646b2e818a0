//! In-memory pipe used to capture plugin output.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use nassh_core::wire::StreamId;

use super::{Stream, StreamError, StreamState};

/// Shared accumulator behind a [`BufferedPipe`].
///
/// Cloning yields another handle to the same bytes, so the session owner can
/// inspect what the plugin wrote after the stream is gone.
#[derive(Debug, Clone, Default)]
pub struct PipeBuffer(Arc<Mutex<Vec<u8>>>);

impl PipeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and return the total buffered length.
    pub fn append(&self, data: &[u8]) -> u64 {
        let mut buf = self.lock();
        buf.extend_from_slice(data);
        buf.len() as u64
    }

    pub fn contents(&self) -> Vec<u8> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Write-only stream that appends into a [`PipeBuffer`].
#[derive(Debug)]
pub struct BufferedPipe {
    state: StreamState,
    buffer: PipeBuffer,
}

impl BufferedPipe {
    pub fn new(id: StreamId, path: &str, buffer: PipeBuffer) -> Self {
        Self {
            state: StreamState::new(id, path),
            buffer,
        }
    }
}

#[async_trait]
impl Stream for BufferedPipe {
    fn state(&self) -> &StreamState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut StreamState {
        &mut self.state
    }

    async fn open(&mut self, _path: &str) -> bool {
        tokio::task::yield_now().await;
        true
    }

    /// Acknowledges with the cumulative buffered length.
    async fn write(&mut self, data: &[u8]) -> Result<u64, StreamError> {
        if !self.state.open {
            return Err(StreamError::StreamClosed);
        }
        let total = self.buffer.append(data);
        tokio::task::yield_now().await;
        Ok(total)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_accumulate_in_order() {
        let buffer = PipeBuffer::new();
        let mut pipe = BufferedPipe::new(3, "/dev/js/ssh_mosh_pipe", buffer.clone());
        assert!(pipe.open("/dev/js/ssh_mosh_pipe").await);
        pipe.state_mut().open = true;

        assert_eq!(pipe.write(b"MOSH IP ").await.unwrap(), 8);
        assert_eq!(pipe.write(b"10.0.0.5\n").await.unwrap(), 17);
        assert_eq!(buffer.contents(), b"MOSH IP 10.0.0.5\n");
    }

    #[tokio::test]
    async fn read_is_not_implemented() {
        let mut pipe = BufferedPipe::new(3, "/dev/js/ssh_mosh_pipe", PipeBuffer::new());
        pipe.open("").await;
        pipe.state_mut().open = true;
        assert!(matches!(
            pipe.read(16).await,
            Err(StreamError::NotImplemented)
        ));
    }

    #[tokio::test]
    async fn write_after_close_fails() {
        let buffer = PipeBuffer::new();
        let mut pipe = BufferedPipe::new(3, "/dev/js/ssh_mosh_pipe", buffer.clone());
        pipe.state_mut().open = true;
        assert!(pipe.close());
        assert!(matches!(
            pipe.write(b"late").await,
            Err(StreamError::StreamClosed)
        ));
        assert!(buffer.is_empty());
    }
}
