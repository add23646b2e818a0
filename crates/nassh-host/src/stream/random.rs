//! The `/dev/random` stream.

use async_trait::async_trait;
use nassh_core::wire::StreamId;
use rand::RngCore;
use rand::rngs::OsRng;

use super::{MAX_READ_SIZE, Stream, StreamError, StreamState};

/// Returns random bytes from the OS CSPRNG when read. Not writable.
#[derive(Debug)]
pub struct RandomSource {
    state: StreamState,
}

impl RandomSource {
    pub fn new(id: StreamId, path: &str) -> Self {
        Self {
            state: StreamState::new(id, path),
        }
    }
}

#[async_trait]
impl Stream for RandomSource {
    fn state(&self) -> &StreamState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut StreamState {
        &mut self.state
    }

    async fn open(&mut self, path: &str) -> bool {
        self.state.path = path.to_string();
        tokio::task::yield_now().await;
        true
    }

    async fn read(&mut self, max_bytes: usize) -> Result<Vec<u8>, StreamError> {
        if !self.state.open {
            return Err(StreamError::StreamClosed);
        }
        let mut bytes = vec![0u8; max_bytes.min(MAX_READ_SIZE)];
        OsRng.fill_bytes(&mut bytes);
        tokio::task::yield_now().await;
        Ok(bytes)
    }
}
