//! Virtual files served to the plugin.
//!
//! The plugin has no file or socket access of its own. Each `openFile` or
//! `openSocket` request becomes a [`Stream`] owned by the session's
//! [`StreamRegistry`], addressed by a [`StreamId`] on the wire.

mod pipe;
mod random;
mod registry;
mod relay_socket;

pub use pipe::{BufferedPipe, PipeBuffer};
pub use random::RandomSource;
pub use registry::{CloseHook, StreamRegistry};
pub use relay_socket::{RelaySocket, RelayTarget};

use async_trait::async_trait;
use nassh_core::wire::StreamId;

/// Path of the random device the plugin seeds itself from.
pub const DEV_RANDOM: &str = "/dev/random";
/// Non-blocking alias of [`DEV_RANDOM`].
pub const DEV_URANDOM: &str = "/dev/urandom";
/// Pipe the ssh plugin writes its stdout to during a mosh bootstrap.
pub const MOSH_PIPE: &str = "/dev/js/ssh_mosh_pipe";
/// Largest single read served to the plugin; bigger requests are truncated.
pub const MAX_READ_SIZE: usize = 64 * 1024;

/// Errors from stream operations.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Not implemented")]
    NotImplemented,

    #[error("Stream closed")]
    StreamClosed,

    #[error("Stream {id} is still open")]
    StillOpen { id: StreamId },

    #[error("Failed to open {path}")]
    OpenFailed { path: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bookkeeping shared by every stream variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamState {
    pub id: StreamId,
    pub path: String,
    pub open: bool,
}

impl StreamState {
    pub fn new(id: StreamId, path: &str) -> Self {
        Self {
            id,
            path: path.to_string(),
            open: false,
        }
    }
}

/// One virtual file the plugin has open.
///
/// Reads and writes work on raw bytes; base64 transport encoding is handled
/// by the channel.
#[async_trait]
pub trait Stream: Send {
    fn state(&self) -> &StreamState;

    fn state_mut(&mut self) -> &mut StreamState;

    fn id(&self) -> StreamId {
        self.state().id
    }

    fn path(&self) -> &str {
        &self.state().path
    }

    fn is_open(&self) -> bool {
        self.state().open
    }

    /// Open the stream. Always suspends at least once before completing.
    async fn open(&mut self, _path: &str) -> bool {
        tokio::task::yield_now().await;
        false
    }

    async fn read(&mut self, _max_bytes: usize) -> Result<Vec<u8>, StreamError> {
        Err(StreamError::NotImplemented)
    }

    /// Returns the acknowledgement count reported back to the plugin.
    async fn write(&mut self, _data: &[u8]) -> Result<u64, StreamError> {
        Err(StreamError::NotImplemented)
    }

    /// Variant-specific cleanup, run once when the stream closes.
    fn release(&mut self) {}

    /// Mark the stream closed. Returns `false` if it was not open.
    fn close(&mut self) -> bool {
        if !self.is_open() {
            return false;
        }
        self.state_mut().open = false;
        self.release();
        true
    }
}

/// Variant tag used to construct streams.
#[derive(Debug, Clone)]
pub enum StreamKind {
    Random,
    Pipe(PipeBuffer),
    Relay(RelayTarget),
}

impl StreamKind {
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::Pipe(_) => "pipe",
            Self::Relay(_) => "relay",
        }
    }

    pub(crate) fn build(self, id: StreamId, path: &str) -> Box<dyn Stream> {
        match self {
            Self::Random => Box::new(RandomSource::new(id, path)),
            Self::Pipe(buffer) => Box::new(BufferedPipe::new(id, path, buffer)),
            Self::Relay(target) => Box::new(RelaySocket::new(id, path, target)),
        }
    }
}
