//! Per-session table of open streams.

use std::collections::HashMap;

use nassh_core::wire::{FIRST_STREAM_ID, StreamId};
use tracing::{debug, error};

use super::{Stream, StreamError, StreamKind};

/// Callback invoked with `(id, reason)` whenever a stream finishes closing.
pub type CloseHook = Box<dyn FnMut(StreamId, &str) + Send>;

/// Collection of currently open stream instances.
///
/// Ids 0, 1 and 2 belong to the plugin's terminal stdio and are never
/// allocated here. Ids only move forward; a failed open still consumes its id.
pub struct StreamRegistry {
    next_id: StreamId,
    streams: HashMap<StreamId, Box<dyn Stream>>,
    on_close: Option<CloseHook>,
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self {
            next_id: FIRST_STREAM_ID,
            streams: HashMap::new(),
            on_close: None,
        }
    }

    /// Install the close notification hook.
    pub fn set_on_close(&mut self, hook: impl FnMut(StreamId, &str) + Send + 'static) {
        self.on_close = Some(Box::new(hook));
    }

    pub fn clear_on_close(&mut self) {
        self.on_close = None;
    }

    /// Open a new stream of the given kind.
    pub async fn open(&mut self, kind: StreamKind, path: &str) -> Result<StreamId, StreamError> {
        let id = self.next_id;
        self.next_id += 1;

        let label = kind.label();
        let mut stream = kind.build(id, path);
        if !stream.open(path).await {
            debug!(stream_id = id, path, kind = label, "Stream open failed");
            return Err(StreamError::OpenFailed {
                path: path.to_string(),
            });
        }

        stream.state_mut().open = true;
        self.streams.insert(id, stream);
        debug!(stream_id = id, path, kind = label, "Stream opened");
        Ok(id)
    }

    /// Look up a stream instance.
    pub fn get_mut(&mut self, id: StreamId) -> Option<&mut (dyn Stream + 'static)> {
        self.streams.get_mut(&id).map(AsMut::as_mut)
    }

    pub fn contains(&self, id: StreamId) -> bool {
        self.streams.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Close a stream and deregister it.
    ///
    /// Returns `true` only for the call that deregistered the stream. A
    /// stream closed through [`Stream::close`] directly stays registered
    /// until this runs, and is notified here.
    pub fn close(&mut self, id: StreamId, reason: Option<&str>) -> bool {
        let Some(stream) = self.streams.get_mut(&id) else {
            return false;
        };
        if !stream.close() {
            debug!(stream_id = id, "Stream was already marked closed");
        }
        if let Err(e) = self.remove(id, reason.unwrap_or("closed")) {
            error!(stream_id = id, error = %e, "Failed to deregister stream");
        }
        true
    }

    /// Close every remaining stream, lowest id first.
    pub fn close_all(&mut self, reason: &str) {
        let mut ids: Vec<StreamId> = self.streams.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            self.close(id, Some(reason));
        }
    }

    /// Clean up after a stream is closed.
    fn remove(&mut self, id: StreamId, reason: &str) -> Result<(), StreamError> {
        let Some(stream) = self.streams.get(&id) else {
            return Ok(());
        };
        if stream.is_open() {
            return Err(StreamError::StillOpen { id });
        }

        if let Some(hook) = self.on_close.as_mut() {
            hook(id, reason);
        }
        self.streams.remove(&id);
        debug!(stream_id = id, reason, "Stream removed");
        Ok(())
    }
}
