//! Plugin module types.

use std::fmt;

use async_trait::async_trait;
use nassh_core::wire::{InboundMessage, OutboundMessage};
use tokio::sync::{mpsc, oneshot};

/// Which plugin binary to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginProgram {
    Ssh,
    Mosh,
}

impl fmt::Display for PluginProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ssh => f.write_str("ssh_client"),
            Self::Mosh => f.write_str("mosh_client"),
        }
    }
}

/// Events delivered from a running plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginEvent {
    Message(InboundMessage),
    /// The plugin process is gone. `None` when it was killed by a signal.
    Exited(Option<i32>),
}

/// Attachment to one running plugin.
///
/// Dropping the connection terminates the plugin.
pub struct PluginConnection {
    pub outbound: mpsc::UnboundedSender<OutboundMessage>,
    pub events: mpsc::Receiver<PluginEvent>,
    kill: Option<oneshot::Sender<()>>,
}

impl PluginConnection {
    pub const fn new(
        outbound: mpsc::UnboundedSender<OutboundMessage>,
        events: mpsc::Receiver<PluginEvent>,
    ) -> Self {
        Self {
            outbound,
            events,
            kill: None,
        }
    }

    /// Attach a signal that is fired on [`PluginConnection::terminate`].
    #[must_use]
    pub fn with_kill_switch(mut self, kill: oneshot::Sender<()>) -> Self {
        self.kill = Some(kill);
        self
    }

    /// Ask the plugin to stop. Safe to call more than once.
    pub fn terminate(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }
}

impl Drop for PluginConnection {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Launches plugin processes.
#[async_trait]
pub trait PluginHost: Send + Sync {
    async fn launch(&self, program: PluginProgram) -> Result<PluginConnection, PluginError>;
}

/// Errors from plugin operations.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("Failed to spawn {program}: {reason}")]
    SpawnFailed {
        program: PluginProgram,
        reason: String,
    },

    #[error("No plugin available for {program}")]
    Unavailable { program: PluginProgram },
}
