//! Plugin processes spawned as child processes.
//!
//! Outbound messages are written to the child's stdin as JSON lines; its
//! stdout carries inbound messages the same way. stderr is diagnostics only.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use nassh_core::config::PluginConfig;
use nassh_core::wire::{self, OutboundMessage};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::types::{PluginConnection, PluginError, PluginEvent, PluginHost, PluginProgram};

const EVENT_CAPACITY: usize = 128;

/// Spawns the configured ssh/mosh client binaries.
#[derive(Debug, Clone)]
pub struct ProcessPluginHost {
    ssh_client: PathBuf,
    mosh_client: PathBuf,
    /// Arguments placed on the child command line, before any protocol traffic.
    extra_args: Vec<String>,
}

impl ProcessPluginHost {
    pub fn new(config: &PluginConfig) -> Self {
        Self {
            ssh_client: config.ssh_client.clone(),
            mosh_client: config.mosh_client.clone(),
            extra_args: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    fn binary(&self, program: PluginProgram) -> &PathBuf {
        match program {
            PluginProgram::Ssh => &self.ssh_client,
            PluginProgram::Mosh => &self.mosh_client,
        }
    }
}

#[async_trait]
impl PluginHost for ProcessPluginHost {
    async fn launch(&self, program: PluginProgram) -> Result<PluginConnection, PluginError> {
        let binary = self.binary(program);
        if binary.as_os_str().is_empty() {
            return Err(PluginError::Unavailable { program });
        }

        let mut cmd = Command::new(binary);
        cmd.args(&self.extra_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(%program, binary = %binary.display(), "Spawning plugin process");
        let mut child = cmd.spawn().map_err(|e| PluginError::SpawnFailed {
            program,
            reason: e.to_string(),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| PluginError::SpawnFailed {
            program,
            reason: "Failed to capture stdin".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| PluginError::SpawnFailed {
            program,
            reason: "Failed to capture stdout".to_string(),
        })?;

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundMessage>();
        let (events_tx, events_rx) = mpsc::channel::<PluginEvent>(EVENT_CAPACITY);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        // stdin writer
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = outbound_rx.recv().await {
                let line = match wire::encode(&msg) {
                    Ok(line) => line,
                    Err(e) => {
                        error!(name = msg.name(), error = %e, "Failed to encode plugin message");
                        continue;
                    }
                };
                if let Err(e) = stdin.write_all(line.as_bytes()).await {
                    debug!("Plugin stdin closed: {}", e);
                    break;
                }
                if let Err(e) = stdin.write_all(b"\n").await {
                    debug!("Plugin stdin closed: {}", e);
                    break;
                }
                if let Err(e) = stdin.flush().await {
                    debug!("Failed to flush plugin stdin: {}", e);
                    break;
                }
            }
        });

        // stdout reader
        let reader_tx = events_tx.clone();
        let mut reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                match wire::parse_line(&line) {
                    Ok(msg) => {
                        if reader_tx.send(PluginEvent::Message(msg)).await.is_err() {
                            debug!(%program, "Plugin event channel closed");
                            break;
                        }
                    }
                    Err(e) => warn!(%program, error = %e, "Malformed plugin message"),
                }
            }
            debug!(%program, "Plugin stdout reader finished");
        });

        // stderr diagnostics
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(%program, "stderr: {}", line);
                }
            });
        }

        // Exit watcher. Runs after stdout drains so `exit` messages are never
        // overtaken by the process-ended event.
        tokio::spawn(async move {
            tokio::select! {
                _ = &mut reader => {}
                _ = kill_rx => {
                    debug!(%program, "Terminating plugin process");
                    if let Err(e) = child.start_kill() {
                        debug!(%program, error = %e, "Plugin already gone");
                    }
                    reader.abort();
                }
            }
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(%program, error = %e, "Error waiting for plugin process");
                    None
                }
            };
            info!(%program, ?code, "Plugin process exited");
            let _ = events_tx.send(PluginEvent::Exited(code)).await;
        });

        Ok(PluginConnection::new(outbound_tx, events_rx).with_kill_switch(kill_tx))
    }
}
