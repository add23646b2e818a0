//! Message bridge between one plugin process and the host.
//!
//! A [`SessionChannel`] owns the session's [`StreamRegistry`] and is driven
//! by a single task, so every registry mutation is serialized and requests
//! for the same stream are answered in the order they were issued.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use nassh_core::wire::{
    self, DEFAULT_WRITE_WINDOW, InboundMessage, OPEN_FAILED, OutboundMessage, STDERR, STDIN,
    STDOUT, SessionArgs, StreamId,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::plugin::PluginEvent;
use crate::relay::{Relay, RelayEvent};
use crate::stream::{RelayTarget, StreamKind, StreamRegistry};
use crate::terminal::{TerminalInput, TerminalSink, TerminalSize};

/// Maps an `openFile` path to the kind of stream that serves it.
pub type PathResolver = Arc<dyn Fn(&str) -> Option<StreamKind> + Send + Sync>;

/// Exit code used when the plugin goes away without saying goodbye.
pub const CRASH_EXIT_CODE: i32 = -1;

/// Per-session parameters for a [`SessionChannel`].
#[derive(Clone)]
pub struct ChannelOptions {
    pub arguments: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub terminal_size: TerminalSize,
    pub write_window: u32,
    /// Without a resolver every `openFile` fails.
    pub path_resolver: Option<PathResolver>,
    /// Without a relay every `openSocket` fails.
    pub relay: Option<Arc<dyn Relay>>,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            arguments: Vec::new(),
            environment: BTreeMap::new(),
            terminal_size: TerminalSize::default(),
            write_window: DEFAULT_WRITE_WINDOW,
            path_resolver: None,
            relay: None,
        }
    }
}

impl fmt::Debug for ChannelOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelOptions")
            .field("arguments", &self.arguments)
            .field("environment", &self.environment)
            .field("terminal_size", &self.terminal_size)
            .field("write_window", &self.write_window)
            .field("path_resolver", &self.path_resolver.is_some())
            .field("relay", &self.relay.as_ref().map(|r| r.name()))
            .finish()
    }
}

/// Host side of the plugin message protocol.
pub struct SessionChannel {
    registry: StreamRegistry,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    terminal: Arc<dyn TerminalSink>,
    options: ChannelOptions,
    relay_tx: mpsc::UnboundedSender<RelayEvent>,
    relay_rx: mpsc::UnboundedReceiver<RelayEvent>,
    stdout_acked: u64,
    stderr_acked: u64,
    exited: bool,
    exit_code: Option<i32>,
}

impl SessionChannel {
    pub fn new(
        outbound: mpsc::UnboundedSender<OutboundMessage>,
        terminal: Arc<dyn TerminalSink>,
        options: ChannelOptions,
    ) -> Self {
        let mut registry = StreamRegistry::new();
        let notify = outbound.clone();
        registry.set_on_close(move |id, reason| {
            let msg = OutboundMessage::OnClose {
                id,
                reason: reason.to_string(),
            };
            if notify.send(msg).is_err() {
                debug!(stream_id = id, "Plugin gone, dropping onClose");
            }
        });

        let (relay_tx, relay_rx) = mpsc::unbounded_channel();
        Self {
            registry,
            outbound,
            terminal,
            options,
            relay_tx,
            relay_rx,
            stdout_acked: 0,
            stderr_acked: 0,
            exited: false,
            exit_code: None,
        }
    }

    /// Send `startSession` with the session arguments.
    pub fn start_session(&self) {
        let args = SessionArgs {
            terminal_width: self.options.terminal_size.width,
            terminal_height: self.options.terminal_size.height,
            use_js_socket: self.options.relay.is_some(),
            environment: self.options.environment.clone(),
            write_window: self.options.write_window,
            arguments: self.options.arguments.clone(),
        };
        info!(
            width = args.terminal_width,
            height = args.terminal_height,
            use_js_socket = args.use_js_socket,
            "Starting plugin session"
        );
        self.send(OutboundMessage::StartSession(args));
    }

    /// Drive the session until the exit path is taken. Returns the exit code.
    pub async fn run(
        mut self,
        events: &mut mpsc::Receiver<PluginEvent>,
        input: &mut mpsc::Receiver<TerminalInput>,
    ) -> i32 {
        self.start_session();

        let mut input_open = true;
        while !self.exited {
            tokio::select! {
                event = events.recv() => match event {
                    Some(PluginEvent::Message(msg)) => self.handle_message(msg).await,
                    Some(PluginEvent::Exited(code)) => {
                        warn!(?code, "Plugin exited without an exit message");
                        self.exit(CRASH_EXIT_CODE);
                    }
                    None => {
                        warn!("Plugin event stream closed");
                        self.exit(CRASH_EXIT_CODE);
                    }
                },
                Some(event) = self.relay_rx.recv() => self.handle_relay_event(event),
                item = input.recv(), if input_open => match item {
                    Some(item) => self.handle_input(item),
                    None => {
                        debug!("Terminal input closed");
                        input_open = false;
                    }
                },
            }
        }

        self.exit_code.unwrap_or(CRASH_EXIT_CODE)
    }

    /// Dispatch one plugin request.
    pub async fn handle_message(&mut self, msg: InboundMessage) {
        if self.exited {
            debug!(name = msg.name(), "Ignoring plugin message after exit");
            return;
        }

        match msg {
            InboundMessage::OpenFile { fd, path, mode } => self.open_file(fd, &path, mode).await,
            InboundMessage::OpenSocket { fd, host, port } => {
                self.open_socket(fd, &host, port).await;
            }
            InboundMessage::Write { id, data } => self.write(id, &data).await,
            InboundMessage::Read { id, size } => self.read(id, size).await,
            InboundMessage::Close { id } => self.close(id),
            InboundMessage::Exit { code } => {
                info!(code, "Plugin exit");
                self.exit(code);
            }
            InboundMessage::PrintLog { text } => info!(target: "nassh::plugin", "{}", text),
            InboundMessage::Unknown { name, arguments } => {
                warn!(name = %name, args = arguments.len(), "Unknown plugin message");
            }
        }
    }

    /// Forward terminal input to the plugin.
    pub fn handle_input(&self, input: TerminalInput) {
        match input {
            TerminalInput::Keystrokes(bytes) => self.send(OutboundMessage::OnRead {
                id: STDIN,
                data: wire::encode_data(&bytes),
            }),
            TerminalInput::Resize(size) => self.send(OutboundMessage::OnResize {
                width: size.width,
                height: size.height,
            }),
        }
    }

    /// Deliver a notification from an open relay socket.
    pub fn handle_relay_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Data {
                stream_id,
                fd,
                data,
            } => {
                if !self.registry.contains(stream_id) {
                    debug!(stream_id, fd, "Dropping data for closed stream");
                    return;
                }
                self.send(OutboundMessage::OnRead {
                    id: fd,
                    data: wire::encode_data(&data),
                });
            }
            RelayEvent::Closed { stream_id, reason } => {
                if self.registry.close(stream_id, Some(&reason)) {
                    debug!(stream_id, reason = %reason, "Relay socket closed by remote");
                }
            }
        }
    }

    /// Take the exit path. Only the first call has any effect.
    pub fn exit(&mut self, code: i32) -> bool {
        if self.exited {
            return false;
        }
        self.exited = true;
        self.exit_code = Some(code);

        // The plugin is done listening; close streams without notifying it.
        self.registry.clear_on_close();
        self.registry.close_all("session ended");
        true
    }

    pub const fn has_exited(&self) -> bool {
        self.exited
    }

    pub const fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub const fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    /// Cumulative bytes acknowledged on a terminal id.
    pub const fn acknowledged(&self, id: StreamId) -> u64 {
        match id {
            STDOUT => self.stdout_acked,
            STDERR => self.stderr_acked,
            _ => 0,
        }
    }

    fn send(&self, msg: OutboundMessage) {
        if self.exited {
            debug!(name = msg.name(), "Session exited, not sending");
            return;
        }
        if self.outbound.send(msg).is_err() {
            debug!("Plugin outbound channel closed");
        }
    }

    async fn open_file(&mut self, fd: i32, path: &str, mode: i64) {
        let kind = self
            .options
            .path_resolver
            .as_ref()
            .and_then(|resolve| resolve(path));

        let stream_id = match kind {
            Some(kind) => match self.registry.open(kind, path).await {
                Ok(id) => id,
                Err(e) => {
                    warn!(fd, path, error = %e, "openFile failed");
                    OPEN_FAILED
                }
            },
            None => {
                debug!(fd, path, mode, "No stream serves this path");
                OPEN_FAILED
            }
        };
        self.send(OutboundMessage::OnOpenFile { fd, stream_id });
    }

    async fn open_socket(&mut self, fd: i32, host: &str, port: u16) {
        let Some(relay) = self.options.relay.clone() else {
            debug!(fd, host, port, "No relay configured, refusing socket");
            self.send(OutboundMessage::OnOpenSocket {
                fd,
                stream_id: OPEN_FAILED,
            });
            return;
        };

        let target = RelayTarget {
            relay,
            fd,
            host: host.to_string(),
            port,
            events: self.relay_tx.clone(),
        };
        let path = format!("{host}:{port}");
        let stream_id = match self.registry.open(StreamKind::Relay(target), &path).await {
            Ok(id) => id,
            Err(e) => {
                warn!(fd, host, port, error = %e, "openSocket failed");
                OPEN_FAILED
            }
        };
        self.send(OutboundMessage::OnOpenSocket { fd, stream_id });
    }

    async fn write(&mut self, id: StreamId, data: &str) {
        let bytes = match wire::decode_data(data) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(stream_id = id, error = %e, "Undecodable write payload");
                return;
            }
        };

        if id == STDOUT || id == STDERR {
            self.terminal.write(&bytes);
            let counter = if id == STDOUT {
                &mut self.stdout_acked
            } else {
                &mut self.stderr_acked
            };
            *counter += bytes.len() as u64;
            let count = *counter;
            // The acknowledgement goes out after the terminal had a chance to
            // render, which is what throttles the plugin.
            tokio::task::yield_now().await;
            self.send(OutboundMessage::OnWriteAcknowledge { id, count });
            return;
        }

        let Some(stream) = self.registry.get_mut(id) else {
            warn!(stream_id = id, "Write to unknown stream");
            return;
        };
        match stream.write(&bytes).await {
            Ok(count) => self.send(OutboundMessage::OnWriteAcknowledge { id, count }),
            Err(e) => warn!(stream_id = id, error = %e, "Stream write failed"),
        }
    }

    async fn read(&mut self, id: StreamId, size: usize) {
        let Some(stream) = self.registry.get_mut(id) else {
            // The plugin polls stdin through read(0); keystrokes arrive unprompted.
            if id != STDIN {
                warn!(stream_id = id, "Read from unknown stream");
            }
            return;
        };
        match stream.read(size).await {
            Ok(bytes) => self.send(OutboundMessage::OnRead {
                id,
                data: wire::encode_data(&bytes),
            }),
            Err(e) => warn!(stream_id = id, error = %e, "Stream read failed"),
        }
    }

    fn close(&mut self, id: StreamId) {
        if !self.registry.contains(id) {
            warn!(stream_id = id, "Close of unknown stream");
            return;
        }
        self.registry.close(id, None);
    }
}
