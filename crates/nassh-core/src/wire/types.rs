//! Message types for the plugin wire protocol.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Identifier of a virtual file descriptor multiplexed over the channel.
pub type StreamId = i32;

/// Terminal input, as seen by the plugin.
pub const STDIN: StreamId = 0;
/// Terminal output.
pub const STDOUT: StreamId = 1;
/// Terminal error output.
pub const STDERR: StreamId = 2;
/// First id handed out to streams opened on behalf of the plugin.
pub const FIRST_STREAM_ID: StreamId = 3;
/// Sentinel reported in `onOpenFile`/`onOpenSocket` when an open fails.
pub const OPEN_FAILED: StreamId = -1;

/// Number of unacknowledged terminal bytes the plugin may have in flight.
pub const DEFAULT_WRITE_WINDOW: u32 = 8 * 1024;

/// Argument object sent with `startSession`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionArgs {
    pub terminal_width: u16,
    pub terminal_height: u16,
    /// Whether sockets are proxied through the host (`openSocket`).
    pub use_js_socket: bool,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    pub write_window: u32,
    #[serde(default)]
    pub arguments: Vec<String>,
}

/// Requests sent by the plugin to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    OpenFile {
        fd: i32,
        path: String,
        mode: i64,
    },
    OpenSocket {
        fd: i32,
        host: String,
        port: u16,
    },
    /// `data` is base64.
    Write {
        id: StreamId,
        data: String,
    },
    Read {
        id: StreamId,
        size: usize,
    },
    Close {
        id: StreamId,
    },
    Exit {
        code: i32,
    },
    PrintLog {
        text: String,
    },
    Unknown {
        name: String,
        arguments: Vec<Value>,
    },
}

impl InboundMessage {
    /// Wire name of the message.
    pub fn name(&self) -> &str {
        match self {
            Self::OpenFile { .. } => "openFile",
            Self::OpenSocket { .. } => "openSocket",
            Self::Write { .. } => "write",
            Self::Read { .. } => "read",
            Self::Close { .. } => "close",
            Self::Exit { .. } => "exit",
            Self::PrintLog { .. } => "printLog",
            Self::Unknown { name, .. } => name,
        }
    }

    /// Positional arguments, in wire order.
    pub fn arguments(&self) -> Vec<Value> {
        match self {
            Self::OpenFile { fd, path, mode } => vec![json!(fd), json!(path), json!(mode)],
            Self::OpenSocket { fd, host, port } => vec![json!(fd), json!(host), json!(port)],
            Self::Write { id, data } => vec![json!(id), json!(data)],
            Self::Read { id, size } => vec![json!(id), json!(size)],
            Self::Close { id } => vec![json!(id)],
            Self::Exit { code } => vec![json!(code)],
            Self::PrintLog { text } => vec![json!(text)],
            Self::Unknown { arguments, .. } => arguments.clone(),
        }
    }
}

/// Replies and notifications sent by the host to the plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    StartSession(SessionArgs),
    /// `data` is base64.
    OnRead {
        id: StreamId,
        data: String,
    },
    /// `count` is cumulative for the terminal ids 1 and 2.
    OnWriteAcknowledge {
        id: StreamId,
        count: u64,
    },
    OnResize {
        width: u16,
        height: u16,
    },
    OnClose {
        id: StreamId,
        reason: String,
    },
    OnOpenFile {
        fd: i32,
        stream_id: StreamId,
    },
    OnOpenSocket {
        fd: i32,
        stream_id: StreamId,
    },
}

impl OutboundMessage {
    /// Wire name of the message.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::StartSession(_) => "startSession",
            Self::OnRead { .. } => "onRead",
            Self::OnWriteAcknowledge { .. } => "onWriteAcknowledge",
            Self::OnResize { .. } => "onResize",
            Self::OnClose { .. } => "onClose",
            Self::OnOpenFile { .. } => "onOpenFile",
            Self::OnOpenSocket { .. } => "onOpenSocket",
        }
    }

    /// Positional arguments, in wire order.
    pub fn arguments(&self) -> Vec<Value> {
        match self {
            Self::StartSession(args) => vec![json!(args)],
            Self::OnRead { id, data } => vec![json!(id), json!(data)],
            Self::OnWriteAcknowledge { id, count } => vec![json!(id), json!(count)],
            Self::OnResize { width, height } => vec![json!(width), json!(height)],
            Self::OnClose { id, reason } => vec![json!(id), json!(reason)],
            Self::OnOpenFile { fd, stream_id } | Self::OnOpenSocket { fd, stream_id } => {
                vec![json!(fd), json!(stream_id)]
            }
        }
    }

    /// The `{name, arguments}` envelope.
    pub fn to_value(&self) -> Value {
        json!({ "name": self.name(), "arguments": self.arguments() })
    }
}
