//! Terminal collaborator: where plugin output ends up and where keystrokes
//! come from.

use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};

/// Printed before a plugin process is launched.
pub const PLUGIN_LOADING: &str = "Loading NaCl plugin... ";
/// Printed once the plugin is attached.
pub const PLUGIN_LOADING_COMPLETE: &str = "done.";

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    pub width: u16,
    pub height: u16,
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self {
            width: 80,
            height: 24,
        }
    }
}

/// Input from the user's terminal, forwarded to the running plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalInput {
    Keystrokes(Vec<u8>),
    Resize(TerminalSize),
}

/// Display sink for plugin output and session diagnostics.
pub trait TerminalSink: Send + Sync {
    /// Write raw plugin output.
    fn write(&self, data: &[u8]);

    fn print(&self, text: &str) {
        self.write(text.as_bytes());
    }

    fn println(&self, text: &str) {
        self.print(text);
        self.write(b"\r\n");
    }

    fn set_terminal_profile(&self, name: &str);
}

/// Terminal backed by the process stdout.
#[derive(Debug, Default)]
pub struct StdoutTerminal;

impl StdoutTerminal {
    pub const fn new() -> Self {
        Self
    }
}

impl TerminalSink for StdoutTerminal {
    fn write(&self, data: &[u8]) {
        let mut out = std::io::stdout().lock();
        if let Err(e) = out.write_all(data).and_then(|()| out.flush()) {
            warn!(error = %e, "Failed to write to terminal");
        }
    }

    fn set_terminal_profile(&self, name: &str) {
        info!(profile = name, "Terminal profile selected");
    }
}

/// Terminal that records everything written to it.
#[derive(Debug, Default)]
pub struct MemoryTerminal {
    output: Mutex<Vec<u8>>,
    profile: Mutex<Option<String>>,
}

impl MemoryTerminal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&lock(&self.output)).into_owned()
    }

    pub fn bytes(&self) -> Vec<u8> {
        lock(&self.output).clone()
    }

    pub fn profile(&self) -> Option<String> {
        lock(&self.profile).clone()
    }
}

impl TerminalSink for MemoryTerminal {
    fn write(&self, data: &[u8]) {
        lock(&self.output).extend_from_slice(data);
    }

    fn set_terminal_profile(&self, name: &str) {
        *lock(&self.profile) = Some(name.to_string());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
