//! nassh Host Library
//!
//! Runs ssh and mosh plugin processes behind a terminal:
//! - Virtual file descriptors (streams) served to the plugin
//! - JSON message channel with terminal flow control
//! - Plugin process spawning
//! - Socket relay for `openSocket`
//! - ssh → mosh-client session hand-off

pub mod channel;
pub mod destination;
pub mod orchestrator;
pub mod plugin;
pub mod relay;
pub mod stream;
pub mod terminal;
