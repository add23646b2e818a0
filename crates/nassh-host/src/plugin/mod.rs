//! Plugin processes and the transport to them.
//!
//! A plugin is an ssh or mosh client that speaks the JSON wire protocol.
//! [`PluginHost`] starts one and hands back a [`PluginConnection`].

mod process;
mod types;

pub use process::ProcessPluginHost;
pub use types::*;
