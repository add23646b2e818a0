//! nassh Core Library
//!
//! Shared functionality for nassh components:
//! - JSON wire protocol spoken with ssh/mosh plugin processes
//! - Configuration resolution and hierarchy
//! - Common error types
//! - Tracing setup

pub mod config;
pub mod error;
pub mod tracing_init;
pub mod wire;

pub use config::Config;
pub use error::{Error, Result};
