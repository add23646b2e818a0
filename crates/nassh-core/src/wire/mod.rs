//! JSON wire protocol spoken with plugin processes.
//!
//! Every message in either direction is a `{"name": ..., "arguments": [...]}`
//! object. Names and argument order are fixed by the plugin binaries and must
//! not change.

mod parser;
mod types;

pub use parser::{decode_data, encode, encode_data, parse_line, parse_value};
pub use types::*;
