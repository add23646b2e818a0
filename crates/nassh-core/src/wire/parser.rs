//! Parser and encoder for plugin messages.
//!
//! Implements tolerant reader pattern: unknown names are returned as
//! [`InboundMessage::Unknown`], a missing `arguments` array reads as empty and
//! extra trailing arguments are ignored.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;

use super::types::*;
use crate::error::{Error, Result};

/// Parse a single JSON line received from a plugin.
pub fn parse_line(line: &str) -> Result<InboundMessage> {
    let raw: Value = serde_json::from_str(line)?;
    parse_value(&raw)
}

/// Parse a JSON value into an inbound message.
pub fn parse_value(raw: &Value) -> Result<InboundMessage> {
    let name = raw
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::WireParse("Missing 'name' field".into()))?;

    let empty = Vec::new();
    let args = raw
        .get("arguments")
        .and_then(|v| v.as_array())
        .unwrap_or(&empty);

    match name {
        "openFile" => Ok(InboundMessage::OpenFile {
            fd: i32_arg(args, 0, name)?,
            path: str_arg(args, 1, name)?,
            mode: int_arg(args, 2, name).unwrap_or(0),
        }),
        "openSocket" => Ok(InboundMessage::OpenSocket {
            fd: i32_arg(args, 0, name)?,
            host: str_arg(args, 1, name)?,
            port: u16::try_from(int_arg(args, 2, name)?)
                .map_err(|_| Error::WireParse(format!("{name}: port out of range")))?,
        }),
        "write" => Ok(InboundMessage::Write {
            id: i32_arg(args, 0, name)?,
            data: str_arg(args, 1, name)?,
        }),
        "read" => Ok(InboundMessage::Read {
            id: i32_arg(args, 0, name)?,
            size: usize::try_from(int_arg(args, 1, name)?)
                .map_err(|_| Error::WireParse(format!("{name}: negative size")))?,
        }),
        "close" => Ok(InboundMessage::Close {
            id: i32_arg(args, 0, name)?,
        }),
        "exit" => Ok(InboundMessage::Exit {
            code: i32_arg(args, 0, name)?,
        }),
        "printLog" => Ok(InboundMessage::PrintLog {
            text: str_arg(args, 0, name)?,
        }),
        _ => Ok(InboundMessage::Unknown {
            name: name.to_string(),
            arguments: args.clone(),
        }),
    }
}

/// Encode an outbound message as a single JSON line (without the newline).
pub fn encode(msg: &OutboundMessage) -> Result<String> {
    Ok(serde_json::to_string(&msg.to_value())?)
}

/// Encode raw bytes for an `onRead` payload.
pub fn encode_data(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode the base64 payload of a `write` request.
pub fn decode_data(data: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(data)
        .map_err(|e| Error::WireParse(format!("Invalid base64 payload: {e}")))
}

fn int_arg(args: &[Value], index: usize, name: &str) -> Result<i64> {
    args.get(index)
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::WireParse(format!("{name}: argument {index} must be an integer")))
}

fn i32_arg(args: &[Value], index: usize, name: &str) -> Result<i32> {
    i32::try_from(int_arg(args, index, name)?)
        .map_err(|_| Error::WireParse(format!("{name}: argument {index} out of range")))
}

fn str_arg(args: &[Value], index: usize, name: &str) -> Result<String> {
    args.get(index)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| Error::WireParse(format!("{name}: argument {index} must be a string")))
}
