//! # Protocol Decoder
//!
//! Classifies a framed line as either a handshake (`ROUTER_ID:<token>`) or a
//! data message. A token longer than `MAX_IDENTIFIER_LEN` characters is not a
//! handshake. Data messages are parsed as JSON; a parse failure still
//! yields a message (flagged invalid) so the caller can log and count it.

use bytes::Bytes;
use serde_json::Value;

use crate::configs::MAX_IDENTIFIER_LEN;

/// Prefix of the identity handshake line.
pub const CONTROL_PREFIX: &[u8] = b"ROUTER_ID:";

/// The downstream path selected by a message's `type` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Flow,
    Stats,
    /// Any other or missing `type`; carries the label for logging.
    Other(String),
}

impl MessageKind {
    pub fn label(&self) -> &str {
        match self {
            MessageKind::Flow => "flow",
            MessageKind::Stats => "stats",
            MessageKind::Other(label) => label,
        }
    }
}

/// A telemetry line after JSON decoding.
#[derive(Debug, Clone)]
pub struct DataMessage {
    /// The trimmed line as received.
    pub raw: Bytes,
    pub kind: MessageKind,
    /// The parsed document, `None` when parsing failed.
    pub body: Option<Value>,
    pub json_valid: bool,
    pub json_error: Option<String>,
}

impl DataMessage {
    /// The `flow` sub-object, if present.
    pub fn flow(&self) -> Option<&Value> {
        self.body.as_ref().and_then(|b| b.get("flow")).filter(|f| f.is_object())
    }

    /// A top-level string field.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.body.as_ref().and_then(|b| b.get(name)).and_then(Value::as_str)
    }
}

/// One decoded line.
#[derive(Debug, Clone)]
pub enum Frame {
    /// A router identity declaration.
    Handshake(String),
    Data(DataMessage),
}

/// Decodes one trimmed, non-empty line.
pub fn decode(line: Bytes) -> Frame {
    if let Some(token) = handshake_token(&line) {
        return Frame::Handshake(token);
    }

    let (body, json_error) = match serde_json::from_slice::<Value>(&line) {
        Ok(value) => (Some(value), None),
        Err(e) => (None, Some(e.to_string())),
    };
    let kind = match body.as_ref().and_then(|b| b.get("type")).and_then(Value::as_str) {
        Some("flow") => MessageKind::Flow,
        Some("stats") => MessageKind::Stats,
        Some(other) => MessageKind::Other(other.to_string()),
        None => MessageKind::Other("other".to_string()),
    };

    Frame::Data(DataMessage {
        raw: line,
        kind,
        json_valid: body.is_some(),
        body,
        json_error,
    })
}

fn handshake_token(line: &[u8]) -> Option<String> {
    let rest = line.strip_prefix(CONTROL_PREFIX)?;
    let token = std::str::from_utf8(rest).ok()?.trim();
    if token.is_empty() || token.chars().count() > MAX_IDENTIFIER_LEN {
        None
    } else {
        Some(token.to_string())
    }
}
