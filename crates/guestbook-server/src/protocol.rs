//! Hub protocol types.
//!
//! Implements the message format browsers speak on the real-time
//! endpoint: JSON text frames, each terminated by the ASCII record
//! separator (`0x1E`). A connection starts with a handshake, after which
//! the server pushes invocations and periodic pings.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Terminator appended to every frame.
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// The only protocol we speak.
pub const PROTOCOL_NAME: &str = "json";

/// The only protocol version we speak.
pub const PROTOCOL_VERSION: u32 = 1;

const TYPE_INVOCATION: u8 = 1;
const TYPE_PING: u8 = 6;
const TYPE_CLOSE: u8 = 7;

/// Things that can go wrong decoding client frames.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invocation without a target")]
    MissingTarget,

    #[error("protocol '{protocol}' version {version} is not supported")]
    Unsupported { protocol: String, version: u32 },
}

/// First message a client sends after connecting.
#[derive(Debug, Deserialize, Serialize)]
pub struct HandshakeRequest {
    /// Protocol name (always "json" for us).
    pub protocol: String,

    /// Protocol version.
    pub version: u32,
}

impl HandshakeRequest {
    /// Parses and validates a handshake frame.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        let request: Self = serde_json::from_str(frame)?;
        if request.protocol != PROTOCOL_NAME || request.version != PROTOCOL_VERSION {
            return Err(ProtocolError::Unsupported {
                protocol: request.protocol,
                version: request.version,
            });
        }
        Ok(request)
    }
}

/// Server answer to a handshake. Empty on success.
#[derive(Debug, Default, Serialize)]
pub struct HandshakeResponse {
    /// Why the handshake was refused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HandshakeResponse {
    /// Creates a success response.
    pub fn ok() -> Self {
        Self::default()
    }

    /// Creates a refusal.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        Ok(terminate(serde_json::to_string(self)?))
    }
}

/// A message exchanged after the handshake.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// Asks the receiver to run `target` with `arguments`.
    Invocation {
        target: String,
        arguments: Vec<Value>,
    },

    /// Keep-alive.
    Ping,

    /// The sender is closing the connection.
    Close { error: Option<String> },

    /// Any message type we accept but don't act on.
    Other(u8),
}

/// Wire shape shared by all message types.
#[derive(Debug, Serialize, Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: u8,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    arguments: Option<Vec<Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl RawMessage {
    fn of(kind: u8) -> Self {
        Self {
            kind,
            target: None,
            arguments: None,
            error: None,
        }
    }
}

impl HubMessage {
    /// Creates an argument-less invocation of `target`.
    pub fn invocation(target: impl Into<String>) -> Self {
        Self::Invocation {
            target: target.into(),
            arguments: Vec::new(),
        }
    }

    /// Encodes the message as a terminated frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let raw = match self {
            Self::Invocation { target, arguments } => RawMessage {
                target: Some(target.clone()),
                arguments: Some(arguments.clone()),
                ..RawMessage::of(TYPE_INVOCATION)
            },
            Self::Ping => RawMessage::of(TYPE_PING),
            Self::Close { error } => RawMessage {
                error: error.clone(),
                ..RawMessage::of(TYPE_CLOSE)
            },
            Self::Other(kind) => RawMessage::of(*kind),
        };
        Ok(terminate(serde_json::to_string(&raw)?))
    }

    /// Decodes a single frame (without its terminator).
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        let raw: RawMessage = serde_json::from_str(frame)?;
        match raw.kind {
            TYPE_INVOCATION => Ok(Self::Invocation {
                target: raw.target.ok_or(ProtocolError::MissingTarget)?,
                arguments: raw.arguments.unwrap_or_default(),
            }),
            TYPE_PING => Ok(Self::Ping),
            TYPE_CLOSE => Ok(Self::Close { error: raw.error }),
            other => Ok(Self::Other(other)),
        }
    }
}

/// Splits a WebSocket text payload into individual frames.
///
/// A payload may carry several frames; blank leftovers are skipped.
pub fn frames(payload: &str) -> impl Iterator<Item = &str> {
    payload
        .split(RECORD_SEPARATOR)
        .filter(|frame| !frame.trim().is_empty())
}

fn terminate(mut json: String) -> String {
    json.push(RECORD_SEPARATOR);
    json
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_wire_format() {
        let frame = HubMessage::invocation("DatabaseChanged").encode().unwrap();
        assert_eq!(
            frame,
            "{\"type\":1,\"target\":\"DatabaseChanged\",\"arguments\":[]}\u{1e}"
        );
    }

    #[test]
    fn test_ping_and_close_wire_format() {
        assert_eq!(HubMessage::Ping.encode().unwrap(), "{\"type\":6}\u{1e}");
        assert_eq!(
            HubMessage::Close { error: None }.encode().unwrap(),
            "{\"type\":7}\u{1e}"
        );
    }

    #[test]
    fn test_handshake_responses() {
        assert_eq!(HandshakeResponse::ok().encode().unwrap(), "{}\u{1e}");
        assert_eq!(
            HandshakeResponse::error("nope").encode().unwrap(),
            "{\"error\":\"nope\"}\u{1e}"
        );
    }

    #[test]
    fn test_handshake_validation() {
        assert!(HandshakeRequest::decode(r#"{"protocol":"json","version":1}"#).is_ok());
        assert!(matches!(
            HandshakeRequest::decode(r#"{"protocol":"messagepack","version":1}"#),
            Err(ProtocolError::Unsupported { .. })
        ));
        assert!(matches!(
            HandshakeRequest::decode(r#"{"protocol":"json","version":2}"#),
            Err(ProtocolError::Unsupported { .. })
        ));
        assert!(matches!(
            HandshakeRequest::decode("hello"),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_decode_client_messages() {
        assert_eq!(HubMessage::decode(r#"{"type":6}"#).unwrap(), HubMessage::Ping);
        assert_eq!(
            HubMessage::decode(r#"{"type":7,"error":"bye"}"#).unwrap(),
            HubMessage::Close {
                error: Some("bye".to_string())
            }
        );
        assert_eq!(
            HubMessage::decode(r#"{"type":3,"invocationId":"1"}"#).unwrap(),
            HubMessage::Other(3)
        );
        assert!(matches!(
            HubMessage::decode(r#"{"type":1}"#),
            Err(ProtocolError::MissingTarget)
        ));
    }

    #[test]
    fn test_frames_split_batched_payload() {
        let payload = "{\"protocol\":\"json\",\"version\":1}\u{1e}{\"type\":6}\u{1e}";
        let parts: Vec<_> = frames(payload).collect();
        assert_eq!(parts, vec!["{\"protocol\":\"json\",\"version\":1}", "{\"type\":6}"]);
    }
}
