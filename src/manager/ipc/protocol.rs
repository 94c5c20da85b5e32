// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Wire protocol for manager-worker communication.
//!
//! Every frame is UTF-8 text terminated by a single `\0` byte. The first
//! frame a worker sends is its bare name; the manager answers with
//! `verified:<name>.`. After that, frames carry a JSON object with the keys
//! `type`, `to`, `from`, `timestamp` and `details`. JSON string escaping
//! guarantees the delimiter never appears inside a serialized message.

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{IpcError, IpcResult};

/// Frame terminator.
pub const DELIMITER: u8 = b'\0';

/// Key a worker uses to report its chat-platform latency in a pong.
pub const PLATFORM_PING_KEY: &str = "discordPing";

/// Prefix of the acknowledgement frame.
const ACK_PREFIX: &str = "verified:";

// ============================================================================
// Message Types
// ============================================================================

/// Kind of a post-handshake message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    /// Imperative command.
    ActionReq,
    /// Query, currently only `metrics`.
    DataReq,
    /// Answer to an earlier request; carries `status` and the echoed timestamp.
    Response,
    /// Answer to a ping; handled exactly like `Response`.
    Pong,
    /// Liveness check.
    Ping,
    /// Ask the manager to log in as a stand-in bot.
    Summon,
    /// Anything else. Dropped by the dispatcher.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ActionReq => "actionReq",
            Self::DataReq => "dataReq",
            Self::Response => "response",
            Self::Pong => "pong",
            Self::Ping => "ping",
            Self::Summon => "summon",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A post-handshake message.
///
/// Empty `to`, `from` and `timestamp` are filled in by the connection when
/// the message is sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub details: Value,
}

impl Message {
    /// Create an unaddressed message.
    pub fn new(kind: MessageType, details: Value) -> Self {
        Self {
            kind,
            to: String::new(),
            from: String::new(),
            timestamp: String::new(),
            details,
        }
    }

    /// Create a liveness check.
    pub fn ping() -> Self {
        Self::new(MessageType::Ping, Value::Null)
    }

    /// Create an action request from a verb and its argument.
    pub fn action(verb: &str, argument: Option<&str>) -> Self {
        let mut details = vec![Value::from(verb)];
        if let Some(arg) = argument {
            details.push(Value::from(arg));
        }
        Self::new(MessageType::ActionReq, Value::Array(details))
    }

    /// Create a metrics data request.
    pub fn metrics_request(subject: &str) -> Self {
        Self::new(
            MessageType::DataReq,
            Value::Array(vec![Value::from("metrics"), Value::from(subject)]),
        )
    }

    /// Create a `response` answering the request stamped `request_timestamp`.
    pub fn response(success: bool, request_timestamp: &str, extra: Map<String, Value>) -> Self {
        Self::new(
            MessageType::Response,
            Value::Object(response_details(success, request_timestamp, extra)),
        )
    }

    /// Create a `pong` answering the ping stamped `request_timestamp`.
    pub fn pong(request_timestamp: &str, platform_ping: Option<f64>) -> Self {
        let mut extra = Map::new();
        extra.insert(
            PLATFORM_PING_KEY.to_string(),
            platform_ping.map(Value::from).unwrap_or(Value::Null),
        );
        Self::new(
            MessageType::Pong,
            Value::Object(response_details(true, request_timestamp, extra)),
        )
    }

    /// Set the recipient.
    pub fn to(mut self, to: impl Into<String>) -> Self {
        self.to = to.into();
        self
    }

    /// Set the sender.
    pub fn sent_by(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    /// Set the correlation timestamp.
    pub fn stamped(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    /// Fill `to`, `from` and `timestamp` where they are empty.
    pub fn fill(&mut self, to: &str, from: &str) {
        if self.to.is_empty() {
            self.to = to.to_string();
        }
        if self.from.is_empty() {
            self.from = from.to_string();
        }
        if self.timestamp.is_empty() {
            self.timestamp = now_timestamp();
        }
    }

    /// Whether this message answers an earlier request.
    pub fn is_response(&self) -> bool {
        matches!(self.kind, MessageType::Response | MessageType::Pong)
    }
}

fn response_details(success: bool, request_timestamp: &str, extra: Map<String, Value>) -> Map<String, Value> {
    let mut details = extra;
    details.insert("status".to_string(), Value::from(status_str(success)));
    details.insert("timestamp".to_string(), Value::from(request_timestamp));
    details
}

fn status_str(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failed"
    }
}

/// The parts of a response's `details` used for correlation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseDetails {
    pub status: bool,
    pub timestamp: String,
    /// Everything left after `status` and `timestamp` are popped.
    pub rest: Map<String, Value>,
}

impl ResponseDetails {
    /// Pop `status` and `timestamp` out of a response's details.
    pub fn parse(details: Value) -> IpcResult<Self> {
        let mut map = match details {
            Value::Object(map) => map,
            other => {
                return Err(IpcError::InvalidMessage(format!(
                    "response details must be a map, got {}",
                    other
                )))
            }
        };

        let status = match map.remove("status") {
            Some(Value::String(s)) if s == "success" => true,
            Some(Value::String(s)) if s == "failed" => false,
            Some(Value::Bool(b)) => b,
            other => {
                return Err(IpcError::InvalidMessage(format!(
                    "invalid response status: {:?}",
                    other
                )))
            }
        };

        let timestamp = match map.remove("timestamp") {
            Some(Value::String(ts)) => ts,
            other => {
                return Err(IpcError::InvalidMessage(format!(
                    "invalid response timestamp: {:?}",
                    other
                )))
            }
        };

        Ok(Self {
            status,
            timestamp,
            rest: map,
        })
    }
}

/// Current local time as a correlation token.
///
/// Nanosecond precision keeps tokens distinct for back-to-back requests to
/// the same recipient.
pub fn now_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S%.9f").to_string()
}

// ============================================================================
// Framing
// ============================================================================

/// Encode a message as a delimited frame.
pub fn encode(msg: &Message) -> IpcResult<Vec<u8>> {
    let mut bytes = serde_json::to_vec(msg)?;
    bytes.push(DELIMITER);
    Ok(bytes)
}

/// Decode a frame (with or without its trailing delimiter) into a message.
///
/// Fails on invalid UTF-8, invalid JSON, a non-map payload, or a map
/// missing the `type` key.
pub fn decode(frame: &[u8]) -> IpcResult<Message> {
    let frame = strip_delimiter(frame);
    let value: Value = serde_json::from_slice(frame)?;
    if !value.is_object() {
        return Err(IpcError::InvalidMessage(format!(
            "expected a map, got {}",
            value
        )));
    }
    Ok(serde_json::from_value(value)?)
}

/// Encode the identity frame a worker sends first.
pub fn encode_identity(name: &str) -> Vec<u8> {
    let mut bytes = name.as_bytes().to_vec();
    bytes.push(DELIMITER);
    bytes
}

/// Decode an identity frame. Returns `None` for tokens that cannot be a
/// worker name.
pub fn decode_identity(frame: &[u8]) -> Option<String> {
    let token = std::str::from_utf8(strip_delimiter(frame)).ok()?;
    if token.is_empty() || token.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return None;
    }
    Some(token.to_string())
}

/// The acknowledgement text for a verified worker.
pub fn ack_text(name: &str) -> String {
    format!("{}{}.", ACK_PREFIX, name)
}

/// Encode the acknowledgement frame.
pub fn encode_ack(name: &str) -> Vec<u8> {
    let mut bytes = ack_text(name).into_bytes();
    bytes.push(DELIMITER);
    bytes
}

/// Whether `frame` is the acknowledgement for `name`.
pub fn is_ack_for(frame: &[u8], name: &str) -> bool {
    strip_delimiter(frame) == ack_text(name).as_bytes()
}

fn strip_delimiter(frame: &[u8]) -> &[u8] {
    frame.strip_suffix(&[DELIMITER]).unwrap_or(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_type_wire_names() {
        let encoded = serde_json::to_string(&MessageType::ActionReq).unwrap();
        assert_eq!(encoded, "\"actionReq\"");
        let decoded: MessageType = serde_json::from_str("\"dataReq\"").unwrap();
        assert_eq!(decoded, MessageType::DataReq);
        let decoded: MessageType = serde_json::from_str("\"pong\"").unwrap();
        assert_eq!(decoded, MessageType::Pong);
    }

    #[test]
    fn test_unknown_type_decodes() {
        let frame = br#"{"type": "teleport", "to": "manager", "from": "juan", "timestamp": "t", "details": []}"#;
        let msg = decode(frame).unwrap();
        assert_eq!(msg.kind, MessageType::Unknown);
    }

    #[test]
    fn test_encode_terminates_with_delimiter() {
        let msg = Message::ping().to("bulbe").sent_by("manager").stamped("t1");
        let frame = encode(&msg).unwrap();
        assert_eq!(frame.last(), Some(&DELIMITER));
        assert_eq!(frame.iter().filter(|b| **b == DELIMITER).count(), 1);
        assert_eq!(decode(&frame).unwrap(), msg);
    }

    #[test]
    fn test_embedded_nul_is_escaped() {
        let msg = Message::new(MessageType::ActionReq, json!(["say", "a\u{0}b"]));
        let frame = encode(&msg).unwrap();
        assert_eq!(frame.iter().filter(|b| **b == DELIMITER).count(), 1);
        assert_eq!(decode(&frame).unwrap().details, json!(["say", "a\u{0}b"]));
    }

    #[test]
    fn test_decode_rejects_non_map() {
        assert!(matches!(decode(b"[1, 2, 3]\0"), Err(IpcError::InvalidMessage(_))));
        assert!(decode(b"\"hello\"").is_err());
        assert!(decode(b"{not json").is_err());
        assert!(decode(br#"{"to": "bulbe"}"#).is_err());
    }

    #[test]
    fn test_fill_only_empty_fields() {
        let mut msg = Message::ping().sent_by("juan");
        msg.fill("bulbe", "manager");
        assert_eq!(msg.to, "bulbe");
        assert_eq!(msg.from, "juan");
        assert!(!msg.timestamp.is_empty());

        let mut stamped = Message::ping().stamped("fixed");
        stamped.fill("bulbe", "manager");
        assert_eq!(stamped.timestamp, "fixed");
    }

    #[test]
    fn test_response_details_parse() {
        let msg = Message::response(true, "t-42", {
            let mut extra = Map::new();
            extra.insert("result".into(), json!(7));
            extra
        });
        let parsed = ResponseDetails::parse(msg.details).unwrap();
        assert!(parsed.status);
        assert_eq!(parsed.timestamp, "t-42");
        assert_eq!(parsed.rest.get("result"), Some(&json!(7)));
        assert!(!parsed.rest.contains_key("status"));
    }

    #[test]
    fn test_response_details_failed_and_invalid() {
        let parsed = ResponseDetails::parse(json!({"status": "failed", "timestamp": "t"})).unwrap();
        assert!(!parsed.status);

        assert!(ResponseDetails::parse(json!({"status": "maybe", "timestamp": "t"})).is_err());
        assert!(ResponseDetails::parse(json!({"status": "success"})).is_err());
        assert!(ResponseDetails::parse(json!(["success", "t"])).is_err());
    }

    #[test]
    fn test_pong_carries_platform_ping() {
        let pong = Message::pong("t-1", Some(0.05));
        assert_eq!(pong.kind, MessageType::Pong);
        let parsed = ResponseDetails::parse(pong.details).unwrap();
        assert!(parsed.status);
        assert_eq!(parsed.rest.get(PLATFORM_PING_KEY), Some(&json!(0.05)));
    }

    #[test]
    fn test_identity_frames() {
        assert_eq!(encode_identity("bulbe"), b"bulbe\0".to_vec());
        assert_eq!(decode_identity(b"bulbe\0"), Some("bulbe".to_string()));
        assert_eq!(decode_identity(b"\0"), None);
        assert_eq!(decode_identity(b"two words\0"), None);
        assert_eq!(decode_identity(&[0xff, 0xfe, 0]), None);
    }

    #[test]
    fn test_ack_frames() {
        assert_eq!(encode_ack("bulbe"), b"verified:bulbe.\0".to_vec());
        assert!(is_ack_for(b"verified:bulbe.\0", "bulbe"));
        assert!(!is_ack_for(b"verified:juan.\0", "bulbe"));
    }

    #[test]
    fn test_action_builder() {
        let msg = Message::action("startBot", Some("juan"));
        assert_eq!(msg.kind, MessageType::ActionReq);
        assert_eq!(msg.details, json!(["startBot", "juan"]));
        assert_eq!(Message::action("closeServer", None).details, json!(["closeServer"]));
    }
}
