// SPDX-License-Identifier: MIT OR Apache-2.0
//! Envelope codec and validation.
//!
//! Every message on the wire is one JSON object:
//! `{uid, type, method, timestamp, data}` with lowercase `type` and `method`
//! strings. Unrecognized strings decode to `Unknown` and are rejected by
//! [`Envelope::validate`], so the caller can still reply to the request.

use serde_json::{json, Value};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

/// Subsystem a message is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Introspection
    Description,
    /// Application info
    App,
    /// Files
    Asset,
    /// Direct value injection
    Interaction,
    /// Processing graph
    ProcNode,
    /// Room (spatial scene) nodes
    RoomNode,
    /// Anything else
    Unknown,
}

impl MessageType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Description => "description",
            Self::App => "app",
            Self::Asset => "asset",
            Self::Interaction => "interaction",
            Self::ProcNode => "procnode",
            Self::RoomNode => "roomnode",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a wire name; unrecognized names map to `Unknown`
    pub fn from_wire(name: &str) -> Self {
        match name {
            "description" => Self::Description,
            "app" => Self::App,
            "asset" => Self::Asset,
            "interaction" => Self::Interaction,
            "procnode" => Self::ProcNode,
            "roomnode" => Self::RoomNode,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the sender wants done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Error report
    Error,
    /// Non-fatal problem report
    Warning,
    /// Create an entity
    Create,
    /// Read an entity
    Request,
    /// Change an entity
    Update,
    /// Remove an entity
    Delete,
    /// Wire two ports
    Connect,
    /// Unwire two ports
    Disconnect,
    /// Observe a port
    Subscribe,
    /// Stop observing a port
    Unsubscribe,
    /// Store a file
    Upload,
    /// Invoke a named procedure on a node
    RemoteProcedureCall,
    /// Anything else
    Unknown,
}

impl Method {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Create => "create",
            Self::Request => "request",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Upload => "upload",
            Self::RemoteProcedureCall => "remoteprocedurecall",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a wire name; unrecognized names map to `Unknown`
    pub fn from_wire(name: &str) -> Self {
        match name {
            "error" => Self::Error,
            "warning" => Self::Warning,
            "create" => Self::Create,
            "request" => Self::Request,
            "update" => Self::Update,
            "delete" => Self::Delete,
            "connect" => Self::Connect,
            "disconnect" => Self::Disconnect,
            "subscribe" => Self::Subscribe,
            "unsubscribe" => Self::Unsubscribe,
            "upload" => Self::Upload,
            "remoteprocedurecall" => Self::RemoteProcedureCall,
            _ => Self::Unknown,
        }
    }

    /// Whether `data.uid` must be present.
    ///
    /// Connect names both ends explicitly, and request and disconnect may
    /// address the application as a whole.
    pub fn requires_subject(&self) -> bool {
        !matches!(self, Self::Connect | Self::Disconnect | Self::Request)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a message was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// The text is not JSON
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    /// The JSON is not an object
    #[error("message is not a JSON object")]
    NotAnObject,
    /// No `type` string
    #[error("missing message type")]
    MissingType,
    /// No `method` string
    #[error("missing method")]
    MissingMethod,
    /// No numeric `timestamp`
    #[error("missing timestamp")]
    MissingTimestamp,
    /// No `data`
    #[error("missing data")]
    MissingPayload,
    /// `type` is not a known subsystem
    #[error("unknown message type")]
    UnknownType,
    /// `method` is not a known method
    #[error("unknown method")]
    UnknownMethod,
    /// `data.uid` is required by this method but absent
    #[error("data.uid is required for {0}")]
    MissingSubject(Method),
}

impl EnvelopeError {
    /// Stable machine-readable code sent in error replies
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidJson(_) => "invalidJson",
            Self::NotAnObject => "notAnObject",
            Self::MissingType => "missingType",
            Self::MissingMethod => "missingMethod",
            Self::MissingTimestamp => "missingTimestamp",
            Self::MissingPayload => "missingPayload",
            Self::UnknownType => "unknownType",
            Self::UnknownMethod => "unknownMethod",
            Self::MissingSubject(_) => "missingSubject",
        }
    }
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One protocol message
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Request identity; replies carry the request's uid
    pub uid: String,
    /// Addressed subsystem
    pub message_type: MessageType,
    /// Requested operation
    pub method: Method,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    /// Method-specific payload
    pub data: Value,
}

impl Envelope {
    /// Create a message with a fresh uid, stamped now
    pub fn new(message_type: MessageType, method: Method, data: Value) -> Self {
        Self {
            uid: Uuid::new_v4().to_string(),
            message_type,
            method,
            timestamp: now_millis(),
            data,
        }
    }

    /// Reply to this message with the same uid and type
    pub fn reply(&self, method: Method, data: Value) -> Self {
        Self {
            uid: self.uid.clone(),
            message_type: self.message_type,
            method,
            timestamp: now_millis(),
            data,
        }
    }

    /// Error reply for a request that may not have parsed
    pub fn error_reply(request_uid: &str, message_type: MessageType, error: &EnvelopeError) -> Self {
        Self {
            uid: request_uid.to_string(),
            message_type,
            method: Method::Error,
            timestamp: now_millis(),
            data: json!({ "code": error.code(), "message": error.to_string() }),
        }
    }

    /// JSON form
    pub fn to_json(&self) -> Value {
        json!({
            "uid": self.uid,
            "type": self.message_type.as_str(),
            "method": self.method.as_str(),
            "timestamp": self.timestamp,
            "data": self.data,
        })
    }

    /// Serialized JSON text
    pub fn to_wire(&self) -> String {
        self.to_json().to_string()
    }

    /// Decode JSON text
    pub fn from_wire(text: &str) -> Result<Self, EnvelopeError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| EnvelopeError::InvalidJson(e.to_string()))?;
        Self::parse(&value)
    }

    /// Decode a JSON value.
    ///
    /// Only structure is checked here; see [`Envelope::validate`].
    pub fn parse(value: &Value) -> Result<Self, EnvelopeError> {
        let object = value.as_object().ok_or(EnvelopeError::NotAnObject)?;
        let message_type = object
            .get("type")
            .and_then(Value::as_str)
            .map(MessageType::from_wire)
            .ok_or(EnvelopeError::MissingType)?;
        let method = object
            .get("method")
            .and_then(Value::as_str)
            .map(Method::from_wire)
            .ok_or(EnvelopeError::MissingMethod)?;
        let timestamp = object
            .get("timestamp")
            .and_then(|t| t.as_u64().or_else(|| t.as_f64().map(|f| f as u64)))
            .ok_or(EnvelopeError::MissingTimestamp)?;
        let data = object.get("data").cloned().ok_or(EnvelopeError::MissingPayload)?;
        let uid = object
            .get("uid")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            uid,
            message_type,
            method,
            timestamp,
            data,
        })
    }

    /// Reject unknown types and methods and missing subjects
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.message_type == MessageType::Unknown {
            return Err(EnvelopeError::UnknownType);
        }
        if self.method == Method::Unknown {
            return Err(EnvelopeError::UnknownMethod);
        }
        if self.method.requires_subject() && self.subject_uid().is_none() {
            return Err(EnvelopeError::MissingSubject(self.method));
        }
        Ok(())
    }

    /// `data.uid`, if present
    pub fn subject_uid(&self) -> Option<&str> {
        self.data.get("uid").and_then(Value::as_str)
    }

    /// String field of `data`
    pub fn data_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(type_name: &str, method: &str, data: Value) -> Value {
        json!({ "uid": "r1", "type": type_name, "method": method, "timestamp": 1, "data": data })
    }

    #[test]
    fn test_wire_round_trip() {
        let envelope = Envelope::new(MessageType::ProcNode, Method::RemoteProcedureCall, json!({ "uid": "n" }));
        let decoded = Envelope::from_wire(&envelope.to_wire()).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(envelope.to_json()["method"], "remoteprocedurecall");
    }

    #[test]
    fn test_structural_errors_are_distinct() {
        let cases = [
            (json!([]), EnvelopeError::NotAnObject),
            (json!({ "method": "create", "timestamp": 1, "data": {} }), EnvelopeError::MissingType),
            (json!({ "type": "procnode", "timestamp": 1, "data": {} }), EnvelopeError::MissingMethod),
            (json!({ "type": "procnode", "method": "create", "data": {} }), EnvelopeError::MissingTimestamp),
            (json!({ "type": "procnode", "method": "create", "timestamp": 1 }), EnvelopeError::MissingPayload),
        ];
        for (value, expected) in cases {
            assert_eq!(Envelope::parse(&value), Err(expected));
        }
        assert!(matches!(Envelope::from_wire("{oops"), Err(EnvelopeError::InvalidJson(_))));
    }

    #[test]
    fn test_unknown_names_decode_then_fail_validation() {
        let envelope = Envelope::parse(&message("bogus", "create", json!({ "uid": "x" }))).unwrap();
        assert_eq!(envelope.message_type, MessageType::Unknown);
        assert_eq!(envelope.validate(), Err(EnvelopeError::UnknownType));

        let envelope = Envelope::parse(&message("procnode", "explode", json!({ "uid": "x" }))).unwrap();
        assert_eq!(envelope.validate(), Err(EnvelopeError::UnknownMethod));
    }

    #[test]
    fn test_subject_requirement() {
        for method in ["connect", "disconnect", "request"] {
            let envelope = Envelope::parse(&message("procnode", method, json!({}))).unwrap();
            assert_eq!(envelope.validate(), Ok(()), "{method}");
        }
        let envelope = Envelope::parse(&message("procnode", "delete", json!({}))).unwrap();
        assert_eq!(envelope.validate(), Err(EnvelopeError::MissingSubject(Method::Delete)));
        assert_eq!(EnvelopeError::MissingSubject(Method::Delete).code(), "missingSubject");
    }

    #[test]
    fn test_reply_keeps_request_identity() {
        let request = Envelope::parse(&message("procnode", "request", json!({ "uid": "n" }))).unwrap();
        let reply = request.reply(Method::Request, json!({ "ok": true }));
        assert_eq!(reply.uid, "r1");
        assert_eq!(reply.message_type, MessageType::ProcNode);

        let error = Envelope::error_reply("r1", MessageType::Unknown, &EnvelopeError::UnknownType);
        assert_eq!(error.data["code"], "unknownType");
        assert_eq!(error.method, Method::Error);
    }
}
