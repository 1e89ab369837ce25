//! Wire protocol and correlation.
//!
//! Messages cross the pipe as newline-delimited JSON. Two shapes exist:
//! `execute` (host → sandbox) and `execution-result` (sandbox → host).
//! Responses carry the request's dedicated id when one was given, and
//! always echo the original code string in `command`, so an id-less
//! caller can still correlate.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::sandbox::interp::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WireMessage {
    Execute {
        code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    ExecutionResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        command: String,
    },
}

/// A code fragment on its way to the sandbox. Immutable once sent.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub id: String,
    pub code: String,
}

impl ExecutionRequest {
    /// Wraps a fragment with a fresh correlation id.
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            code: code.into(),
        }
    }

    pub fn into_wire(self) -> WireMessage {
        WireMessage::Execute {
            code: self.code,
            id: Some(self.id),
        }
    }
}

/// Outcome of one evaluation, correlated to its request.
///
/// Exactly one of `result`/`error` is populated — the constructors are
/// the only way to build one, so the invariant holds by construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResponse {
    pub id: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub command: String,
}

impl ExecutionResponse {
    pub fn success(id: Option<String>, command: String, result: &Value) -> Self {
        Self {
            id,
            result: Some(result.to_json()),
            error: None,
            command,
        }
    }

    pub fn failure(id: Option<String>, command: String, error: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.into()),
            command,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// The token the dispatcher matches on: dedicated id when present,
    /// echoed command otherwise.
    pub fn correlation_key(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.command)
    }

    pub fn into_wire(self) -> WireMessage {
        WireMessage::ExecutionResult {
            id: self.id,
            result: self.result,
            error: self.error,
            command: self.command,
        }
    }

    /// Rebuilds a response from its wire form.
    ///
    /// A successful response whose value was JSON `null` loses the field
    /// during deserialization; normalize it back so exactly-one-of holds
    /// on the receiving side too.
    pub fn from_wire(
        id: Option<String>,
        result: Option<serde_json::Value>,
        error: Option<String>,
        command: String,
    ) -> Self {
        let result = match &error {
            None => Some(result.unwrap_or(serde_json::Value::Null)),
            Some(_) => None,
        };
        Self {
            id,
            result,
            error,
            command,
        }
    }
}

/// Encodes a message as one NDJSON frame (terminating newline included).
pub fn encode_frame(message: &WireMessage) -> String {
    // serde_json cannot fail on these shapes
    let mut line = serde_json::to_string(message).expect("wire message serializes");
    line.push('\n');
    line
}

/// Decodes one frame. A failure here is a protocol violation: the caller
/// logs and drops the frame rather than killing the channel.
pub fn decode_frame(line: &str) -> Result<WireMessage, Error> {
    serde_json::from_str(line.trim()).map_err(|e| Error::Protocol {
        reason: e.to_string(),
    })
}
