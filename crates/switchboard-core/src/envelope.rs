// ABOUTME: Envelopes exchanged over brokered endpoint-to-endpoint channels.
// ABOUTME: Plain messages, invoke requests and invoke responses with their JSON wire shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A plain fire-and-forget message: `{message, args}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlainMessage {
    pub message: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// An RPC request: `{type: "invoke", channel, requestId, args}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "invoke")]
pub struct InvokeRequest {
    pub channel: String,
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// An RPC response: `{type: "invoke-response", requestId, success, data?, error?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "invoke-response")]
pub struct InvokeResponse {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InvokeResponse {
    pub fn ok(request_id: impl Into<String>, data: Value) -> Self {
        Self {
            request_id: request_id.into(),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Everything that travels over a channel.
///
/// Tagged variants are tried first, so a plain message is whatever carries
/// `message` and no recognised `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    Invoke(InvokeRequest),
    InvokeResponse(InvokeResponse),
    Message(PlainMessage),
}

impl Envelope {
    pub fn message(message: impl Into<String>, args: Vec<Value>) -> Self {
        Envelope::Message(PlainMessage {
            message: message.into(),
            args,
        })
    }

    pub fn invoke(
        channel: impl Into<String>,
        request_id: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Envelope::Invoke(InvokeRequest {
            channel: channel.into(),
            request_id: request_id.into(),
            args,
        })
    }

    /// Channel or message name, for logs.
    pub fn name(&self) -> &str {
        match self {
            Envelope::Invoke(req) => &req.channel,
            Envelope::InvokeResponse(_) => "invoke-response",
            Envelope::Message(msg) => &msg.message,
        }
    }
}
