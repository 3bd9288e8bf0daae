//! Inbound message classification.

use serde_json::Value;

use crate::error::{ProtocolErrorKind, SessionError};

use super::request::routing_key;

/// An inbound message without a correlation id.
#[derive(Debug, Clone)]
pub struct Notification {
    pub kind: String,
    pub method: String,
    /// Entire decoded message, routing fields included.
    pub payload: Value,
    /// Raw frame bytes as received.
    pub raw: Vec<u8>,
}

impl Notification {
    /// `type:method` handler key.
    pub fn key(&self) -> String {
        routing_key(&self.kind, &self.method)
    }
}

/// What an inbound frame turned out to be.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    /// Carries an `id`; answers a pending request.
    Response { id: String },
    /// Carries `type` and `method` but no `id`.
    Notification(Notification),
}

impl InboundMessage {
    /// Classify a raw frame.
    ///
    /// A non-empty string `id` wins over routing fields. Anything that is
    /// not a JSON object of either shape is an invalid message.
    pub fn parse(raw: &[u8]) -> Result<Self, SessionError> {
        let value: Value = serde_json::from_slice(raw).map_err(|e| SessionError::Protocol {
            kind: ProtocolErrorKind::InvalidMessageFormat {
                message: format!("Invalid JSON: {}", e),
            },
        })?;

        let Some(object) = value.as_object() else {
            return Err(SessionError::Protocol {
                kind: ProtocolErrorKind::InvalidMessageFormat {
                    message: "Message is not a JSON object".to_string(),
                },
            });
        };

        if let Some(id) = object.get("id").and_then(Value::as_str) {
            if !id.is_empty() {
                return Ok(InboundMessage::Response { id: id.to_string() });
            }
        }

        let kind = object.get("type").and_then(Value::as_str);
        let method = object.get("method").and_then(Value::as_str);
        match (kind, method) {
            (Some(kind), Some(method)) => Ok(InboundMessage::Notification(Notification {
                kind: kind.to_string(),
                method: method.to_string(),
                payload: value.clone(),
                raw: raw.to_vec(),
            })),
            _ => Err(SessionError::Protocol {
                kind: ProtocolErrorKind::InvalidMessageFormat {
                    message: "Message has neither an id nor type/method".to_string(),
                },
            }),
        }
    }
}
