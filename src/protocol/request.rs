//! Outbound request type.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A call sent to the peer.
///
/// Serializes as `{"id": "...", "type": "...", "method": "...", "args": {...}}`.
/// `method` and `args` are omitted when absent; `id` is omitted for
/// fire-and-forget messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id. Empty until assigned by the registry.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// Application-level routing key (`type` on the wire).
    #[serde(rename = "type")]
    pub kind: String,

    /// Method within `kind`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Call arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Map<String, Value>>,
}

impl Request {
    /// Create a request with no method and no arguments.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            kind: kind.into(),
            method: None,
            args: None,
        }
    }

    /// Set the correlation id explicitly.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Replace all arguments.
    pub fn args(mut self, args: Map<String, Value>) -> Self {
        self.args = Some(args);
        self
    }

    /// Add a single argument.
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    /// `type:method` routing key, as used for notification handlers.
    pub fn key(&self) -> String {
        routing_key(&self.kind, self.method.as_deref().unwrap_or_default())
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Build the `type:method` key used to route notifications.
pub fn routing_key(kind: &str, method: &str) -> String {
    format!("{}:{}", kind, method)
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TCP")?;
        if !self.id.is_empty() {
            write!(f, " [{}]", self.id)?;
        }
        write!(f, " {}", self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let request = Request::new("rpc")
            .with_id("1")
            .method("ping")
            .args(Map::new());
        let value: Value = serde_json::from_slice(&request.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"id": "1", "type": "rpc", "method": "ping", "args": {}})
        );
    }

    #[test]
    fn test_absent_fields_are_omitted() {
        let json = String::from_utf8(Request::new("status").to_json().unwrap()).unwrap();
        assert_eq!(json, r#"{"type":"status"}"#);
    }

    #[test]
    fn test_arg_builder() {
        let request = Request::new("user").method("get").arg("uid", 42).arg("name", "lumo");
        let args = request.args.unwrap();
        assert_eq!(args.get("uid"), Some(&json!(42)));
        assert_eq!(args.get("name"), Some(&json!("lumo")));
    }

    #[test]
    fn test_display() {
        let request = Request::new("rpc").with_id("7").method("ping");
        assert_eq!(request.to_string(), "TCP [7] rpc:ping");
        assert_eq!(Request::new("rpc").method("ping").to_string(), "TCP rpc:ping");
    }
}
