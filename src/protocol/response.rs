//! Response payload returned to callers.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::error::RequestError;

/// Raw bytes of a matched response frame.
///
/// Cheap to clone; every completion handle for a request shares one buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Response {
    data: Arc<[u8]>,
}

impl Response {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data: data.into() }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Payload as UTF-8 text, if valid.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }

    /// Decode the payload as `T`, keeping the raw bytes on failure.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, RequestError> {
        serde_json::from_slice(&self.data).map_err(|e| RequestError::Decode {
            message: e.to_string(),
            data: self.data.to_vec(),
        })
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.text() {
            Some(text) => f.debug_tuple("Response").field(&text).finish(),
            None => f.debug_tuple("Response").field(&self.data.len()).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_decode_success() {
        let response = Response::new(br#"{"id":"1","result":"pong"}"#.to_vec());
        let value: Value = response.decode().unwrap();
        assert_eq!(value["result"], "pong");
        assert_eq!(response.text(), Some(r#"{"id":"1","result":"pong"}"#));
    }

    #[test]
    fn test_decode_failure_keeps_bytes() {
        let response = Response::new(b"{oops".to_vec());
        let err = response.decode::<Value>().unwrap_err();
        assert_eq!(err.code(), "DECODE_ERROR");
        assert_eq!(err.data(), Some(&b"{oops"[..]));
    }
}
