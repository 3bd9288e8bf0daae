//! Caller-facing completion handle.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::RequestError;
use crate::protocol::{Request, Response};

use super::pending::{completed_receiver, RequestOutcome};

type Validator = dyn Fn(&Request, &[u8]) -> Result<(), String> + Send + Sync;

/// Awaitable result of a submitted request.
///
/// Handles are cheap to clone. Every clone observes the same single
/// outcome; waiting suspends only the caller, never the connection.
#[derive(Clone)]
pub struct CompletionHandle {
    request: Arc<Request>,
    completion: watch::Receiver<Option<RequestOutcome>>,
    validators: Vec<Arc<Validator>>,
}

impl CompletionHandle {
    pub(crate) fn new(request: Request, completion: watch::Receiver<Option<RequestOutcome>>) -> Self {
        Self {
            request: Arc::new(request),
            completion,
            validators: Vec::new(),
        }
    }

    /// A handle that is already failed with `error`.
    pub(crate) fn failed(request: Request, error: RequestError) -> Self {
        Self::new(request, completed_receiver(Err(error)))
    }

    /// Correlation id of the request.
    pub fn id(&self) -> &str {
        &self.request.id
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Whether the request has reached its terminal state.
    pub fn is_complete(&self) -> bool {
        self.completion.borrow().is_some()
    }

    /// Add a check run on successful responses before they are returned.
    ///
    /// Checks run in the order added; the first `Err` turns the result
    /// into [`RequestError::Validation`], keeping the raw bytes.
    pub fn validate<F>(mut self, validation: F) -> Self
    where
        F: Fn(&Request, &[u8]) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validators.push(Arc::new(validation));
        self
    }

    async fn outcome(&self) -> RequestOutcome {
        let mut completion = self.completion.clone();
        loop {
            let current = completion.borrow_and_update().clone();
            if let Some(outcome) = current {
                return outcome;
            }
            if completion.changed().await.is_err() {
                // Sender gone: take whatever was published last
                let last = completion.borrow().clone();
                return last.unwrap_or(Err(RequestError::SessionClosed));
            }
        }
    }

    /// Wait for the raw response.
    pub async fn response(&self) -> Result<Response, RequestError> {
        let response = self.outcome().await?;
        for validator in &self.validators {
            if let Err(message) = validator(self.request.as_ref(), response.bytes()) {
                return Err(RequestError::Validation {
                    message,
                    data: response.bytes().to_vec(),
                });
            }
        }
        Ok(response)
    }

    /// Wait for the response and decode it with `decode`.
    pub async fn response_with<T, F>(&self, decode: F) -> Result<T, RequestError>
    where
        F: FnOnce(&[u8]) -> Result<T, String>,
    {
        let response = self.response().await?;
        decode(response.bytes()).map_err(|message| RequestError::Decode {
            message,
            data: response.bytes().to_vec(),
        })
    }

    /// Wait for the response and parse it as JSON.
    pub async fn response_json(&self) -> Result<Value, RequestError> {
        self.response().await?.decode()
    }

    /// Wait for the response and deserialize it as `T`.
    pub async fn response_as<T: DeserializeOwned>(&self) -> Result<T, RequestError> {
        self.response().await?.decode()
    }

    /// Run `callback` once with the result, on the tokio runtime.
    ///
    /// May be called any number of times; each callback fires exactly once.
    pub fn on_complete<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<Response, RequestError>) + Send + 'static,
    {
        let handle = self.clone();
        tokio::spawn(async move {
            let result = handle.response().await;
            callback(result);
        })
    }
}

impl fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("request", &self.request.to_string())
            .field("complete", &self.is_complete())
            .field("validators", &self.validators.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::pending::PendingRequest;
    use serde::Deserialize;
    use tokio::sync::mpsc;

    fn pending_pair() -> (PendingRequest, CompletionHandle) {
        let request = Request::new("rpc").with_id("1").method("ping");
        let (pending, receiver) = PendingRequest::new(request.clone());
        (pending, CompletionHandle::new(request, receiver))
    }

    #[tokio::test]
    async fn test_waits_for_completion() {
        let (mut pending, handle) = pending_pair();
        assert!(!handle.is_complete());

        let waiter = tokio::spawn({
            let handle = handle.clone();
            async move { handle.response().await }
        });
        tokio::task::yield_now().await;
        pending.complete(Ok(Response::new(br#"{"id":"1","result":"pong"}"#.to_vec())));

        let response = waiter.await.unwrap().unwrap();
        assert_eq!(response.text(), Some(r#"{"id":"1","result":"pong"}"#));
        assert!(handle.is_complete());
    }

    #[tokio::test]
    async fn test_validation_rejects_response() {
        let (mut pending, handle) = pending_pair();
        let handle = handle
            .validate(|_, _| Ok(()))
            .validate(|request, data| {
                assert_eq!(request.id, "1");
                if data.windows(7).any(|w| w == b"\"error\"") {
                    Err("peer reported an error".to_string())
                } else {
                    Ok(())
                }
            });

        pending.complete(Ok(Response::new(br#"{"id":"1","error":"nope"}"#.to_vec())));
        let err = handle.response().await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert_eq!(err.data(), Some(&br#"{"id":"1","error":"nope"}"#[..]));
    }

    #[tokio::test]
    async fn test_errors_skip_validation() {
        let (mut pending, handle) = pending_pair();
        let handle = handle.validate(|_, _| Err("unreachable".to_string()));
        pending.complete(Err(RequestError::SessionEnded));
        assert_eq!(handle.response().await.unwrap_err(), RequestError::SessionEnded);
    }

    #[tokio::test]
    async fn test_typed_and_custom_decoding() {
        #[derive(Deserialize)]
        struct Pong {
            result: String,
        }

        let (mut pending, handle) = pending_pair();
        pending.complete(Ok(Response::new(br#"{"id":"1","result":"pong"}"#.to_vec())));

        let pong: Pong = handle.response_as().await.unwrap();
        assert_eq!(pong.result, "pong");

        let err = handle
            .response_with(|data| {
                std::str::from_utf8(data)
                    .map_err(|e| e.to_string())
                    .and_then(|s| s.parse::<u64>().map_err(|e| e.to_string()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Decode { .. }));
        assert_eq!(err.data(), Some(&br#"{"id":"1","result":"pong"}"#[..]));
    }

    #[tokio::test]
    async fn test_every_callback_fires_once() {
        let (mut pending, handle) = pending_pair();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let tasks: Vec<_> = (0..3)
            .map(|i| {
                let tx = tx.clone();
                handle.on_complete(move |result| {
                    tx.send((i, result.is_ok())).unwrap();
                })
            })
            .collect();
        drop(tx);

        pending.complete(Ok(Response::new(b"{}".to_vec())));
        for task in tasks {
            task.await.unwrap();
        }

        let mut fired = Vec::new();
        while let Some(entry) = rx.recv().await {
            fired.push(entry);
        }
        fired.sort();
        assert_eq!(fired, vec![(0, true), (1, true), (2, true)]);
    }

    #[tokio::test]
    async fn test_dropped_registry_entry_reads_as_closed() {
        let (pending, handle) = pending_pair();
        drop(pending);
        assert_eq!(handle.response().await.unwrap_err(), RequestError::SessionClosed);
    }
}
