//! Session-wide request registry.
//!
//! Every path that reads or mutates pending state goes through one mutex,
//! so a request is removed and completed exactly once no matter which of
//! response, timeout or invalidation reaches it first.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::RequestError;
use crate::protocol::{InboundMessage, Request, Response};

use super::handle::CompletionHandle;
use super::handler::{HandlerOutcome, NotificationHandler};
use super::pending::{PendingRequest, RequestState};

/// What [`RequestRegistry::resolve`] did with an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Delivered to the pending request with this id.
    Completed { id: String },
    /// Carried an id with no pending request (late or duplicate).
    Unmatched { id: String },
    /// Accepted by the handler for this key.
    Notified { key: String },
    /// The handler for this key declined the message.
    Declined { key: String },
    /// No handler registered for this key.
    NoHandler { key: String },
    /// Not a valid message.
    Dropped { reason: String },
}

#[derive(Debug)]
enum Outbound {
    Request(String),
    Message(Vec<u8>),
}

struct RegistryState {
    open: bool,
    next_id: u64,
    pending: HashMap<String, PendingRequest>,
    /// Send order. Waiting requests are picked strictly first-in first-out.
    send_queue: VecDeque<Outbound>,
    handlers: HashMap<String, Arc<dyn NotificationHandler>>,
}

impl RegistryState {
    /// Next monotonic id not currently pending.
    fn allocate_id(&mut self) -> String {
        loop {
            let id = self.next_id.to_string();
            self.next_id += 1;
            if !self.pending.contains_key(&id) {
                return id;
            }
        }
    }
}

/// Tracks in-flight requests for one session.
pub struct RequestRegistry {
    state: Mutex<RegistryState>,
    timeout: Duration,
    max_message_size: usize,
    outbound_ready: Notify,
}

impl RequestRegistry {
    /// Create a closed registry. Submissions fail until [`set_open`](Self::set_open).
    pub fn new(timeout: Duration, max_message_size: usize) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                open: false,
                next_id: 1,
                pending: HashMap::new(),
                send_queue: VecDeque::new(),
                handlers: HashMap::new(),
            }),
            timeout,
            max_message_size,
            outbound_ready: Notify::new(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.requests.timeout(),
            settings.limits.max_message_size,
        )
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // Recover from mutex poisoning
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_open(&self, open: bool) {
        self.lock().open = open;
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Number of requests not yet completed.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Current state of a pending request, if it is still pending.
    pub fn state_of(&self, id: &str) -> Option<RequestState> {
        self.lock().pending.get(id).map(|p| p.state())
    }

    /// Register a request and return its completion handle.
    ///
    /// An empty id is replaced with the next monotonic id. If the session
    /// is not open, or a caller-supplied id is already pending, the handle
    /// is returned already failed.
    pub fn submit(&self, mut request: Request) -> CompletionHandle {
        let mut state = self.lock();

        if !state.open {
            drop(state);
            debug!(request = %request, "Submit on closed session");
            return CompletionHandle::failed(request, RequestError::NotOpen);
        }

        if request.id.is_empty() {
            request.id = state.allocate_id();
        } else if state.pending.contains_key(&request.id) {
            drop(state);
            warn!(request_id = %request.id, "Duplicate request id");
            let error = RequestError::DuplicateId {
                id: request.id.clone(),
            };
            return CompletionHandle::failed(request, error);
        }

        let id = request.id.clone();
        let (pending, receiver) = PendingRequest::new(request.clone());
        state.pending.insert(id.clone(), pending);
        state.send_queue.push_back(Outbound::Request(id));
        drop(state);

        self.outbound_ready.notify_one();
        debug!(request = %request, "Request submitted");

        CompletionHandle::new(request, receiver)
    }

    /// Queue a fire-and-forget message. It gets no id and no pending entry.
    pub fn enqueue_message(&self, mut request: Request) -> Result<(), RequestError> {
        request.id.clear();
        let bytes = self.encode(&request)?;

        let mut state = self.lock();
        if !state.open {
            return Err(RequestError::NotOpen);
        }
        state.send_queue.push_back(Outbound::Message(bytes));
        drop(state);

        self.outbound_ready.notify_one();
        debug!(request = %request, "Message queued");
        Ok(())
    }

    fn encode(&self, request: &Request) -> Result<Vec<u8>, RequestError> {
        let bytes = request.to_json().map_err(|e| RequestError::Encode {
            message: e.to_string(),
        })?;
        if bytes.len() > self.max_message_size {
            return Err(RequestError::TooLarge {
                size: bytes.len(),
                max: self.max_message_size,
            });
        }
        Ok(bytes)
    }

    /// Whether anything may be ready to send.
    pub fn has_outbound(&self) -> bool {
        !self.lock().send_queue.is_empty()
    }

    /// Resolves after something was queued for sending.
    ///
    /// A queue event that happened while nobody waited is not lost.
    pub async fn outbound_ready(&self) {
        self.outbound_ready.notified().await
    }

    /// Pick the next payload to write, stamping the request as sent now.
    pub fn next_to_send(&self) -> Option<Vec<u8>> {
        self.next_to_send_at(Instant::now())
    }

    /// Pick the next payload to write, stamping the request as sent at `now`.
    ///
    /// Requests that cannot be encoded are failed here and skipped.
    pub fn next_to_send_at(&self, now: Instant) -> Option<Vec<u8>> {
        let mut guard = self.lock();
        let state = &mut *guard;

        while let Some(entry) = state.send_queue.pop_front() {
            let id = match entry {
                Outbound::Message(bytes) => return Some(bytes),
                Outbound::Request(id) => id,
            };

            // Gone or already sent: resolved out of band
            let Some(pending) = state.pending.get_mut(&id) else {
                continue;
            };
            if pending.state() != RequestState::Waiting {
                continue;
            }

            match self.encode(pending.request()) {
                Ok(bytes) => {
                    pending.mark_running(now);
                    debug!(request_id = %id, bytes = bytes.len(), "Request selected for write");
                    return Some(bytes);
                }
                Err(error) => {
                    warn!(request_id = %id, error = %error, "Request cannot be sent");
                    if let Some(mut pending) = state.pending.remove(&id) {
                        pending.complete(Err(error));
                    }
                }
            }
        }

        None
    }

    /// Route one inbound frame.
    ///
    /// Never fails: malformed or unroutable messages are dropped with a
    /// diagnostic.
    pub fn resolve(&self, raw: &[u8]) -> Resolution {
        let message = match InboundMessage::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, bytes = raw.len(), "Dropping inbound message");
                return Resolution::Dropped {
                    reason: e.to_string(),
                };
            }
        };

        match message {
            InboundMessage::Response { id } => {
                let matched = {
                    let mut state = self.lock();
                    match state.pending.remove(&id) {
                        Some(mut pending) => pending.complete(Ok(Response::new(raw.to_vec()))),
                        None => false,
                    }
                };

                if matched {
                    debug!(request_id = %id, "Response matched");
                    Resolution::Completed { id }
                } else {
                    debug!(request_id = %id, "No pending request for response");
                    Resolution::Unmatched { id }
                }
            }
            InboundMessage::Notification(notification) => {
                let key = notification.key();
                let handler = self.lock().handlers.get(&key).cloned();

                let Some(handler) = handler else {
                    debug!(key = %key, "No handler for notification");
                    return Resolution::NoHandler { key };
                };

                match handler.handle(&notification) {
                    HandlerOutcome::Handled => Resolution::Notified { key },
                    HandlerOutcome::Declined => {
                        debug!(key = %key, "Handler declined notification");
                        Resolution::Declined { key }
                    }
                }
            }
        }
    }

    /// Fail every running request sent more than `timeout` before `now`.
    ///
    /// Returns the number of requests failed.
    pub fn sweep_timeouts(&self, now: Instant) -> usize {
        let mut state = self.lock();
        let expired: Vec<String> = state
            .pending
            .iter()
            .filter(|(_, pending)| pending.is_expired(now, self.timeout))
            .map(|(id, _)| id.clone())
            .collect();

        let timeout_ms = self.timeout.as_millis() as u64;
        for id in &expired {
            if let Some(mut pending) = state.pending.remove(id) {
                pending.complete(Err(RequestError::Timeout { timeout_ms }));
                warn!(request_id = %id, timeout_ms, "Request timed out");
            }
        }

        expired.len()
    }

    /// Fail every pending request, in any state, with `error` and forget
    /// anything queued for sending.
    ///
    /// Returns the number of requests failed.
    pub fn invalidate_all(&self, error: RequestError) -> usize {
        let mut state = self.lock();
        state.send_queue.clear();

        let failed = state.pending.len();
        for (_, mut pending) in state.pending.drain() {
            pending.complete(Err(error.clone()));
        }

        if failed > 0 {
            debug!(failed, reason = %error, "Pending requests invalidated");
        }
        failed
    }

    /// Register the handler for `key`, replacing any previous one.
    pub fn add_handler(&self, key: impl Into<String>, handler: Arc<dyn NotificationHandler>) {
        let key = key.into();
        debug!(key = %key, "Registering notification handler");
        self.lock().handlers.insert(key, handler);
    }

    /// Remove the handler for `key`. Returns whether one was registered.
    pub fn remove_handler(&self, key: &str) -> bool {
        self.lock().handlers.remove(key).is_some()
    }

    /// Start a background timeout sweep.
    ///
    /// This spawns a tokio task that periodically fails expired requests.
    /// The task ends on its own once the registry is dropped.
    pub fn start_sweep_task(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            loop {
                interval_timer.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.sweep_timeouts(Instant::now());
            }
        })
    }
}

impl std::fmt::Debug for RequestRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("RequestRegistry")
            .field("open", &state.open)
            .field("pending", &state.pending.len())
            .field("queued", &state.send_queue.len())
            .field("handlers", &state.handlers.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}
