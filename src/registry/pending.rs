//! Per-request lifecycle state.

use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::error::RequestError;
use crate::protocol::{Request, Response};

/// Terminal result of a request.
pub type RequestOutcome = Result<Response, RequestError>;

/// Lifecycle of a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Registered, not yet picked for writing.
    Waiting,
    /// Selected for writing; the timeout clock is running.
    Running,
    /// Terminal. No further transitions.
    Completed,
}

/// Registry-owned state for one in-flight request.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    request: Request,
    state: RequestState,
    sent_at: Option<Instant>,
    completion: watch::Sender<Option<RequestOutcome>>,
}

impl PendingRequest {
    /// Create a waiting entry and the receiver its handles observe.
    pub(crate) fn new(request: Request) -> (Self, watch::Receiver<Option<RequestOutcome>>) {
        let (completion, receiver) = watch::channel(None);
        let pending = Self {
            request,
            state: RequestState::Waiting,
            sent_at: None,
            completion,
        };
        (pending, receiver)
    }

    pub(crate) fn request(&self) -> &Request {
        &self.request
    }

    pub(crate) fn state(&self) -> RequestState {
        self.state
    }

    /// Waiting -> Running, stamping the send time. Returns `false` from
    /// any other state.
    pub(crate) fn mark_running(&mut self, now: Instant) -> bool {
        if self.state != RequestState::Waiting {
            return false;
        }
        self.state = RequestState::Running;
        self.sent_at = Some(now);
        true
    }

    /// Whether a running request has been waiting longer than `timeout`.
    pub(crate) fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        match (self.state, self.sent_at) {
            (RequestState::Running, Some(sent_at)) => {
                now.saturating_duration_since(sent_at) > timeout
            }
            _ => false,
        }
    }

    /// Move to `Completed` and publish the outcome. Returns `false`, and
    /// publishes nothing, if already completed.
    pub(crate) fn complete(&mut self, outcome: RequestOutcome) -> bool {
        if self.state == RequestState::Completed {
            return false;
        }
        self.state = RequestState::Completed;
        self.completion.send_replace(Some(outcome));
        true
    }
}

/// Receiver already holding `outcome`, for requests refused at submission.
pub(crate) fn completed_receiver(outcome: RequestOutcome) -> watch::Receiver<Option<RequestOutcome>> {
    let (_sender, receiver) = watch::channel(Some(outcome));
    receiver
}
