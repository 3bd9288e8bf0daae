//! Notification handler trait definition.

use crate::protocol::Notification;

/// Whether a handler accepted a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    Handled,
    /// The handler could not use this message; it is dropped.
    Declined,
}

/// Receives unsolicited messages from the peer for one `type:method` key.
///
/// Handlers run on the session's event task and must not block. Any
/// closure `Fn(&Notification) -> HandlerOutcome` is a handler.
///
/// # Example
///
/// ```ignore
/// session.add_handler("chat", "message", |n: &Notification| {
///     println!("{}", n.payload["text"]);
///     HandlerOutcome::Handled
/// });
/// ```
pub trait NotificationHandler: Send + Sync {
    fn handle(&self, notification: &Notification) -> HandlerOutcome;
}

impl<F> NotificationHandler for F
where
    F: Fn(&Notification) -> HandlerOutcome + Send + Sync,
{
    fn handle(&self, notification: &Notification) -> HandlerOutcome {
        self(notification)
    }
}
