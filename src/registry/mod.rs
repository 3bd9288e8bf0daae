//! Request correlation and dispatch.
//!
//! The [`RequestRegistry`] owns every in-flight request of a session,
//! hands the connection the next request to write, and routes inbound
//! frames to the matching [`CompletionHandle`] or notification handler.

mod handle;
mod handler;
mod pending;
mod requests;

pub use handle::CompletionHandle;
pub use handler::{HandlerOutcome, NotificationHandler};
pub use pending::{RequestOutcome, RequestState};
pub use requests::{RequestRegistry, Resolution};
