//! Lumo Session Library
//!
//! Client side of a message-oriented TCP protocol. Messages are JSON
//! objects framed with a 4-byte big-endian length prefix. A [`Session`]
//! correlates requests with responses by id, routes unsolicited
//! notifications to handlers by `type:method`, and fails requests that
//! outlive their timeout.
//!
//! ```ignore
//! let session = Session::open("127.0.0.1", 9000).await?;
//! let pong = session.request("rpc", "ping", Map::new()).response_json().await?;
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod registry;
pub mod session;

pub use config::Settings;
pub use error::{RequestError, SessionError, SessionResult};
pub use protocol::{Notification, Request, Response};
pub use registry::{CompletionHandle, HandlerOutcome, NotificationHandler};
pub use session::{EndReason, Session, SessionEvent};
