//! Wire protocol module.
//!
//! Defines request/response types and message framing for the session stream.
//!
//! ## Wire Format
//!
//! Messages are length-prefixed JSON:
//! ```text
//! [4 bytes: length (big-endian u32)][JSON payload]
//! ```
//!
//! Requests carry an `id`; responses echo it. Messages from the peer with
//! no `id` are notifications, routed by `type:method`.

mod framer;
mod message;
mod request;
mod response;
mod wire;

pub use framer::{Framer, RawStream, ReadOutcome, WriteOutcome};
pub use message::{InboundMessage, Notification};
pub use request::{routing_key, Request};
pub use response::Response;
pub use wire::{encode_frame, FrameDecoder, OutboundFrame, DEFAULT_MAX_MESSAGE_SIZE, HEADER_LEN};
