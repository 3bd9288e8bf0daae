//! Session lifecycle.
//!
//! A [`Session`] owns one TCP connection and the request registry that
//! correlates traffic on it.

mod client;
mod connection;

pub use client::{Session, SessionEvent};
pub use connection::EndReason;
