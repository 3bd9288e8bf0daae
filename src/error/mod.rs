//! Error types for the Lumo session client.
//!
//! Provides a unified error handling system using thiserror.

mod types;

pub use types::*;
