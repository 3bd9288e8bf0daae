//! Configuration module for Lumo sessions.
//!
//! Handles loading and validating session configuration from TOML files.

mod settings;

pub use settings::*;
