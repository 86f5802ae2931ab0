//! Shared error foundation used across all agentim crates.

pub mod error;

pub use error::{Error, FromMessage, Result};
