//! Modelbox - an intercepting sidecar proxy for LLM APIs
//!
//! Requests either pass through to a real upstream or are answered by a local
//! mock that speaks the same wire protocols. Either way every request and
//! response is recorded to an append-only JSON-lines capture log.

pub mod application;
pub mod config;
pub mod error;
pub mod proxy;

pub use application::Application;
pub use error::{Error, Result};
