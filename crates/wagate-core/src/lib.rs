//! Core session + dispatch logic for the wagate messaging gateway.
//!
//! This crate is intentionally transport-agnostic. The actual messaging
//! network protocol lives behind the [`transport::Transport`] port; the HTTP
//! control surface lives in the `wagate-http` adapter crate.

pub mod config;
pub mod creds;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod lifecycle;
pub mod logging;
pub mod session;
pub mod state;
pub mod transport;

pub use errors::{Error, Result};
