//! Real-time event observation for the Sapliy CLI.
//!
//! Two independent paths share the filtering and rendering code:
//!
//! - push: [`http_server`] accepts webhook deliveries, verifies their HMAC
//!   signature ([`verification`]) and prints them;
//! - pull: [`poller`] polls the events API with a cursor and prints new events.

pub mod config;
pub mod errors;
pub mod http_server;
pub mod pattern;
pub mod poller;
pub mod render;
pub mod telemetry;
pub mod types;
pub mod verification;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::{Args, Config, ListenerSettings, PollerSettings};
pub use errors::{Error, Result};
