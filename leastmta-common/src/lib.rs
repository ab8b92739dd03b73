//! Types shared by every part of the relay: addresses, the message data
//! model, reply codes, configuration and logging.

pub mod address;
pub mod config;
pub mod envelope;
pub mod logging;
pub mod status;

pub use tracing;

/// Broadcast to listeners and sessions to coordinate shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}
