//! The relay itself: inbound submissions are handed to the delivery engine
//! and the outcome becomes the reply to the submitter.

pub mod controller;
pub mod relay;

pub use controller::LeastMta;
pub use relay::{RelayBackend, RelaySession};
