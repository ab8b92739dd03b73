//! Outbound delivery for the relay.
//!
//! A [`DeliveryEngine`] takes a sender, a recipient and a fully buffered body
//! and pushes the message straight to one of the recipient domain's mail
//! exchangers:
//!
//! 1. the recipient is split into local-part and domain
//! 2. the domain's exchangers are resolved ([`MxResolver`]), lowest preference
//!    first, falling back to the domain itself when it publishes no MX records
//! 3. each exchanger is tried in turn ([`DeliveryAttempt`]) until one accepts
//!    the message or the [`FallbackPolicy`] says to stop
//!
//! Nothing is queued and nothing is retried. Every failure is reported as a
//! [`DeliveryError`] tagged with the [`Stage`] it happened in.
//!
//! [`FallbackPolicy`]: leastmta_common::config::FallbackPolicy

mod attempt;
mod dns;
mod engine;
mod error;

pub use attempt::DeliveryAttempt;
pub use dns::{DeliveryTarget, DnsError, DnsResolver, MxResolver, StaticResolver};
pub use engine::DeliveryEngine;
pub use error::{DeliveryError, Reason, Stage};
