//! Typed error handling for delivery operations.
//!
//! Every failure is terminal for the delivery that raised it. The variant
//! says what went wrong, [`DeliveryError::stage`] says where, and
//! [`DeliveryError::is_temporary`] tells the submitting side whether to answer
//! with a 4xx or a 5xx.

use std::{fmt, time::Duration};

use leastmta_common::address::AddressError;
use leastmta_smtp::client::{ClientError, Response};
use thiserror::Error;

use crate::DnsError;

/// The step of a delivery that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Parse,
    Resolve,
    Connect,
    Greet,
    Tls,
    Envelope,
    Transfer,
    Quit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Parse => "parse",
            Self::Resolve => "resolve",
            Self::Connect => "connect",
            Self::Greet => "greet",
            Self::Tls => "tls",
            Self::Envelope => "envelope",
            Self::Transfer => "transfer",
            Self::Quit => "quit",
        })
    }
}

/// What the remote end did to fail a step.
#[derive(Debug, Error)]
pub enum Reason {
    /// The server answered with an unexpected reply.
    #[error("{0}")]
    Reply(Response),

    /// The exchange itself failed (I/O, malformed reply, TLS handshake).
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The exchange was refused locally by configuration.
    #[error("{0}")]
    Policy(&'static str),
}

impl Reason {
    /// The reply code, if the server sent one.
    #[must_use]
    pub const fn code(&self) -> Option<u16> {
        match self {
            Self::Reply(response) => Some(response.code),
            Self::Client(err) => err.code(),
            Self::Policy(_) => None,
        }
    }

    const fn is_permanent(&self) -> bool {
        matches!(self.code(), Some(500..=599))
    }
}

/// Delivery failure, tagged with the host and stage it happened at.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The recipient (or sender) is not a usable address.
    #[error("Invalid address: {0}")]
    InvalidAddress(#[from] AddressError),

    #[error("Failed to resolve mail exchangers for {domain}: {source}")]
    ResolutionFailed {
        domain: String,
        #[source]
        source: DnsError,
    },

    #[error("Failed to connect to {host}: {source}")]
    ConnectFailed {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// The banner, `EHLO` or `HELO` was refused.
    #[error("Greeting with {host} failed: {reason}")]
    GreetingFailed { host: String, reason: Reason },

    #[error("TLS negotiation with {host} failed: {reason}")]
    TlsNegotiationFailed { host: String, reason: Reason },

    /// `MAIL FROM` or `RCPT TO` was refused.
    #[error("{host} rejected the envelope: {reason}")]
    EnvelopeRejected { host: String, reason: Reason },

    /// `DATA`, the body or `QUIT` failed.
    #[error("Transfer to {host} failed during {stage}: {reason}")]
    TransferFailed {
        host: String,
        stage: Stage,
        reason: Reason,
    },

    #[error("{stage} with {host} timed out after {after:?}")]
    Timeout {
        host: String,
        stage: Stage,
        after: Duration,
    },
}

impl DeliveryError {
    /// The step that failed.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        match self {
            Self::InvalidAddress(_) => Stage::Parse,
            Self::ResolutionFailed { .. } => Stage::Resolve,
            Self::ConnectFailed { .. } => Stage::Connect,
            Self::GreetingFailed { .. } => Stage::Greet,
            Self::TlsNegotiationFailed { .. } => Stage::Tls,
            Self::EnvelopeRejected { .. } => Stage::Envelope,
            Self::TransferFailed { stage, .. } | Self::Timeout { stage, .. } => *stage,
        }
    }

    /// The exchanger involved, if the failure happened after resolution.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        match self {
            Self::InvalidAddress(_) | Self::ResolutionFailed { .. } => None,
            Self::ConnectFailed { host, .. }
            | Self::GreetingFailed { host, .. }
            | Self::TlsNegotiationFailed { host, .. }
            | Self::EnvelopeRejected { host, .. }
            | Self::TransferFailed { host, .. }
            | Self::Timeout { host, .. } => Some(host),
        }
    }

    /// Returns `true` if the same delivery could succeed later.
    ///
    /// Malformed addresses, non-existent domains and 5xx replies are
    /// permanent; everything else (network trouble, timeouts, TLS failures,
    /// 4xx replies) is temporary.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        match self {
            Self::InvalidAddress(_) => false,
            Self::ResolutionFailed { source, .. } => source.is_temporary(),
            Self::ConnectFailed { .. } | Self::TlsNegotiationFailed { .. } | Self::Timeout { .. } => {
                true
            }
            Self::GreetingFailed { reason, .. }
            | Self::EnvelopeRejected { reason, .. }
            | Self::TransferFailed { reason, .. } => !reason.is_permanent(),
        }
    }

    /// Returns `true` if retrying would not help.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        !self.is_temporary()
    }

    /// Returns `true` if the exchanger had already accepted the message when
    /// the failure happened.
    #[must_use]
    pub const fn after_acceptance(&self) -> bool {
        matches!(self.stage(), Stage::Quit)
    }
}
