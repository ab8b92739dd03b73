//! Error types for the inbound server.

use std::{fmt, io};

use leastmta_common::status::Status;
use thiserror::Error;

/// A reply-carrying error returned by a [`crate::backend::Backend`] or
/// [`crate::backend::SessionHandler`].
///
/// The session writes it to the client verbatim and carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct SmtpError {
    pub code: u16,
    /// RFC 3463 enhanced status code, e.g. `5.7.0`.
    pub enhanced: Option<String>,
    pub message: String,
}

impl SmtpError {
    pub fn new(code: impl Into<u16>, enhanced: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            enhanced: enhanced.map(str::to_string),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn auth_required() -> Self {
        Self::new(Status::AuthRequired, Some("5.7.0"), "Authentication required")
    }

    #[must_use]
    pub fn auth_failed() -> Self {
        Self::new(
            Status::AuthFailed,
            Some("5.7.8"),
            "Authentication credentials invalid",
        )
    }

    /// `451 4.4.0`
    pub fn temporary(message: impl Into<String>) -> Self {
        Self::new(Status::ActionAborted, Some("4.4.0"), message)
    }

    /// `554 5.0.0`
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(Status::TransactionFailed, Some("5.0.0"), message)
    }
}

impl fmt::Display for SmtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.enhanced {
            Some(enhanced) => write!(f, "{} {enhanced} {}", self.code, self.message),
            None => write!(f, "{} {}", self.code, self.message),
        }
    }
}

/// Errors that end an inbound connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed by peer")]
    Closed,

    #[error("Timed out waiting for the client")]
    Timeout,

    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),

    #[error(transparent)]
    Tls(#[from] TlsError),
}

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to load TLS certificate from {path}: {source}")]
    CertificateLoad {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to load TLS private key from {path}: {reason}")]
    KeyLoad { path: String, reason: String },

    #[error("TLS error: {0}")]
    Rustls(String),
}

impl From<tokio_rustls::rustls::Error> for TlsError {
    fn from(err: tokio_rustls::rustls::Error) -> Self {
        Self::Rustls(err.to_string())
    }
}

pub type ConnectionResult<T> = std::result::Result<T, ConnectionError>;

pub type TlsResult<T> = std::result::Result<T, TlsError>;
