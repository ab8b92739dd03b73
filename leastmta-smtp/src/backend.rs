//! The seam between the protocol engine and whatever accepts the mail.
//!
//! A [`Backend`] authenticates a client and hands back a
//! [`SessionHandler`], which then receives the envelope and the message body
//! for each transaction on that connection.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::{command::MailParameters, error::SmtpError};

/// What the server knows about a connection when it asks the backend to log
/// a client in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    pub peer: SocketAddr,
    /// The identity from the client's `EHLO`/`HELO`.
    pub hostname: String,
    pub tls: bool,
}

#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Called for `AUTH` with the decoded credentials.
    ///
    /// # Errors
    ///
    /// The returned error is sent to the client as the `AUTH` reply.
    async fn login(
        &self,
        state: &ConnectionState,
        username: &str,
        password: &str,
    ) -> Result<Box<dyn SessionHandler>, SmtpError>;

    /// Called when a client starts a transaction without authenticating.
    ///
    /// # Errors
    ///
    /// The returned error is sent to the client as the `MAIL` reply.
    async fn anonymous_login(
        &self,
        state: &ConnectionState,
    ) -> Result<Box<dyn SessionHandler>, SmtpError>;
}

/// Receives one logged-in client's transactions.
#[async_trait]
pub trait SessionHandler: Send {
    /// `MAIL FROM`; `from` is empty for the null sender.
    async fn on_sender(&mut self, from: &str, params: &MailParameters) -> Result<(), SmtpError>;

    /// `RCPT TO`, once per recipient.
    async fn on_recipient(&mut self, to: &str) -> Result<(), SmtpError>;

    /// The message body, dot-unstuffed and without the end-of-data marker.
    async fn on_data(&mut self, reader: &mut (dyn AsyncRead + Unpin + Send)) -> Result<(), SmtpError>;

    /// Discards the current transaction (`RSET`, a new `EHLO`, or a finished
    /// `DATA`).
    fn reset(&mut self);

    /// The client is leaving. Errors are logged, not sent.
    async fn logout(&mut self) -> Result<(), SmtpError>;
}
