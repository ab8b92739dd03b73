//! One inbound SMTP conversation.
//!
//! A [`Session`] owns the client's connection for its whole lifetime: it
//! sends the banner, reads commands one line at a time, enforces command
//! ordering and the configured limits, and forwards the envelope and body
//! to the [`SessionHandler`] obtained from the [`Backend`].

use std::{fmt, net::SocketAddr, sync::Arc};

use leastmta_common::{
    Signal,
    config::{MtaConfig, ServerTimeouts},
    internal,
    status::Status,
    tracing,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::broadcast::error::RecvError,
};
use tokio_rustls::TlsAcceptor;

use crate::{
    backend::{Backend, ConnectionState, SessionHandler},
    command::{Command, CommandError, HeloVariant},
    connection::{Connection, tls_acceptor},
    error::{ConnectionError, ConnectionResult, TlsResult},
};

mod auth;
mod commands;
mod io;

/// Longest command line accepted, including CRLF.
pub(crate) const MAX_LINE_LENGTH: usize = 2048;

#[derive(Clone)]
pub struct SessionConfig {
    /// Server identity used in the banner and the `EHLO` reply.
    pub banner: String,
    pub max_message_bytes: usize,
    pub max_recipients: usize,
    pub allow_insecure_auth: bool,
    pub timeouts: ServerTimeouts,
    /// Offered as STARTTLS when present.
    pub tls: Option<TlsAcceptor>,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("banner", &self.banner)
            .field("max_message_bytes", &self.max_message_bytes)
            .field("max_recipients", &self.max_recipients)
            .field("allow_insecure_auth", &self.allow_insecure_auth)
            .field("timeouts", &self.timeouts)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

impl SessionConfig {
    #[must_use]
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Derives the inbound settings from the relay configuration, loading
    /// the STARTTLS certificate if one is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate or key can't be loaded.
    pub fn from_mta(config: &MtaConfig) -> TlsResult<Self> {
        let tls = config.tls.as_ref().map(tls_acceptor).transpose()?;

        Ok(Self::builder()
            .with_banner(config.domain.clone())
            .with_max_message_bytes(config.max_message_bytes)
            .with_max_recipients(config.max_recipients)
            .with_allow_insecure_auth(config.allow_insecure_auth)
            .with_timeouts(config.timeouts.clone())
            .with_tls(tls)
            .build())
    }
}

#[derive(Debug)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        let defaults = MtaConfig::default();

        Self {
            config: SessionConfig {
                banner: defaults.domain,
                max_message_bytes: defaults.max_message_bytes,
                max_recipients: defaults.max_recipients,
                allow_insecure_auth: defaults.allow_insecure_auth,
                timeouts: defaults.timeouts,
                tls: None,
            },
        }
    }
}

impl SessionConfigBuilder {
    #[must_use]
    pub fn with_banner(mut self, banner: impl Into<String>) -> Self {
        self.config.banner = banner.into();
        self
    }

    #[must_use]
    pub const fn with_max_message_bytes(mut self, max: usize) -> Self {
        self.config.max_message_bytes = max;
        self
    }

    #[must_use]
    pub const fn with_max_recipients(mut self, max: usize) -> Self {
        self.config.max_recipients = max;
        self
    }

    #[must_use]
    pub const fn with_allow_insecure_auth(mut self, allow: bool) -> Self {
        self.config.allow_insecure_auth = allow;
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: ServerTimeouts) -> Self {
        self.config.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn with_tls(mut self, tls: Option<TlsAcceptor>) -> Self {
        self.config.tls = tls;
        self
    }

    #[must_use]
    pub fn build(self) -> SessionConfig {
        self.config
    }
}

/// Where the conversation is. `EHLO`, `RSET` and a completed `DATA` return
/// to `Greeted`; `STARTTLS` returns to `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Connected,
    Greeted,
    MailFrom,
    RcptTo,
}

pub struct Session<Stream: AsyncRead + AsyncWrite + Unpin + Send> {
    peer: SocketAddr,
    connection: Option<Connection<Stream>>,
    config: Arc<SessionConfig>,
    backend: Arc<dyn Backend>,
    state: State,
    helo: Option<HeloVariant>,
    handler: Option<Box<dyn SessionHandler>>,
    authenticated: bool,
    recipients: usize,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Session<Stream> {
    pub fn create(
        stream: Stream,
        peer: SocketAddr,
        config: Arc<SessionConfig>,
        backend: Arc<dyn Backend>,
    ) -> Self {
        Self {
            peer,
            connection: Some(Connection::new(stream)),
            config,
            backend,
            state: State::Connected,
            helo: None,
            handler: None,
            authenticated: false,
            recipients: 0,
        }
    }

    /// Drives the conversation until the client quits, disconnects, times
    /// out, or `signal` announces a shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails or times out. Replies the
    /// client merely didn't like are not errors.
    #[tracing::instrument(level = "trace", skip_all, fields(peer = %self.peer))]
    pub async fn run(
        mut self,
        mut signal: tokio::sync::broadcast::Receiver<Signal>,
    ) -> ConnectionResult<()> {
        internal!("Connected");

        let greeting = format!("{} ESMTP Service Ready", self.config.banner);
        let mut result = self.reply(Status::ServiceReady, None, greeting).await;
        if result.is_ok() {
            result = self.serve(&mut signal).await;
        }

        if matches!(result, Err(ConnectionError::Timeout)) {
            tracing::warn!(peer = %self.peer, "Client connection timed out");
            if let Err(err) = self
                .reply(Status::Unavailable, Some("4.4.2"), "Idle timeout, closing connection")
                .await
            {
                tracing::debug!(peer = %self.peer, "Failed to send timeout reply: {err}");
            }
        }

        if let Some(mut handler) = self.handler.take()
            && let Err(err) = handler.logout().await
        {
            internal!(level = WARN, "Logout failed: {err}");
        }

        internal!("Connection closed");
        result
    }

    async fn serve(
        &mut self,
        signal: &mut tokio::sync::broadcast::Receiver<Signal>,
    ) -> ConnectionResult<()> {
        let mut line = Vec::with_capacity(512);

        loop {
            let received = tokio::select! {
                sig = signal.recv() => match sig {
                    Ok(Signal::Shutdown) | Err(RecvError::Closed) => None,
                    _ => continue,
                },
                read = self.read_line(&mut line, MAX_LINE_LENGTH) => Some(read),
            };

            let Some(received) = received else {
                internal!(level = INFO, "Received shutdown signal, closing connection");
                return self
                    .reply(Status::Unavailable, Some("4.3.0"), "Server shutting down")
                    .await;
            };

            match received {
                Ok(0) => return Ok(()),
                Ok(_) => {}
                Err(ConnectionError::LineTooLong(limit)) => {
                    return self
                        .reply(
                            Status::SyntaxError,
                            Some("5.5.2"),
                            format!("Line too long, limit is {limit} bytes"),
                        )
                        .await;
                }
                Err(err) => return Err(err),
            }

            let command = Command::try_from(trim_line(&line));
            line.clear();

            match command {
                Ok(command) => {
                    leastmta_common::incoming!("{command}");
                    if self.handle(command).await? {
                        return Ok(());
                    }
                }
                Err(CommandError::Unrecognized(command)) => {
                    leastmta_common::incoming!("{command}");
                    self.reply(Status::SyntaxError, Some("5.5.2"), CommandError::Unrecognized(command))
                        .await?;
                }
                Err(CommandError::Syntax(reason)) => {
                    self.reply(Status::ParameterError, Some("5.5.4"), reason)
                        .await?;
                }
            }
        }
    }

    fn connection_state(&self) -> ConnectionState {
        ConnectionState {
            peer: self.peer,
            hostname: self
                .helo
                .as_ref()
                .map(|helo| helo.identity().to_string())
                .unwrap_or_default(),
            tls: self.is_tls(),
        }
    }

    fn is_tls(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_tls)
    }

    fn reset_transaction(&mut self) {
        if let Some(handler) = self.handler.as_mut() {
            handler.reset();
        }
        self.recipients = 0;
        if self.state != State::Connected {
            self.state = State::Greeted;
        }
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
