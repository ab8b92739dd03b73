use leastmta_common::{internal, status::Status, tracing};
use tokio::io::{AsyncRead, AsyncWrite};

use super::{Session, State};
use crate::{
    command::{Command, HeloVariant, MailParameters},
    error::{ConnectionError, ConnectionResult},
    extensions::{AUTH_MECHANISMS, Extension},
};

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Session<Stream> {
    /// Executes one command. Returns `true` when the connection should be
    /// closed.
    pub(super) async fn handle(&mut self, command: Command) -> ConnectionResult<bool> {
        match command {
            Command::Helo(variant) => self.helo(variant).await?,
            Command::Auth {
                mechanism,
                initial_response,
            } => self.auth(&mechanism, initial_response).await?,
            Command::MailFrom(from, params) => self.mail_from(&from, &params).await?,
            Command::RcptTo(to) => self.rcpt_to(&to).await?,
            Command::Data => self.data().await?,
            Command::Rset => {
                self.reset_transaction();
                self.reply(Status::Ok, Some("2.0.0"), "Session reset").await?;
            }
            Command::Noop => self.reply(Status::Ok, Some("2.0.0"), "OK").await?,
            Command::StartTls => self.starttls().await?,
            Command::Quit => {
                self.reply(Status::GoodBye, Some("2.0.0"), "Bye").await?;
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// What this connection offers right now.
    pub(super) fn extensions(&self) -> Vec<Extension> {
        let mut extensions = vec![
            Extension::EightBitMime,
            Extension::Size(self.config.max_message_bytes),
        ];

        if self.config.tls.is_some() && !self.is_tls() {
            extensions.push(Extension::StartTls);
        }

        if self.is_tls() || self.config.allow_insecure_auth {
            extensions.push(Extension::Auth(AUTH_MECHANISMS));
        }

        extensions
    }

    async fn helo(&mut self, variant: HeloVariant) -> ConnectionResult<()> {
        self.reset_transaction();
        self.state = State::Greeted;

        let greeting = format!("{} Hello {}", self.config.banner, variant.identity());
        let lines = match variant {
            HeloVariant::Ehlo(_) => std::iter::once(greeting)
                .chain(self.extensions().iter().map(ToString::to_string))
                .collect::<Vec<_>>(),
            HeloVariant::Helo(_) => vec![greeting],
        };
        self.helo = Some(variant);

        self.reply_lines(Status::Ok, &lines).await
    }

    async fn auth(&mut self, mechanism: &str, initial: Option<String>) -> ConnectionResult<()> {
        if self.helo.is_none() {
            return self
                .reply(Status::InvalidCommandSequence, Some("5.5.1"), "Please introduce yourself first")
                .await;
        }

        if self.authenticated {
            return self
                .reply(Status::InvalidCommandSequence, Some("5.5.1"), "Already authenticated")
                .await;
        }

        if matches!(self.state, State::MailFrom | State::RcptTo) {
            return self
                .reply(
                    Status::InvalidCommandSequence,
                    Some("5.5.1"),
                    "AUTH not permitted during a mail transaction",
                )
                .await;
        }

        if !self.is_tls() && !self.config.allow_insecure_auth {
            return self
                .reply(Status::EncryptionRequired, Some("5.7.10"), "TLS is required")
                .await;
        }

        let (username, password) = match self.credentials(mechanism, initial).await? {
            Ok(credentials) => credentials,
            Err(err) => return self.reply_error(&err).await,
        };

        match self
            .backend
            .login(&self.connection_state(), &username, &password)
            .await
        {
            Ok(handler) => {
                internal!(level = DEBUG, "Authenticated as {username}");
                self.handler = Some(handler);
                self.authenticated = true;
                self.reply(Status::AuthSucceeded, Some("2.7.0"), "Authentication succeeded")
                    .await
            }
            Err(err) => {
                internal!(level = INFO, "Authentication failed for {username}: {err}");
                self.reply_error(&err).await
            }
        }
    }

    async fn mail_from(&mut self, from: &str, params: &MailParameters) -> ConnectionResult<()> {
        if self.helo.is_none() {
            return self
                .reply(Status::InvalidCommandSequence, Some("5.5.1"), "Please introduce yourself first")
                .await;
        }

        if matches!(self.state, State::MailFrom | State::RcptTo) {
            return self
                .reply(Status::InvalidCommandSequence, Some("5.5.1"), "Nested MAIL command")
                .await;
        }

        if let Some(size) = params.size()
            && size > self.config.max_message_bytes
        {
            return self
                .reply(
                    Status::ExceededStorage,
                    Some("5.3.4"),
                    format!(
                        "Declared message size {size} bytes exceeds maximum allowed size {} bytes",
                        self.config.max_message_bytes
                    ),
                )
                .await;
        }

        if self.handler.is_none() {
            match self.backend.anonymous_login(&self.connection_state()).await {
                Ok(handler) => self.handler = Some(handler),
                Err(err) => return self.reply_error(&err).await,
            }
        }

        let Some(handler) = self.handler.as_mut() else {
            return Err(ConnectionError::Closed);
        };

        match handler.on_sender(from, params).await {
            Ok(()) => {
                self.state = State::MailFrom;
                self.reply(Status::Ok, Some("2.0.0"), format!("Roger, accepting mail from <{from}>"))
                    .await
            }
            Err(err) => self.reply_error(&err).await,
        }
    }

    async fn rcpt_to(&mut self, to: &str) -> ConnectionResult<()> {
        if !matches!(self.state, State::MailFrom | State::RcptTo) {
            return self
                .reply(Status::InvalidCommandSequence, Some("5.5.1"), "Missing MAIL FROM command")
                .await;
        }

        if self.recipients >= self.config.max_recipients {
            return self
                .reply(Status::InsufficientStorage, Some("4.5.3"), "Too many recipients")
                .await;
        }

        let Some(handler) = self.handler.as_mut() else {
            return Err(ConnectionError::Closed);
        };

        match handler.on_recipient(to).await {
            Ok(()) => {
                self.recipients += 1;
                self.state = State::RcptTo;
                self.reply(Status::Ok, Some("2.0.0"), format!("I'll make sure <{to}> gets this"))
                    .await
            }
            Err(err) => self.reply_error(&err).await,
        }
    }

    async fn data(&mut self) -> ConnectionResult<()> {
        if self.state != State::RcptTo {
            return self
                .reply(Status::InvalidCommandSequence, Some("5.5.1"), "Missing RCPT TO command")
                .await;
        }

        self.reply(
            Status::StartMailInput,
            None,
            "Start mail input; end with <CR><LF>.<CR><LF>",
        )
        .await?;

        let body = match self.read_data().await {
            Ok(body) => body,
            Err(ConnectionError::LineTooLong(_)) => {
                self.reply(Status::ExceededStorage, Some("5.3.4"), "Maximum message size exceeded")
                    .await?;
                return Err(ConnectionError::LineTooLong(self.config.max_message_bytes));
            }
            Err(err) => return Err(err),
        };

        let result = match body {
            None => {
                self.reply(Status::ExceededStorage, Some("5.3.4"), "Maximum message size exceeded")
                    .await
            }
            Some(body) => {
                tracing::debug!(bytes = body.len(), "Message data received");

                let Some(handler) = self.handler.as_mut() else {
                    return Err(ConnectionError::Closed);
                };

                let mut reader: &[u8] = &body;
                match handler.on_data(&mut reader).await {
                    Ok(()) => self.reply(Status::Ok, Some("2.0.0"), "OK: queued").await,
                    Err(err) => self.reply_error(&err).await,
                }
            }
        };

        self.reset_transaction();
        result
    }

    async fn starttls(&mut self) -> ConnectionResult<()> {
        let Some(acceptor) = self.config.tls.clone() else {
            return self
                .reply(Status::NotImplemented, Some("5.5.1"), "TLS not supported")
                .await;
        };

        if self.is_tls() {
            return self
                .reply(Status::NotImplemented, Some("5.5.1"), "Already running in TLS")
                .await;
        }

        self.reply(Status::ServiceReady, Some("2.0.0"), "Ready to start TLS")
            .await?;

        let connection = self.connection.take().ok_or(ConnectionError::Closed)?;
        let (connection, info) =
            tokio::time::timeout(self.config.timeouts.read(), connection.upgrade(&acceptor))
                .await
                .map_err(|_| ConnectionError::Timeout)??;
        self.connection = Some(connection);

        internal!(
            level = DEBUG,
            "Connection upgraded with {} {}",
            info.proto(),
            info.cipher()
        );

        // RFC 3207 Section 4.2: forget everything learned before the handshake.
        if let Some(mut handler) = self.handler.take()
            && let Err(err) = handler.logout().await
        {
            internal!(level = WARN, "Logout failed: {err}");
        }
        self.authenticated = false;
        self.helo = None;
        self.recipients = 0;
        self.state = State::Connected;

        Ok(())
    }
}
