//! A single delivery attempt against one mail exchanger.
//!
//! The attempt walks the whole outbound SMTP dialogue:
//! - connect and read the banner
//! - `EHLO`, falling back to `HELO` if refused
//! - STARTTLS according to the configured [`TlsPolicy`], then `EHLO` again
//! - `MAIL FROM` (with `SIZE` when advertised) and `RCPT TO`
//! - `DATA` and the body
//! - `QUIT`
//!
//! Each exchange is bounded by its timeout and the first failure ends the
//! attempt.

use std::{future::Future, net::SocketAddr, time::Duration};

use leastmta_common::{
    config::{DeliveryConfig, TlsPolicy},
    envelope::Message,
};
use leastmta_smtp::client::{self, Response, SmtpClient};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::{DeliveryError, DeliveryTarget, Reason, Stage};

/// State of one attempt: the exchanger, the open connection once there is one
/// and whether it has been upgraded to TLS.
pub struct DeliveryAttempt<'a> {
    config: &'a DeliveryConfig,
    target: &'a DeliveryTarget,
    message: &'a Message,
    tls: bool,
}

impl<'a> DeliveryAttempt<'a> {
    #[must_use]
    pub const fn new(
        config: &'a DeliveryConfig,
        target: &'a DeliveryTarget,
        message: &'a Message,
    ) -> Self {
        Self {
            config,
            target,
            message,
            tls: false,
        }
    }

    /// Whether the connection was upgraded with STARTTLS.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        self.tls
    }

    /// Runs the full SMTP dialogue against the target.
    ///
    /// # Errors
    ///
    /// Returns the first failure, tagged with the stage it happened in.
    #[tracing::instrument(
        level = "debug",
        skip(self),
        fields(host = %self.target.host, preference = self.target.preference)
    )]
    pub async fn execute(&mut self) -> Result<(), DeliveryError> {
        let mut client = self.connect().await?;

        let mut capabilities = self.greet(&mut client).await?;
        if self.negotiate_tls(&mut client, capabilities.as_ref()).await? {
            // The server forgets everything learnt over plaintext.
            capabilities = self.introduce(&mut client).await?;
        }

        self.send_mail_from(&mut client, capabilities.as_ref()).await?;
        self.send_rcpt_to(&mut client).await?;
        self.send_message_data(&mut client).await?;
        self.quit(&mut client).await
    }

    fn host(&self) -> String {
        self.target.host.clone()
    }

    /// Bounds `step` by `limit`, turning an elapsed timer into
    /// [`DeliveryError::Timeout`].
    async fn within<T>(
        &self,
        stage: Stage,
        limit: Duration,
        step: impl Future<Output = T>,
    ) -> Result<T, DeliveryError> {
        tokio::time::timeout(limit, step)
            .await
            .map_err(|_| DeliveryError::Timeout {
                host: self.host(),
                stage,
                after: limit,
            })
    }

    fn failed(&self, stage: Stage, reason: impl Into<Reason>) -> DeliveryError {
        let host = self.host();
        let reason = reason.into();
        match stage {
            Stage::Greet => DeliveryError::GreetingFailed { host, reason },
            Stage::Tls => DeliveryError::TlsNegotiationFailed { host, reason },
            Stage::Envelope => DeliveryError::EnvelopeRejected { host, reason },
            stage => DeliveryError::TransferFailed {
                host,
                stage,
                reason,
            },
        }
    }

    /// Runs one command/reply exchange and checks the reply is `expected`.
    async fn exchange(
        &self,
        stage: Stage,
        limit: Duration,
        step: impl Future<Output = client::Result<Response>>,
        expected: fn(&Response) -> bool,
    ) -> Result<Response, DeliveryError> {
        let response = self
            .within(stage, limit, step)
            .await?
            .map_err(|err| self.failed(stage, err))?;

        if expected(&response) {
            Ok(response)
        } else {
            Err(self.failed(stage, Reason::Reply(response)))
        }
    }

    /// Opens the TCP connection.
    ///
    /// A host that parses as a socket address is used as is; anything else
    /// is connected to on the configured port.
    async fn connect(&self) -> Result<SmtpClient, DeliveryError> {
        let host = self.target.host.as_str();
        let limit = self.config.timeouts.connect();
        let (stream, server_name) = match host.parse::<SocketAddr>() {
            Ok(addr) => (
                self.within(Stage::Connect, limit, TcpStream::connect(addr))
                    .await?,
                addr.ip().to_string(),
            ),
            Err(_) => (
                self.within(Stage::Connect, limit, TcpStream::connect((host, self.config.port)))
                    .await?,
                host.to_string(),
            ),
        };

        let stream = stream.map_err(|source| DeliveryError::ConnectFailed {
            host: self.host(),
            source,
        })?;

        Ok(SmtpClient::from_stream(stream, server_name)
            .insecure_skip_verify(self.config.tls.skips_verification()))
    }

    /// Reads the banner and introduces ourselves.
    ///
    /// Returns the `EHLO` reply, or `None` if the server only took `HELO`.
    async fn greet(&self, client: &mut SmtpClient) -> Result<Option<Response>, DeliveryError> {
        let limit = self.config.timeouts.command();
        self.exchange(Stage::Greet, limit, client.read_greeting(), Response::is_success)
            .await?;

        self.introduce(client).await
    }

    async fn introduce(&self, client: &mut SmtpClient) -> Result<Option<Response>, DeliveryError> {
        let limit = self.config.timeouts.command();
        let domain = self.config.helo_domain.as_str();

        let ehlo = self
            .within(Stage::Greet, limit, client.ehlo(domain))
            .await?
            .map_err(|err| self.failed(Stage::Greet, err))?;
        if ehlo.is_success() {
            return Ok(Some(ehlo));
        }

        debug!(host = %self.target.host, code = ehlo.code, "EHLO refused, falling back to HELO");
        self.exchange(Stage::Greet, limit, client.helo(domain), Response::is_success)
            .await?;
        Ok(None)
    }

    /// Upgrades the connection if the policy and the server's capabilities
    /// call for it.
    ///
    /// Returns `true` if the connection is now encrypted. A refused or failed
    /// upgrade fails the attempt; there is no plaintext reconnect.
    async fn negotiate_tls(
        &mut self,
        client: &mut SmtpClient,
        capabilities: Option<&Response>,
    ) -> Result<bool, DeliveryError> {
        let advertised = capabilities.is_some_and(|ehlo| ehlo.has_extension("STARTTLS"));

        match (self.config.tls.policy, advertised) {
            (TlsPolicy::Disabled, _) | (TlsPolicy::Opportunistic, false) => {
                debug!(host = %self.target.host, advertised, "Continuing without TLS");
                return Ok(false);
            }
            (TlsPolicy::Required, false) => {
                return Err(self.failed(
                    Stage::Tls,
                    Reason::Policy("STARTTLS is required but the server does not offer it"),
                ));
            }
            (TlsPolicy::Opportunistic | TlsPolicy::Required, true) => {}
        }

        if self.config.tls.skips_verification() {
            warn!(
                host = %self.target.host,
                "SECURITY WARNING: TLS certificate validation is disabled for this connection"
            );
        }

        self.exchange(
            Stage::Tls,
            self.config.timeouts.command(),
            client.starttls(),
            Response::is_success,
        )
        .await?;

        self.tls = client.is_tls();
        debug!(host = %self.target.host, "TLS successfully negotiated via STARTTLS");
        Ok(self.tls)
    }

    async fn send_mail_from(
        &self,
        client: &mut SmtpClient,
        capabilities: Option<&Response>,
    ) -> Result<(), DeliveryError> {
        let size = capabilities
            .is_some_and(|ehlo| ehlo.has_extension("SIZE"))
            .then_some(self.message.size());

        self.exchange(
            Stage::Envelope,
            self.config.timeouts.command(),
            client.mail_from(self.message.envelope.sender(), size),
            Response::is_success,
        )
        .await
        .map(drop)
    }

    async fn send_rcpt_to(&self, client: &mut SmtpClient) -> Result<(), DeliveryError> {
        let recipient = self.message.envelope.recipient().to_string();

        self.exchange(
            Stage::Envelope,
            self.config.timeouts.command(),
            client.rcpt_to(&recipient),
            Response::is_success,
        )
        .await
        .map(drop)
    }

    async fn send_message_data(&self, client: &mut SmtpClient) -> Result<(), DeliveryError> {
        let limit = self.config.timeouts.data();

        self.exchange(Stage::Transfer, limit, client.data(), Response::is_intermediate)
            .await?;

        self.exchange(
            Stage::Transfer,
            limit,
            client.send_data(&self.message.body),
            Response::is_success,
        )
        .await
        .map(drop)
    }

    /// Ends the session. The message has been accepted at this point; a
    /// failure here is reported at [`Stage::Quit`] so the engine does not
    /// hand it to another exchanger.
    async fn quit(&self, client: &mut SmtpClient) -> Result<(), DeliveryError> {
        self.exchange(
            Stage::Quit,
            self.config.timeouts.command(),
            client.quit(),
            Response::is_success,
        )
        .await
        .map(drop)
    }
}
