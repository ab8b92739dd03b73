//! End-to-end test harness for the relay
//!
//! Starts a complete relay on a random loopback port together with a mock
//! SMTP server that plays the recipient domain's exchanger.
//!
//! # Example
//!
//! ```no_run
//! use support::harness::E2ETestHarness;
//!
//! #[tokio::test]
//! async fn test_delivery() {
//!     let harness = E2ETestHarness::builder()
//!         .with_test_domain("test.example.com")
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     let reply = harness
//!         .send_email(
//!             "sender@example.org",
//!             "recipient@test.example.com",
//!             b"Subject: Test\r\n\r\nHello\r\n",
//!         )
//!         .await
//!         .unwrap();
//!     assert_eq!(reply.code, 250);
//!
//!     harness.shutdown().await;
//! }
//! ```

#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use leastmta::LeastMta;
use leastmta_common::{
    Signal,
    config::{ClientTimeouts, MtaConfig},
};
use leastmta_delivery::{DeliveryEngine, DeliveryTarget, StaticResolver};
use leastmta_smtp::client::{Response, SmtpClient};
use tokio::{sync::broadcast, task::JoinHandle, time::timeout};

use super::mock_server::{MockSmtpServer, MockSmtpServerBuilder, SmtpCommand};

/// Credentials used by [`E2ETestHarness::send_email`]; the relay accepts any.
pub const USERNAME: &str = "submitter";
pub const PASSWORD: &str = "hunter2";

/// A running relay plus the mock exchanger it delivers to.
///
/// Only the test domain resolves; every other domain is reported as
/// non-existent.
pub struct E2ETestHarness {
    /// Address the relay accepts submissions on
    smtp_addr: SocketAddr,

    /// Mock destination SMTP server
    mock_server: MockSmtpServer,

    /// Handle for the relay's listener task
    relay_handle: JoinHandle<anyhow::Result<()>>,

    /// Shutdown signal broadcaster
    shutdown_tx: broadcast::Sender<Signal>,
}

impl E2ETestHarness {
    #[must_use]
    pub fn builder() -> E2ETestHarnessBuilder {
        E2ETestHarnessBuilder::new()
    }

    #[must_use]
    pub const fn smtp_addr(&self) -> SocketAddr {
        self.smtp_addr
    }

    #[must_use]
    pub const fn mock_addr(&self) -> SocketAddr {
        self.mock_server.addr()
    }

    /// Connects to the relay, reads the banner and introduces itself.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or the greeting fails.
    pub async fn client(&self) -> anyhow::Result<SmtpClient> {
        let mut client = SmtpClient::connect(self.smtp_addr, "localhost").await?;

        let greeting = client.read_greeting().await?;
        anyhow::ensure!(greeting.code == 220, "Unexpected greeting: {greeting}");

        let ehlo = client.ehlo("test-client").await?;
        anyhow::ensure!(ehlo.is_success(), "EHLO refused: {ehlo}");

        Ok(client)
    }

    /// Authenticates, submits one message and returns the relay's reply to
    /// the end of data.
    ///
    /// # Errors
    ///
    /// Returns an error if any step before the end of data is refused.
    pub async fn send_email(&self, from: &str, to: &str, body: &[u8]) -> anyhow::Result<Response> {
        let mut client = self.client().await?;

        let auth = client.auth_plain(USERNAME, PASSWORD).await?;
        anyhow::ensure!(auth.code == 235, "AUTH refused: {auth}");

        let mail = client.mail_from(from, None).await?;
        anyhow::ensure!(mail.is_success(), "MAIL FROM refused: {mail}");

        let rcpt = client.rcpt_to(to).await?;
        anyhow::ensure!(rcpt.is_success(), "RCPT TO refused: {rcpt}");

        let data = client.data().await?;
        anyhow::ensure!(data.is_intermediate(), "DATA refused: {data}");

        let reply = client.send_data(body).await?;
        client.quit().await?;

        Ok(reply)
    }

    /// Get all commands received by the mock server
    pub async fn mock_commands(&self) -> Vec<SmtpCommand> {
        self.mock_server.commands().await
    }

    /// Message bodies the mock server accepted
    pub async fn delivered(&self) -> Vec<Vec<u8>> {
        self.mock_server.messages().await
    }

    #[must_use]
    pub fn mock_connections(&self) -> usize {
        self.mock_server.connections()
    }

    /// Stops the relay and the mock server.
    ///
    /// # Panics
    ///
    /// Panics if the relay does not stop within 5 seconds or stops with an
    /// error.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(Signal::Shutdown);
        self.mock_server.shutdown();

        timeout(Duration::from_secs(5), self.relay_handle)
            .await
            .expect("relay did not stop")
            .expect("relay task panicked")
            .expect("relay stopped with an error");
    }
}

/// Builder for configuring an E2E test harness
pub struct E2ETestHarnessBuilder {
    /// Test domain to route to mock server
    test_domain: String,

    /// Identity of the relay
    relay_domain: String,

    /// Applied to the default mock server before it starts
    mock: Box<dyn FnOnce(MockSmtpServerBuilder) -> MockSmtpServerBuilder + Send>,

    /// Adjusts the relay configuration before it starts
    configure: Box<dyn FnOnce(&mut MtaConfig) + Send>,
}

impl E2ETestHarnessBuilder {
    fn new() -> Self {
        Self {
            test_domain: "test.example.com".to_string(),
            relay_domain: "relay.example.org".to_string(),
            mock: Box::new(|mock| mock),
            configure: Box::new(|_| {}),
        }
    }

    /// Set the test domain that will be routed to the mock server
    #[must_use]
    pub fn with_test_domain(mut self, domain: impl Into<String>) -> Self {
        self.test_domain = domain.into();
        self
    }

    #[must_use]
    pub fn with_relay_domain(mut self, domain: impl Into<String>) -> Self {
        self.relay_domain = domain.into();
        self
    }

    /// Customise the mock exchanger, e.g. to reject recipients
    #[must_use]
    pub fn with_mock(
        mut self,
        mock: impl FnOnce(MockSmtpServerBuilder) -> MockSmtpServerBuilder + Send + 'static,
    ) -> Self {
        self.mock = Box::new(mock);
        self
    }

    /// Configure mock server to reject RCPT TO commands
    #[must_use]
    pub fn with_mock_rcpt_rejection(self) -> Self {
        self.with_mock(|mock| mock.with_rcpt_to_response(550, "5.1.1 User unknown"))
    }

    #[must_use]
    pub fn with_config(mut self, configure: impl FnOnce(&mut MtaConfig) + Send + 'static) -> Self {
        self.configure = Box::new(configure);
        self
    }

    /// Starts the mock exchanger, then a relay whose resolver points the
    /// test domain at it.
    ///
    /// # Errors
    ///
    /// Returns an error if any component fails to start.
    pub async fn build(self) -> anyhow::Result<E2ETestHarness> {
        let mock_server = (self.mock)(MockSmtpServer::builder()).build().await?;

        let mut config = MtaConfig {
            listen: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..MtaConfig::default()
        };
        config.set_domain(self.relay_domain);
        config.delivery.timeouts = ClientTimeouts::uniform(Duration::from_secs(2));
        (self.configure)(&mut config);
        config.validate()?;

        let resolver = StaticResolver::new().with_targets(
            self.test_domain,
            vec![DeliveryTarget::new(mock_server.addr().to_string(), 10)],
        );
        let engine = DeliveryEngine::new(config.delivery.clone(), Arc::new(resolver));
        let relay = LeastMta::with_engine(config, engine);

        let listener = relay.bind().await?;
        let smtp_addr = listener.local_addr()?;
        let shutdown_tx = relay.shutdown_handle();

        let relay_handle = tokio::spawn(async move { relay.serve(listener).await });
        while shutdown_tx.receiver_count() == 0 {
            tokio::task::yield_now().await;
        }

        Ok(E2ETestHarness {
            smtp_addr,
            mock_server,
            relay_handle,
            shutdown_tx,
        })
    }
}
