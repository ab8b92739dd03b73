//! Glue between the inbound session callbacks and the delivery engine.
//!
//! Any credentials are accepted; anonymous submissions are refused. Each
//! message is delivered before the submitter gets its reply to `DATA`, so a
//! failed delivery is reported as a rejected submission.

use std::sync::Arc;

use async_trait::async_trait;
use leastmta_common::{internal, status::Status};
use leastmta_delivery::{DeliveryEngine, DeliveryError};
use leastmta_smtp::{Backend, ConnectionState, MailParameters, SessionHandler, SmtpError};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Opens a [`RelaySession`] for every authenticated client.
pub struct RelayBackend {
    engine: Arc<DeliveryEngine>,
}

impl RelayBackend {
    #[must_use]
    pub const fn new(engine: Arc<DeliveryEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Backend for RelayBackend {
    async fn login(
        &self,
        state: &ConnectionState,
        username: &str,
        _password: &str,
    ) -> Result<Box<dyn SessionHandler>, SmtpError> {
        internal!(level = INFO, "{} authenticated as {username}", state.peer);
        Ok(Box::new(RelaySession::new(Arc::clone(&self.engine))))
    }

    async fn anonymous_login(
        &self,
        state: &ConnectionState,
    ) -> Result<Box<dyn SessionHandler>, SmtpError> {
        internal!(level = INFO, "Refusing anonymous submission from {}", state.peer);
        Err(SmtpError::auth_required())
    }
}

/// Collects one sender and one recipient, then delivers the body.
///
/// Only the most recent `RCPT TO` is kept.
pub struct RelaySession {
    engine: Arc<DeliveryEngine>,
    from: Option<String>,
    to: Option<String>,
}

impl RelaySession {
    #[must_use]
    pub const fn new(engine: Arc<DeliveryEngine>) -> Self {
        Self {
            engine,
            from: None,
            to: None,
        }
    }
}

/// Maps a failed delivery onto the reply for the submitter.
#[must_use]
pub fn reply_for(err: &DeliveryError) -> SmtpError {
    if err.is_temporary() {
        SmtpError::temporary(err.to_string())
    } else {
        SmtpError::permanent(err.to_string())
    }
}

#[async_trait]
impl SessionHandler for RelaySession {
    async fn on_sender(&mut self, from: &str, _params: &MailParameters) -> Result<(), SmtpError> {
        self.from = Some(from.to_string());
        Ok(())
    }

    async fn on_recipient(&mut self, to: &str) -> Result<(), SmtpError> {
        self.to = Some(to.to_string());
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn on_data(
        &mut self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<(), SmtpError> {
        let (Some(from), Some(to)) = (self.from.as_deref(), self.to.as_deref()) else {
            return Err(SmtpError::new(
                Status::InvalidCommandSequence,
                Some("5.5.1"),
                "Missing sender or recipient",
            ));
        };

        let mut body = Vec::new();
        reader
            .read_to_end(&mut body)
            .await
            .map_err(|err| SmtpError::temporary(format!("Failed to read message: {err}")))?;

        match self.engine.deliver(from, to, &body).await {
            Ok(()) => {
                internal!(level = INFO, "Send from {from} to {to} succeeded");
                Ok(())
            }
            Err(err) => {
                internal!(
                    level = WARN,
                    "Send from {from} to {to} failed at {}: {err}",
                    err.stage()
                );
                Err(reply_for(&err))
            }
        }
    }

    fn reset(&mut self) {
        self.from = None;
        self.to = None;
    }

    async fn logout(&mut self) -> Result<(), SmtpError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{net::SocketAddr, time::Duration};

    use leastmta_common::{address::AddressError, config::DeliveryConfig};
    use leastmta_delivery::{DnsError, Stage, StaticResolver};

    use super::*;

    fn engine() -> Arc<DeliveryEngine> {
        Arc::new(DeliveryEngine::new(
            DeliveryConfig::default(),
            Arc::new(StaticResolver::new().with_targets("empty.example", Vec::new())),
        ))
    }

    fn state() -> ConnectionState {
        ConnectionState {
            peer: SocketAddr::from(([127, 0, 0, 1], 40000)),
            hostname: "client.example".to_string(),
            tls: false,
        }
    }

    #[tokio::test]
    async fn test_any_credentials_are_accepted() {
        let backend = RelayBackend::new(engine());

        assert!(backend.login(&state(), "anyone", "anything").await.is_ok());
        assert!(backend.login(&state(), "", "").await.is_ok());
    }

    #[tokio::test]
    async fn test_anonymous_submission_is_refused() {
        let backend = RelayBackend::new(engine());

        let err = backend.anonymous_login(&state()).await.err().unwrap();
        assert_eq!(err.code, 530);
    }

    #[tokio::test]
    async fn test_last_recipient_wins_and_body_is_delivered() {
        let mut session = RelaySession::new(engine());
        session
            .on_sender("a@x.com", &MailParameters::default())
            .await
            .unwrap();
        session.on_recipient("first@nowhere.example").await.unwrap();
        session.on_recipient("b@empty.example").await.unwrap();

        let mut body: &[u8] = b"hello\r\n";
        session.on_data(&mut body).await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_forgets_the_envelope() {
        let mut session = RelaySession::new(engine());
        session
            .on_sender("a@x.com", &MailParameters::default())
            .await
            .unwrap();
        session.on_recipient("b@empty.example").await.unwrap();
        session.reset();

        let mut body: &[u8] = b"hello\r\n";
        let err = session.on_data(&mut body).await.unwrap_err();
        assert_eq!(err.code, 503);
    }

    #[tokio::test]
    async fn test_failures_map_to_reply_class() {
        let mut session = RelaySession::new(engine());
        session
            .on_sender("a@x.com", &MailParameters::default())
            .await
            .unwrap();
        session.on_recipient("b@unknown.example").await.unwrap();

        let mut body: &[u8] = b"hello\r\n";
        let err = session.on_data(&mut body).await.unwrap_err();
        assert_eq!(err.code, 554);

        let err = reply_for(&DeliveryError::Timeout {
            host: "mx.example.com".to_string(),
            stage: Stage::Greet,
            after: Duration::from_secs(10),
        });
        assert_eq!(err.code, 451);
        assert_eq!(err.enhanced.as_deref(), Some("4.4.0"));

        let err = reply_for(&DeliveryError::ResolutionFailed {
            domain: "example.com".to_string(),
            source: DnsError::Timeout("example.com".to_string()),
        });
        assert_eq!(err.code, 451);

        let err = reply_for(&DeliveryError::InvalidAddress(AddressError::Empty));
        assert_eq!(err.code, 554);
        assert_eq!(err.enhanced.as_deref(), Some("5.0.0"));
    }
}
