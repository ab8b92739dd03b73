use std::sync::Arc;

use leastmta_common::{
    config::{DeliveryConfig, FallbackPolicy},
    envelope::{Envelope, Message},
};
use tracing::{debug, info, warn};

use crate::{
    DeliveryAttempt, DeliveryError, DeliveryTarget, DnsError, DnsResolver, MxResolver,
};

/// Delivers messages straight to the recipient domain's exchangers.
///
/// The engine holds only its configuration and resolver, so one instance can
/// serve any number of concurrent deliveries.
pub struct DeliveryEngine {
    config: DeliveryConfig,
    resolver: Arc<dyn MxResolver>,
}

impl DeliveryEngine {
    #[must_use]
    pub fn new(config: DeliveryConfig, resolver: Arc<dyn MxResolver>) -> Self {
        if !config.tls.is_disabled() && config.tls.skips_verification() {
            warn!(
                "SECURITY WARNING: outbound TLS certificate validation is disabled; \
                 set delivery.tls.certificate.insecure_skip_verify to false to enable it"
            );
        }

        Self { config, resolver }
    }

    /// Creates an engine resolving through the system's DNS configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the resolver cannot be initialised.
    pub fn from_config(config: DeliveryConfig) -> Result<Self, DnsError> {
        let resolver = DnsResolver::new(&config.dns)?;
        Ok(Self::new(config, Arc::new(resolver)))
    }

    #[must_use]
    pub const fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Delivers `body` from `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::InvalidAddress`] for a malformed address,
    /// [`DeliveryError::ResolutionFailed`] if the recipient's domain can't be
    /// resolved, or the error of the failed attempt (see [`Self::send`]).
    pub async fn deliver(&self, from: &str, to: &str, body: &[u8]) -> Result<(), DeliveryError> {
        let envelope = Envelope::new(from, to)?;
        self.send(&Message::new(envelope, body)).await
    }

    /// Delivers an already validated message.
    ///
    /// Exchangers are tried in preference order until one accepts the
    /// message. With [`FallbackPolicy::FirstTarget`] the first failure is
    /// returned straight away; with [`FallbackPolicy::AllTargets`] every
    /// exchanger is tried and the last failure is returned. A failure after
    /// the end of data was accepted is always returned straight away, since
    /// the message has already been handed over.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::ResolutionFailed`] if resolution fails, or
    /// the error of the failed attempt.
    #[tracing::instrument(
        level = "info",
        skip(self, message),
        fields(
            from = message.envelope.sender(),
            to = %message.envelope.recipient(),
            size = message.size(),
        )
    )]
    pub async fn send(&self, message: &Message) -> Result<(), DeliveryError> {
        let domain = message.envelope.recipient_domain();
        let targets = self.targets(domain).await?;

        if targets.is_empty() {
            debug!("No exchangers for {domain}, nothing to do");
            return Ok(());
        }

        info!(targets = targets.len(), "Starting delivery");

        let mut last_error = None;
        for target in &targets {
            debug!(host = %target.host, preference = target.preference, "Trying exchanger");

            let mut attempt = DeliveryAttempt::new(&self.config, target, message);
            match attempt.execute().await {
                Ok(()) => {
                    info!(host = %target.host, tls = attempt.is_tls(), "Delivery succeeded");
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        host = %target.host,
                        stage = %err.stage(),
                        temporary = err.is_temporary(),
                        "Delivery attempt failed: {err}"
                    );

                    if err.after_acceptance() {
                        warn!(
                            host = %target.host,
                            "Message was accepted before the failure, not trying other exchangers"
                        );
                        return Err(err);
                    }

                    if self.config.fallback == FallbackPolicy::FirstTarget {
                        return Err(err);
                    }
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Resolves `domain`, preferring a configured override to DNS.
    async fn targets(&self, domain: &str) -> Result<Vec<DeliveryTarget>, DeliveryError> {
        let override_host = self
            .config
            .mx_overrides
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(domain))
            .map(|(_, host)| host);

        if let Some(host) = override_host {
            debug!("Using configured exchanger {host} for {domain}");
            return Ok(vec![DeliveryTarget::new(host.as_str(), 0)]);
        }

        self.resolver
            .resolve(domain)
            .await
            .map_err(|source| DeliveryError::ResolutionFailed {
                domain: domain.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use leastmta_common::address::AddressError;

    use super::*;
    use crate::{Stage, StaticResolver};

    fn engine(resolver: StaticResolver) -> DeliveryEngine {
        DeliveryEngine::new(DeliveryConfig::default(), Arc::new(resolver))
    }

    #[tokio::test]
    async fn test_malformed_recipient_fails_before_resolution() {
        let engine = engine(StaticResolver::new());

        for to in ["", "no-at-sign", "two@@example.com", "@example.com", "user@"] {
            let err = engine.deliver("a@x.com", to, b"hello").await.unwrap_err();
            assert!(matches!(err, DeliveryError::InvalidAddress(_)), "{to}: {err}");
            assert_eq!(err.stage(), Stage::Parse);
        }

        let err = engine.deliver("", "b@y.com", b"hello").await.unwrap_err();
        assert!(matches!(
            err,
            DeliveryError::InvalidAddress(AddressError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_resolution_failure_is_reported() {
        let engine = engine(StaticResolver::new());

        let err = engine
            .deliver("a@x.com", "b@unknown.example", b"hello")
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Stage::Resolve);
        assert!(err.is_permanent());
        assert!(matches!(
            err,
            DeliveryError::ResolutionFailed { ref domain, .. } if domain == "unknown.example"
        ));
    }

    #[tokio::test]
    async fn test_empty_target_list_succeeds_without_connecting() {
        let engine = engine(StaticResolver::new().with_targets("y.com", Vec::new()));

        assert!(engine.deliver("a@x.com", "b@y.com", b"hello").await.is_ok());
    }

    #[tokio::test]
    async fn test_override_takes_precedence_over_resolver() {
        let mut config = DeliveryConfig::default();
        config
            .mx_overrides
            .insert("Y.com".to_string(), "smarthost.example".to_string());
        let engine = DeliveryEngine::new(config, Arc::new(StaticResolver::new()));

        let targets = engine.targets("y.com").await.unwrap();
        assert_eq!(targets, vec![DeliveryTarget::new("smarthost.example", 0)]);
    }
}
