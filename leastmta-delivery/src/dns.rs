//! Mail exchanger resolution.
//!
//! Looks up the MX records of a recipient domain and turns them into an
//! ordered list of [`DeliveryTarget`]s. A domain that exists but publishes no
//! MX records yields a single target naming the domain itself, so that the
//! connection goes to its address records (RFC 5321 section 5.1).
//!
//! Results are never cached; every delivery performs a fresh lookup.

use std::{collections::HashMap, fmt, time::Duration};

use async_trait::async_trait;
use hickory_resolver::{TokioResolver, config::ResolverOpts, name_server::TokioConnectionProvider};
use leastmta_common::config::DnsConfig;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur during DNS resolution.
#[derive(Debug, Error)]
pub enum DnsError {
    /// Domain does not exist (NXDOMAIN).
    #[error("Domain does not exist: {0}")]
    DomainNotFound(String),

    /// DNS query failed due to network or resolver issues.
    #[error("DNS lookup failed: {0}")]
    LookupFailed(#[from] hickory_resolver::ResolveError),

    /// DNS query timed out.
    #[error("DNS query timed out for domain: {0}")]
    Timeout(String),
}

impl DnsError {
    /// Returns `true` if the same lookup could succeed later.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::LookupFailed(_))
    }
}

/// A mail exchanger to try, with its MX preference (lower is tried first).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryTarget {
    /// Host name, IP address or `ip:port` socket address of the exchanger.
    pub host: String,
    pub preference: u16,
}

impl DeliveryTarget {
    #[must_use]
    pub fn new(host: impl Into<String>, preference: u16) -> Self {
        Self {
            host: host.into(),
            preference,
        }
    }

    /// The synthetic target used when `domain` has no MX records.
    #[must_use]
    pub fn implicit(domain: &str) -> Self {
        Self::new(domain, 0)
    }
}

impl fmt::Display for DeliveryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (preference {})", self.host, self.preference)
    }
}

/// Builds the ordered target list for `domain` from raw `(exchange, preference)`
/// pairs.
///
/// The sort is stable, so exchangers sharing a preference keep the order the
/// resolver returned them in. An empty record set yields the implicit target.
pub(crate) fn targets_from_records(
    domain: &str,
    records: impl IntoIterator<Item = (String, u16)>,
) -> Vec<DeliveryTarget> {
    let mut targets: Vec<DeliveryTarget> = records
        .into_iter()
        .map(|(exchange, preference)| {
            let host = exchange.trim_end_matches('.');
            debug!("Found MX record: {host} (preference: {preference})");
            DeliveryTarget::new(host, preference)
        })
        .collect();

    if targets.is_empty() {
        debug!("No MX records for {domain}, using the domain itself");
        return vec![DeliveryTarget::implicit(domain)];
    }

    targets.sort_by_key(|target| target.preference);
    targets
}

/// Source of delivery targets for a recipient domain.
#[async_trait]
pub trait MxResolver: Send + Sync {
    /// Returns the exchangers for `domain`, in the order they should be tried.
    ///
    /// # Errors
    ///
    /// Returns a [`DnsError`] if the domain can't be resolved.
    async fn resolve(&self, domain: &str) -> Result<Vec<DeliveryTarget>, DnsError>;
}

/// Resolver backed by the system's DNS configuration.
#[derive(Debug)]
pub struct DnsResolver {
    resolver: TokioResolver,
    timeout: Duration,
}

impl DnsResolver {
    /// Creates a resolver from the system configuration (`/etc/resolv.conf` on
    /// Unix).
    ///
    /// # Errors
    ///
    /// Returns an error if the system DNS configuration cannot be loaded.
    pub fn new(config: &DnsConfig) -> Result<Self, DnsError> {
        let timeout = Duration::from_secs(config.timeout_secs);

        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 1;

        let resolver = TokioResolver::builder(TokioConnectionProvider::default())?
            .with_options(opts)
            .build();

        Ok(Self { resolver, timeout })
    }
}

#[async_trait]
impl MxResolver for DnsResolver {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn resolve(&self, domain: &str) -> Result<Vec<DeliveryTarget>, DnsError> {
        let lookup = tokio::time::timeout(self.timeout, self.resolver.mx_lookup(domain))
            .await
            .map_err(|_| DnsError::Timeout(domain.to_string()))?;

        match lookup {
            Ok(mx_lookup) => Ok(targets_from_records(
                domain,
                mx_lookup
                    .iter()
                    .map(|mx| (mx.exchange().to_utf8(), mx.preference())),
            )),
            Err(err) if err.is_nx_domain() => Err(DnsError::DomainNotFound(domain.to_string())),
            Err(err) if err.is_no_records_found() => {
                Ok(targets_from_records(domain, std::iter::empty()))
            }
            Err(err) => {
                warn!("MX lookup failed for {domain}: {err}");
                Err(DnsError::LookupFailed(err))
            }
        }
    }
}

/// Resolver answering from a fixed table.
///
/// Used for smart-host routing and in tests. Unknown domains resolve to
/// [`DnsError::DomainNotFound`].
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    table: HashMap<String, Vec<DeliveryTarget>>,
}

impl StaticResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `domain` with `targets`, exactly as given.
    #[must_use]
    pub fn with_targets(mut self, domain: impl Into<String>, targets: Vec<DeliveryTarget>) -> Self {
        self.table.insert(domain.into().to_ascii_lowercase(), targets);
        self
    }
}

#[async_trait]
impl MxResolver for StaticResolver {
    async fn resolve(&self, domain: &str) -> Result<Vec<DeliveryTarget>, DnsError> {
        self.table
            .get(&domain.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| DnsError::DomainNotFound(domain.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "Requires network access"]
    async fn test_mx_lookup_gmail() {
        let resolver = DnsResolver::new(&DnsConfig::default()).unwrap();
        let targets = resolver.resolve("gmail.com").await.unwrap();

        assert!(!targets.is_empty());
        assert!(targets.iter().all(|t| !t.host.ends_with('.')));
        assert!(targets.windows(2).all(|w| w[0].preference <= w[1].preference));
    }

    #[tokio::test]
    #[ignore = "Requires network access"]
    async fn test_domain_not_found() {
        let resolver = DnsResolver::new(&DnsConfig::default()).unwrap();
        let result = resolver
            .resolve("this-domain-definitely-does-not-exist-12345.com")
            .await;

        assert!(matches!(result, Err(DnsError::DomainNotFound(_))));
    }

    #[test]
    fn test_preference_sorting() {
        let targets = targets_from_records(
            "example.com",
            [
                ("mx3.example.com.".to_string(), 30),
                ("mx1.example.com.".to_string(), 10),
                ("mx2.example.com.".to_string(), 20),
            ],
        );

        assert_eq!(
            targets,
            vec![
                DeliveryTarget::new("mx1.example.com", 10),
                DeliveryTarget::new("mx2.example.com", 20),
                DeliveryTarget::new("mx3.example.com", 30),
            ]
        );
    }

    #[test]
    fn test_equal_preferences_keep_resolver_order() {
        let targets = targets_from_records(
            "example.com",
            [
                ("b.example.com".to_string(), 10),
                ("c.example.com".to_string(), 5),
                ("a.example.com".to_string(), 10),
            ],
        );

        let hosts: Vec<&str> = targets.iter().map(|t| t.host.as_str()).collect();
        assert_eq!(hosts, ["c.example.com", "b.example.com", "a.example.com"]);
    }

    #[test]
    fn test_no_records_synthesizes_domain_target() {
        let targets = targets_from_records("example.com", std::iter::empty());
        assert_eq!(targets, vec![DeliveryTarget::new("example.com", 0)]);
    }

    #[test]
    fn test_dns_error_is_temporary() {
        assert!(DnsError::Timeout("example.com".to_string()).is_temporary());
        assert!(!DnsError::DomainNotFound("example.com".to_string()).is_temporary());
    }

    #[tokio::test]
    async fn test_static_resolver() {
        let resolver = StaticResolver::new().with_targets(
            "Example.com",
            vec![DeliveryTarget::new("mx.example.com", 10)],
        );

        let targets = resolver.resolve("EXAMPLE.COM").await.unwrap();
        assert_eq!(targets, vec![DeliveryTarget::new("mx.example.com", 10)]);

        assert!(matches!(
            resolver.resolve("other.example").await,
            Err(DnsError::DomainNotFound(_))
        ));
    }
}
