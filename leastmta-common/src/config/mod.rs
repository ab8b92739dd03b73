//! Configuration types for the relay.
//!
//! Everything is read once at startup and passed down explicitly: the
//! delivery engine gets a [`DeliveryConfig`], the inbound server gets the
//! rest of [`MtaConfig`]. Nothing is process-global.
//!
//! ## Modules
//!
//! - [`timeouts`]: inbound and outbound timeout bounds
//! - [`tls`]: STARTTLS policy and certificate settings

pub mod timeouts;
pub mod tls;

use std::{
    collections::HashMap,
    net::{Ipv4Addr, SocketAddr},
    path::Path,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use timeouts::{ClientTimeouts, ServerTimeouts};
pub use tls::{TlsCertificatePolicy, TlsConfig, TlsContext, TlsPolicy};

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config from {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("Invalid configuration for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// What to do when delivery to one mail exchanger fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Return the first target's error without trying any other exchanger.
    FirstTarget,

    /// Try each exchanger in preference order, reporting the last error if
    /// every one of them fails.
    #[default]
    AllTargets,
}

/// DNS resolver settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsConfig {
    /// DNS query timeout in seconds (default: 5)
    #[serde(default = "default_dns_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_dns_timeout_secs() -> u64 {
    5
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_dns_timeout_secs(),
        }
    }
}

/// Settings for the outbound delivery engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Identity sent in the outbound `EHLO`/`HELO`.
    ///
    /// Left out of a configuration document, it is filled from
    /// [`MtaConfig::domain`] by [`MtaConfig::from_ron`].
    #[serde(default)]
    pub helo_domain: String,

    /// Remote SMTP port (default: 25)
    #[serde(default = "default_remote_port")]
    pub port: u16,

    #[serde(default)]
    pub timeouts: ClientTimeouts,

    #[serde(default)]
    pub tls: TlsConfig,

    #[serde(default)]
    pub fallback: FallbackPolicy,

    #[serde(default)]
    pub dns: DnsConfig,

    /// Static exchanger per recipient domain, consulted before DNS.
    ///
    /// The value is either a host name, reached on [`Self::port`], or an
    /// `ip:port` socket address used as is.
    #[serde(default)]
    pub mx_overrides: HashMap<String, String>,
}

const fn default_remote_port() -> u16 {
    25
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            helo_domain: default_domain(),
            port: default_remote_port(),
            timeouts: ClientTimeouts::default(),
            tls: TlsConfig::default(),
            fallback: FallbackPolicy::default(),
            dns: DnsConfig::default(),
            mx_overrides: HashMap::new(),
        }
    }
}

/// Top-level relay configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MtaConfig {
    /// The server's own identity, used in the inbound banner and the outbound
    /// greeting.
    #[serde(default = "default_domain")]
    pub domain: String,

    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Maximum accepted message size in bytes (default: 1 MiB)
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    /// Maximum recipients per transaction (default: 50)
    #[serde(default = "default_max_recipients")]
    pub max_recipients: usize,

    /// Offer AUTH before the connection is encrypted (default: true)
    #[serde(default = "default_allow_insecure_auth")]
    pub allow_insecure_auth: bool,

    #[serde(default)]
    pub timeouts: ServerTimeouts,

    /// Certificate and key for inbound STARTTLS; not offered when absent.
    #[serde(default)]
    pub tls: Option<TlsContext>,

    #[serde(default)]
    pub delivery: DeliveryConfig,
}

fn default_domain() -> String {
    String::from("least-mta")
}

const fn default_listen() -> SocketAddr {
    SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::UNSPECIFIED), 25)
}

const fn default_max_message_bytes() -> usize {
    1024 * 1024
}

const fn default_max_recipients() -> usize {
    50
}

const fn default_allow_insecure_auth() -> bool {
    true
}

impl Default for MtaConfig {
    fn default() -> Self {
        Self {
            domain: default_domain(),
            listen: default_listen(),
            max_message_bytes: default_max_message_bytes(),
            max_recipients: default_max_recipients(),
            allow_insecure_auth: default_allow_insecure_auth(),
            timeouts: ServerTimeouts::default(),
            tls: None,
            delivery: DeliveryConfig::default(),
        }
    }
}

impl MtaConfig {
    /// Parses a RON document.
    ///
    /// The outbound greeting identity follows `domain` unless the document sets
    /// `delivery.helo_domain` explicitly.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the document is not valid.
    pub fn from_ron(document: &str) -> Result<Self, ConfigError> {
        let mut config: Self = ron::from_str(document)?;
        if config.delivery.helo_domain.is_empty() {
            config.delivery.helo_domain.clone_from(&config.domain);
        }
        Ok(config)
    }

    /// Reads and parses a RON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file can't be read, or
    /// [`ConfigError::Parse`] if it isn't valid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_ron(&document)
    }

    /// Sets the server identity for both directions.
    pub fn set_domain(&mut self, domain: impl Into<String>) {
        self.domain = domain.into();
        self.delivery.helo_domain.clone_from(&self.domain);
    }

    /// Checks the values that would otherwise surface as confusing runtime
    /// failures.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.domain.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "domain",
                reason: "must not be empty".to_string(),
            });
        }

        if self.delivery.helo_domain.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "delivery.helo_domain",
                reason: "must not be empty".to_string(),
            });
        }

        if self.max_message_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "max_message_bytes",
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.max_recipients == 0 {
            return Err(ConfigError::Invalid {
                field: "max_recipients",
                reason: "must be greater than zero".to_string(),
            });
        }

        if let Some(tls) = self.tls.as_ref() {
            for (field, path) in [("tls.certificate", &tls.certificate), ("tls.key", &tls.key)] {
                if !path.is_file() {
                    return Err(ConfigError::Invalid {
                        field,
                        reason: format!("{} does not exist", path.display()),
                    });
                }
            }
        }

        Ok(())
    }
}
