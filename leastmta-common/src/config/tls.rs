//! TLS settings for both directions of the relay.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// When to upgrade an outbound connection with STARTTLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TlsPolicy {
    /// Upgrade when the peer advertises STARTTLS, otherwise stay in plaintext.
    ///
    /// A failed upgrade fails the delivery; there is no plaintext reconnect.
    #[default]
    Opportunistic,

    /// Fail the delivery if the peer does not advertise STARTTLS.
    Required,

    /// Never upgrade, even if STARTTLS is advertised.
    Disabled,
}

/// Server certificate validation for outbound TLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsCertificatePolicy {
    /// Accept any certificate the peer presents (self-signed, expired, wrong
    /// name).
    ///
    /// **SECURITY WARNING**: this makes outbound TLS vulnerable to
    /// man-in-the-middle attacks. It defaults to `true` so that mail still
    /// reaches misconfigured exchangers; set it to `false` to validate against
    /// the system trust store.
    ///
    /// Default: `true`
    #[serde(default = "default_insecure_skip_verify")]
    pub insecure_skip_verify: bool,
}

const fn default_insecure_skip_verify() -> bool {
    true
}

impl Default for TlsCertificatePolicy {
    fn default() -> Self {
        Self {
            insecure_skip_verify: default_insecure_skip_verify(),
        }
    }
}

/// Outbound TLS configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TlsConfig {
    /// Default: `Opportunistic`
    #[serde(default)]
    pub policy: TlsPolicy,

    /// Default: `insecure_skip_verify = true`
    #[serde(default)]
    pub certificate: TlsCertificatePolicy,
}

impl TlsConfig {
    /// Opportunistic TLS with certificate validation enabled.
    #[must_use]
    pub const fn verified() -> Self {
        Self {
            policy: TlsPolicy::Opportunistic,
            certificate: TlsCertificatePolicy {
                insecure_skip_verify: false,
            },
        }
    }

    /// Never attempt TLS.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            policy: TlsPolicy::Disabled,
            certificate: TlsCertificatePolicy {
                insecure_skip_verify: true,
            },
        }
    }

    #[must_use]
    pub const fn is_required(&self) -> bool {
        matches!(self.policy, TlsPolicy::Required)
    }

    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        matches!(self.policy, TlsPolicy::Disabled)
    }

    /// Returns `true` if certificate validation is switched off.
    #[must_use]
    pub const fn skips_verification(&self) -> bool {
        self.certificate.insecure_skip_verify
    }
}

/// Certificate and key used to offer STARTTLS to inbound clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsContext {
    /// PEM encoded certificate chain
    pub certificate: PathBuf,
    /// PEM encoded private key (PKCS#1, PKCS#8 or SEC1)
    pub key: PathBuf,
}
