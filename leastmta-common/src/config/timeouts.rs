//! Timeout configuration for both sides of the relay.
//!
//! - **Server-side**: bounds every read and write on an inbound connection.
//! - **Client-side**: bounds each step of an outbound delivery attempt.
//!
//! A step that exceeds its bound fails the whole transaction; nothing is
//! retried.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Inbound (submission) socket timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTimeouts {
    /// Timeout for reading a command line or a chunk of message data.
    ///
    /// Default: 10 seconds
    #[serde(default = "defaults::server_read_secs")]
    pub read_secs: u64,

    /// Timeout for writing a reply.
    ///
    /// Default: 10 seconds
    #[serde(default = "defaults::server_write_secs")]
    pub write_secs: u64,
}

impl ServerTimeouts {
    #[must_use]
    pub const fn read(&self) -> Duration {
        Duration::from_secs(self.read_secs)
    }

    #[must_use]
    pub const fn write(&self) -> Duration {
        Duration::from_secs(self.write_secs)
    }
}

impl Default for ServerTimeouts {
    fn default() -> Self {
        Self {
            read_secs: defaults::server_read_secs(),
            write_secs: defaults::server_write_secs(),
        }
    }
}

/// Outbound (delivery) timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientTimeouts {
    /// Timeout for establishing the TCP connection.
    ///
    /// Default: 10 seconds
    #[serde(default = "defaults::client_connect_secs")]
    pub connect_secs: u64,

    /// Timeout for each command/reply exchange, including the greeting
    /// banner and the TLS handshake.
    ///
    /// Default: 10 seconds
    #[serde(default = "defaults::client_command_secs")]
    pub command_secs: u64,

    /// Timeout for transmitting the message body and reading the final reply.
    ///
    /// Default: 10 seconds
    #[serde(default = "defaults::client_data_secs")]
    pub data_secs: u64,
}

impl ClientTimeouts {
    /// Uses the same bound for every step; handy in tests.
    #[must_use]
    pub const fn uniform(duration: Duration) -> Self {
        let secs = duration.as_secs();
        Self {
            connect_secs: secs,
            command_secs: secs,
            data_secs: secs,
        }
    }

    #[must_use]
    pub const fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    #[must_use]
    pub const fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    #[must_use]
    pub const fn data(&self) -> Duration {
        Duration::from_secs(self.data_secs)
    }
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: defaults::client_connect_secs(),
            command_secs: defaults::client_command_secs(),
            data_secs: defaults::client_data_secs(),
        }
    }
}

mod defaults {
    pub const fn server_read_secs() -> u64 {
        10
    }

    pub const fn server_write_secs() -> u64 {
        10
    }

    pub const fn client_connect_secs() -> u64 {
        10
    }

    pub const fn client_command_secs() -> u64 {
        10
    }

    pub const fn client_data_secs() -> u64 {
        10
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults() {
        let timeouts = ServerTimeouts::default();
        assert_eq!(timeouts.read(), Duration::from_secs(10));
        assert_eq!(timeouts.write(), Duration::from_secs(10));
    }

    #[test]
    fn client_defaults() {
        let timeouts = ClientTimeouts::default();
        assert_eq!(timeouts.connect(), Duration::from_secs(10));
        assert_eq!(timeouts.command(), Duration::from_secs(10));
        assert_eq!(timeouts.data(), Duration::from_secs(10));
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let timeouts: ClientTimeouts = ron::from_str("(connect_secs: 3)").unwrap();
        assert_eq!(timeouts.connect_secs, 3);
        assert_eq!(timeouts.command_secs, 10);
        assert_eq!(timeouts.data_secs, 10);
    }
}
