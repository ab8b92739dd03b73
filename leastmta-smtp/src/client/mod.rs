//! Outbound SMTP client.
//!
//! [`SmtpClient`] speaks one command at a time over a plain or STARTTLS
//! upgraded connection. It is used by the delivery engine and by tests that
//! drive the inbound server.
//!
//! ```no_run
//! use leastmta_smtp::client::SmtpClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = SmtpClient::connect("mx.example.com:25", "mx.example.com")
//!     .await?
//!     .insecure_skip_verify(true);
//!
//! client.read_greeting().await?;
//! let ehlo = client.ehlo("relay.example.org").await?;
//! if ehlo.has_extension("STARTTLS") {
//!     client.starttls().await?;
//!     client.ehlo("relay.example.org").await?;
//! }
//! client.mail_from("sender@example.org", Some(11)).await?;
//! client.rcpt_to("user@example.com").await?;
//! client.data().await?;
//! client.send_data(b"Hello\r\n").await?;
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod response;
mod smtp_client;

pub use error::{ClientError, Result};
pub use response::{Response, ResponseLine};
pub use smtp_client::{SmtpClient, encode_data};
