//! SMTP for the relay: an inbound server that accepts authenticated
//! submissions and hands them to a [`backend::Backend`], and an outbound
//! [`client::SmtpClient`] used for delivery.

pub mod backend;
pub mod client;
pub mod command;
pub mod connection;
pub mod error;
pub mod extensions;
pub mod listener;
pub mod session;

pub use backend::{Backend, ConnectionState, SessionHandler};
pub use command::MailParameters;
pub use error::SmtpError;
pub use listener::Listener;
pub use session::{Session, SessionConfig};
