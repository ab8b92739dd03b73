//! Test support for end-to-end runs: a relay listening on a loopback port
//! that delivers to a scripted remote exchanger.

pub mod harness;
#[path = "../../../leastmta-delivery/tests/support/mock_server.rs"]
pub mod mock_server;

pub use harness::E2ETestHarness;
pub use mock_server::SmtpCommand;
