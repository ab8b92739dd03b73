//! SASL `PLAIN` (RFC 4616) and `LOGIN` credential exchange.

use base64::{Engine, engine::general_purpose::STANDARD};
use leastmta_common::status::Status;
use tokio::io::{AsyncRead, AsyncWrite};

use super::{MAX_LINE_LENGTH, Session};
use crate::error::{ConnectionError, ConnectionResult, SmtpError};

/// `Username:` and `Password:`, base64 encoded.
const LOGIN_USERNAME_PROMPT: &str = "VXNlcm5hbWU6";
const LOGIN_PASSWORD_PROMPT: &str = "UGFzc3dvcmQ6";

type Credentials = (String, String);

fn invalid_response() -> SmtpError {
    SmtpError::new(Status::ParameterError, Some("5.5.2"), "Invalid response")
}

fn decode(token: &str) -> Result<Vec<u8>, SmtpError> {
    // A lone `=` is an empty initial response.
    if token == "=" {
        return Ok(Vec::new());
    }

    STANDARD.decode(token).map_err(|_| invalid_response())
}

fn decode_text(token: &str) -> Result<String, SmtpError> {
    String::from_utf8(decode(token)?).map_err(|_| invalid_response())
}

/// Splits a decoded `PLAIN` message into username and password. The
/// authorization identity is ignored.
pub(crate) fn parse_plain(message: &[u8]) -> Result<Credentials, SmtpError> {
    let text = std::str::from_utf8(message).map_err(|_| invalid_response())?;
    let mut parts = text.split('\0');

    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_authzid), Some(username), Some(password), None) if !username.is_empty() => {
            Ok((username.to_string(), password.to_string()))
        }
        _ => Err(invalid_response()),
    }
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Session<Stream> {
    /// Sends a `334` challenge and returns the client's answer.
    async fn challenge(&mut self, prompt: &str) -> ConnectionResult<Result<String, SmtpError>> {
        self.reply(Status::AuthContinue, None, prompt).await?;

        let mut line = Vec::new();
        if self.read_line(&mut line, MAX_LINE_LENGTH).await? == 0 {
            return Err(ConnectionError::Closed);
        }

        let answer = String::from_utf8_lossy(&line).trim().to_string();
        if answer == "*" {
            return Ok(Err(SmtpError::new(
                Status::ParameterError,
                Some("5.0.0"),
                "Negotiation cancelled",
            )));
        }

        Ok(Ok(answer))
    }

    async fn answer(
        &mut self,
        initial: Option<String>,
        prompt: &str,
    ) -> ConnectionResult<Result<String, SmtpError>> {
        match initial {
            Some(initial) => Ok(Ok(initial)),
            None => self.challenge(prompt).await,
        }
    }

    /// Runs the exchange for `mechanism` and returns the decoded
    /// credentials. The outer error ends the connection; the inner one is
    /// a reply for the client.
    pub(super) async fn credentials(
        &mut self,
        mechanism: &str,
        initial: Option<String>,
    ) -> ConnectionResult<Result<Credentials, SmtpError>> {
        match mechanism {
            "PLAIN" => Ok(self
                .answer(initial, "")
                .await?
                .and_then(|answer| parse_plain(&decode(&answer)?))),
            "LOGIN" => {
                let username = match self.answer(initial, LOGIN_USERNAME_PROMPT).await? {
                    Ok(answer) => decode_text(&answer),
                    Err(err) => Err(err),
                };
                let username = match username {
                    Ok(username) => username,
                    Err(err) => return Ok(Err(err)),
                };

                Ok(self
                    .challenge(LOGIN_PASSWORD_PROMPT)
                    .await?
                    .and_then(|answer| decode_text(&answer))
                    .map(|password| (username, password)))
            }
            _ => Ok(Err(SmtpError::new(
                Status::ParameterNotImplemented,
                Some("5.5.4"),
                "Unsupported authentication mechanism",
            ))),
        }
    }
}
