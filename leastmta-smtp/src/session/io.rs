use core::fmt::Display;

use leastmta_common::{outgoing, status::Status};
use tokio::io::{AsyncRead, AsyncWrite};

use super::{MAX_LINE_LENGTH, Session};
use crate::{
    connection::Connection,
    error::{ConnectionError, ConnectionResult, SmtpError},
};

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Session<Stream> {
    fn connection(&mut self) -> ConnectionResult<&mut Connection<Stream>> {
        self.connection.as_mut().ok_or(ConnectionError::Closed)
    }

    /// Reads one line, bounded by the read timeout. Returns `0` once the
    /// client has closed its side.
    pub(super) async fn read_line(
        &mut self,
        line: &mut Vec<u8>,
        limit: usize,
    ) -> ConnectionResult<usize> {
        let timeout = self.config.timeouts.read();
        let connection = self.connection()?;

        tokio::time::timeout(timeout, connection.receive_line(line, limit))
            .await
            .map_err(|_| ConnectionError::Timeout)?
    }

    async fn send_line(&mut self, line: String) -> ConnectionResult<()> {
        outgoing!("{line}");

        let timeout = self.config.timeouts.write();
        let connection = self.connection()?;

        tokio::time::timeout(timeout, connection.send(&line))
            .await
            .map_err(|_| ConnectionError::Timeout)?
    }

    pub(super) async fn reply(
        &mut self,
        status: Status,
        enhanced: Option<&str>,
        text: impl Display + Send,
    ) -> ConnectionResult<()> {
        let line = match enhanced {
            Some(enhanced) => format!("{status} {enhanced} {text}"),
            None => format!("{status} {text}"),
        };
        self.send_line(line).await
    }

    pub(super) async fn reply_error(&mut self, err: &SmtpError) -> ConnectionResult<()> {
        self.send_line(err.to_string()).await
    }

    /// Sends a multi-line reply, `250-first` ... `250 last`.
    pub(super) async fn reply_lines(
        &mut self,
        status: Status,
        lines: &[String],
    ) -> ConnectionResult<()> {
        for (idx, line) in lines.iter().enumerate() {
            let separator = if idx + 1 == lines.len() { ' ' } else { '-' };
            self.send_line(format!("{status}{separator}{line}")).await?;
        }
        Ok(())
    }

    /// Reads the message body up to the end-of-data marker, undoing dot
    /// stuffing.
    ///
    /// Returns `None` if the body exceeds the size limit; the rest of it is
    /// still consumed so the conversation stays in step.
    pub(super) async fn read_data(&mut self) -> ConnectionResult<Option<Vec<u8>>> {
        let max = self.config.max_message_bytes;
        let mut body = Vec::new();
        let mut too_large = false;
        let mut line = Vec::with_capacity(1024);

        loop {
            line.clear();
            if self
                .read_line(&mut line, max.saturating_add(MAX_LINE_LENGTH))
                .await?
                == 0
            {
                return Err(ConnectionError::Closed);
            }

            if line == b".\r\n" || line == b".\n" {
                break;
            }

            let content = line.strip_prefix(b".").unwrap_or(&line);
            too_large = too_large || body.len() + content.len() > max;
            if !too_large {
                body.extend_from_slice(content);
            }
        }

        Ok((!too_large).then_some(body))
    }
}
