use std::{fs::File, io, path::Path, sync::Arc};

use leastmta_common::{config::TlsContext, tracing};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio_rustls::{
    TlsAcceptor,
    rustls::{
        ProtocolVersion, ServerConfig, ServerConnection, SupportedCipherSuite,
        pki_types::{CertificateDer, PrivateKeyDer},
    },
    server::TlsStream,
};

use crate::error::{ConnectionError, ConnectionResult, TlsError, TlsResult};

/// Negotiated parameters of an upgraded connection.
#[derive(Debug)]
pub struct TlsInfo {
    version: ProtocolVersion,
    cipher: SupportedCipherSuite,
}

impl TlsInfo {
    fn of(conn: &ServerConnection) -> TlsResult<Self> {
        Ok(Self {
            version: conn
                .protocol_version()
                .ok_or_else(|| TlsError::Rustls("protocol version missing".to_string()))?,
            cipher: conn
                .negotiated_cipher_suite()
                .ok_or_else(|| TlsError::Rustls("cipher suite missing".to_string()))?,
        })
    }

    #[must_use]
    pub fn proto(&self) -> String {
        self.version.as_str().map_or_else(String::new, str::to_string)
    }

    #[must_use]
    pub fn cipher(&self) -> String {
        self.cipher
            .suite()
            .as_str()
            .map_or_else(String::new, str::to_string)
    }
}

fn load_certs(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    rustls_pemfile::certs(&mut io::BufReader::new(File::open(path)?)).collect()
}

fn load_key(path: &Path) -> TlsResult<PrivateKeyDer<'static>> {
    let key_error = |reason: String| TlsError::KeyLoad {
        path: path.display().to_string(),
        reason,
    };

    let mut reader = io::BufReader::new(File::open(path).map_err(|e| key_error(e.to_string()))?);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| key_error(e.to_string()))?
        .ok_or_else(|| {
            key_error("Unable to find a PKCS1, PKCS8 or SEC1 private key".to_string())
        })
}

/// Builds the acceptor used for inbound STARTTLS.
///
/// Certificates are read once, when the server starts.
///
/// # Errors
///
/// Returns an error if the certificate or key can't be loaded, or rustls
/// rejects them.
pub fn tls_acceptor(context: &TlsContext) -> TlsResult<TlsAcceptor> {
    let certs = load_certs(&context.certificate).map_err(|source| TlsError::CertificateLoad {
        path: context.certificate.display().to_string(),
        source,
    })?;
    let key = load_key(&context.key)?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Reads up to and including the next `\n`, refusing lines longer than
/// `limit`. Returns `0` at end of stream.
async fn read_line_limited<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    line: &mut Vec<u8>,
    limit: usize,
) -> ConnectionResult<usize> {
    let start = line.len();

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(line.len() - start);
        }

        let (done, used) = available
            .iter()
            .position(|&b| b == b'\n')
            .map_or((false, available.len()), |idx| (true, idx + 1));

        if line.len() - start + used > limit {
            return Err(ConnectionError::LineTooLong(limit));
        }

        line.extend_from_slice(&available[..used]);
        reader.consume(used);

        if done {
            return Ok(line.len() - start);
        }
    }
}

/// An inbound connection, before or after STARTTLS.
pub enum Connection<Stream: AsyncRead + AsyncWrite + Unpin + Send> {
    Plain(BufReader<Stream>),
    Tls(Box<BufReader<TlsStream<Stream>>>),
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Connection<Stream> {
    pub fn new(stream: Stream) -> Self {
        Self::Plain(BufReader::new(stream))
    }

    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// Writes `response` followed by CRLF.
    pub(crate) async fn send<S: core::fmt::Display + Send + Sync>(
        &mut self,
        response: &S,
    ) -> ConnectionResult<()> {
        let line = format!("{response}\r\n");

        match self {
            Self::Plain(stream) => {
                stream.write_all(line.as_bytes()).await?;
                stream.flush().await?;
            }
            Self::Tls(stream) => {
                stream.write_all(line.as_bytes()).await?;
                stream.flush().await?;
            }
        }

        Ok(())
    }

    pub(crate) async fn receive_line(
        &mut self,
        line: &mut Vec<u8>,
        limit: usize,
    ) -> ConnectionResult<usize> {
        match self {
            Self::Plain(stream) => read_line_limited(stream, line, limit).await,
            Self::Tls(stream) => read_line_limited(&mut **stream, line, limit).await,
        }
    }

    /// Performs the server side of the TLS handshake.
    ///
    /// Anything the client pipelined after `STARTTLS` is discarded.
    pub(crate) async fn upgrade(self, acceptor: &TlsAcceptor) -> TlsResult<(Self, TlsInfo)> {
        tracing::debug!("Upgrading connection ...");

        let Self::Plain(reader) = self else {
            return Err(TlsError::Rustls("Connection is already TLS".to_string()));
        };

        let stream = acceptor.accept(reader.into_inner()).await?;
        let info = TlsInfo::of(stream.get_ref().1)?;

        Ok((Self::Tls(Box::new(BufReader::new(stream))), info))
    }
}
