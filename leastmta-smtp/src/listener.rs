use std::{io, net::SocketAddr, sync::Arc};

use futures_util::future::join_all;
use leastmta_common::{Signal, internal, tracing};
use tokio::{net::TcpListener, sync::broadcast::error::RecvError};

use crate::{
    backend::Backend,
    error::ConnectionError,
    session::{Session, SessionConfig},
};

/// Accepts inbound connections and runs a [`Session`] for each one.
pub struct Listener {
    listener: TcpListener,
    config: Arc<SessionConfig>,
    backend: Arc<dyn Backend>,
}

impl Listener {
    /// Binds the listening socket. Port `0` picks a free port, see
    /// [`Self::local_addr`].
    ///
    /// # Errors
    ///
    /// Returns an error if the socket can't be bound.
    pub async fn bind(
        socket: SocketAddr,
        config: SessionConfig,
        backend: Arc<dyn Backend>,
    ) -> io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(socket).await?,
            config: Arc::new(config),
            backend,
        })
    }

    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves until `shutdown` delivers [`Signal::Shutdown`], then waits for
    /// the open sessions to wind down.
    ///
    /// # Errors
    ///
    /// Returns an error if the local address can't be read.
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn serve(
        self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> io::Result<()> {
        let socket = self.local_addr()?;
        internal!("Serving {socket} with {:?}", self.config);

        let mut sessions = Vec::default();

        loop {
            tokio::select! {
                sig = shutdown.recv() => {
                    if matches!(sig, Ok(Signal::Shutdown) | Err(RecvError::Closed)) {
                        internal!(level = INFO, "SMTP Listener {socket} Received Shutdown signal, finishing sessions ...");
                        join_all(sessions).await;
                        break;
                    }
                }

                connection = self.listener.accept() => {
                    let (stream, peer) = match connection {
                        Ok(connection) => connection,
                        Err(err) => {
                            internal!(level = ERROR, "Failed to accept connection on {socket}: {err}");
                            continue;
                        }
                    };

                    tracing::debug!("Connection received on {socket} from {peer}");
                    sessions.retain(|session: &tokio::task::JoinHandle<()>| !session.is_finished());

                    let session = Session::create(
                        stream,
                        peer,
                        Arc::clone(&self.config),
                        Arc::clone(&self.backend),
                    );
                    let signal = shutdown.resubscribe();

                    sessions.push(tokio::spawn(async move {
                        match session.run(signal).await {
                            Ok(()) | Err(ConnectionError::Closed) => {}
                            Err(ConnectionError::Timeout) => {
                                internal!(level = WARN, "Session with {peer} timed out");
                            }
                            Err(err) => internal!(level = ERROR, "Error: {err}"),
                        }
                    }));
                }
            }
        }

        Ok(())
    }
}
