use std::sync::Arc;

use leastmta_common::{Signal, config::MtaConfig, internal, tracing};
use leastmta_delivery::DeliveryEngine;
use leastmta_smtp::{Listener, SessionConfig};
use tokio::sync::broadcast;

use crate::relay::RelayBackend;

/// Owns the configuration, the delivery engine and the shutdown channel for
/// one running relay.
pub struct LeastMta {
    config: MtaConfig,
    engine: Arc<DeliveryEngine>,
    shutdown: broadcast::Sender<Signal>,
}

impl LeastMta {
    /// Validates `config` and builds a delivery engine backed by the system
    /// resolver.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid or the resolver can't be
    /// created.
    pub fn from_config(config: MtaConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let engine = DeliveryEngine::from_config(config.delivery.clone())?;

        Ok(Self::with_engine(config, engine))
    }

    /// Uses an already built engine, e.g. one with a static resolver.
    #[must_use]
    pub fn with_engine(config: MtaConfig, engine: DeliveryEngine) -> Self {
        let (shutdown, _receiver) = broadcast::channel(64);

        Self {
            config,
            engine: Arc::new(engine),
            shutdown,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &MtaConfig {
        &self.config
    }

    /// A handle that stops the listener when sent [`Signal::Shutdown`].
    #[must_use]
    pub fn shutdown_handle(&self) -> broadcast::Sender<Signal> {
        self.shutdown.clone()
    }

    /// Binds the submission listener without accepting yet.
    ///
    /// # Errors
    ///
    /// Fails if the certificate can't be loaded or the address can't be
    /// bound.
    pub async fn bind(&self) -> anyhow::Result<Listener> {
        let session = SessionConfig::from_mta(&self.config)?;
        let backend = Arc::new(RelayBackend::new(Arc::clone(&self.engine)));

        Ok(Listener::bind(self.config.listen, session, backend).await?)
    }

    /// Accepts submissions on `listener` until a shutdown is broadcast.
    ///
    /// # Errors
    ///
    /// Returns the listener's error if accepting fails.
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn serve(&self, listener: Listener) -> anyhow::Result<()> {
        listener.serve(self.shutdown.subscribe()).await?;
        internal!("Listener stopped");

        Ok(())
    }

    /// Runs the relay until the process is asked to stop.
    ///
    /// # Errors
    ///
    /// Returns any error from binding or serving.
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = self.bind().await?;
        internal!(
            level = INFO,
            "Starting server at {}{}",
            self.config.domain,
            listener.local_addr()?
        );

        let serving = self.serve(listener);
        tokio::pin!(serving);

        let ret = tokio::select! {
            r = &mut serving => r,
            r = wait_for_signal() => {
                r?;
                self.stop();
                serving.await
            }
        };

        internal!(level = INFO, "Shutting down...");

        ret
    }

    /// Broadcasts [`Signal::Shutdown`]. No-op if nothing is listening.
    pub fn stop(&self) {
        let _ = self.shutdown.send(Signal::Shutdown);
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r?;
            internal!(level = INFO, "CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate signal received, shutting down");
        }
    }

    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    internal!(level = INFO, "CTRL+C entered, shutting down");

    Ok(())
}
