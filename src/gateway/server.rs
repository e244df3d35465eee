//! Proxy server

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::models::ModelCatalog;
use super::proxy::ProxyCore;
use super::router::{AppState, create_router};
use super::target::ProxyTarget;
use crate::auth::{CredentialProvider, TokenCache};
use crate::config::Config;
use crate::{Error, Result};

/// Vertex AI proxy server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Shared handler state
    state: Arc<AppState>,
}

impl Gateway {
    /// Create a new gateway
    ///
    /// # Errors
    ///
    /// Returns an error if the target URL cannot be built or the upstream
    /// client cannot be created.
    pub fn new(config: Config, provider: Arc<dyn CredentialProvider>) -> Result<Self> {
        let target = ProxyTarget::new(config.vertex.target_url()?)?;
        let tokens = Arc::new(
            TokenCache::new(provider, config.auth.scopes.clone())
                .with_refresh_margin(config.auth.refresh_margin),
        );
        let proxy = ProxyCore::new(target, tokens, &config.server)?;
        let models = ModelCatalog::from_config(&config.vertex);

        Ok(Self {
            config,
            state: Arc::new(AppState { proxy, models }),
        })
    }

    /// Router serving this gateway
    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.state))
    }

    /// Bind the configured address and serve until Ctrl-C or SIGTERM
    ///
    /// # Errors
    ///
    /// Returns an error if the host is invalid, the port cannot be bound, or
    /// the server fails.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    ///
    /// In-flight requests get `server.shutdown_timeout` to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local = listener.local_addr()?;

        info!("============================================================");
        info!("VERTEX PROXY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(address = %local, "Listening");
        info!(target = %self.state.proxy.target().url(), "Forwarding /v1/* to Vertex AI");
        info!(models = ?self.state.models.ids(), "Advertised models");
        info!("  GET  http://{local}/v1/models");
        info!("  ANY  http://{local}/v1/*");
        info!("============================================================");

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
        let grace = self.config.server.shutdown_timeout;

        let app = self.router();
        let server = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move {
                shutdown.await;
                let _ = shutdown_tx.send(());
            })
            .into_future();

        tokio::select! {
            result = server => result.map_err(|e| Error::Internal(e.to_string()))?,
            () = drain_deadline(&mut shutdown_rx, grace) => {
                warn!(timeout = ?grace, "Graceful shutdown timed out, dropping open connections");
            }
        }

        info!("Proxy stopped");
        Ok(())
    }
}

/// Resolves `grace` after shutdown began
async fn drain_deadline(shutdown_rx: &mut broadcast::Receiver<()>, grace: Duration) {
    if shutdown_rx.recv().await.is_err() {
        // Sender dropped without a shutdown: the server future finishes first.
        std::future::pending::<()>().await;
    }
    tokio::time::sleep(grace).await;
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
