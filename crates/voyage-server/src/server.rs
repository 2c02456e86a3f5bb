//! HTTP server implementation.

use crate::{routes::create_router, state::AppState};
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Notify;
use tracing::{error, info, warn};
use voyage_config::VoyageConfig;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// How long in-flight requests may run after a shutdown signal
    pub graceful_shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            graceful_shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&VoyageConfig> for ServerConfig {
    fn from(config: &VoyageConfig) -> Self {
        Self {
            host: config.server.host.clone(),
            port: config.server.port,
            graceful_shutdown_timeout: config.server.graceful_shutdown_timeout,
        }
    }
}

impl ServerConfig {
    /// Create a new server configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the host
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Get the socket address
    ///
    /// # Errors
    /// Returns `Config` if host and port do not form a socket address
    pub fn socket_addr(&self) -> Result<SocketAddr, ServerError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ServerError::Config(format!("Invalid listen address: {e}")))
    }
}

/// HTTP server for the gateway
pub struct Server {
    config: ServerConfig,
    state: AppState,
}

impl Server {
    /// Create a new server
    #[must_use]
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Run until Ctrl+C or SIGTERM
    ///
    /// # Errors
    /// Returns error if the server fails to start or encounters a fatal error
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(shutdown_signal()).await
    }

    /// Run the server with a custom shutdown signal
    ///
    /// Background sweepers are started with the listener and aborted once the
    /// server stops.
    ///
    /// # Errors
    /// Returns error if the server fails to start
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.socket_addr()?;
        let grace = self.config.graceful_shutdown_timeout;

        info!(
            host = %self.config.host,
            port = self.config.port,
            "Starting HTTP server"
        );

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(e.to_string()))?;

        info!(address = %addr, "Server listening");

        let tasks = self.state.spawn_background_tasks();
        let router = create_router(self.state);

        let draining = Arc::new(Notify::new());
        let signal_draining = Arc::clone(&draining);
        let serve = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown.await;
            signal_draining.notify_one();
        })
        .into_future();

        let result = tokio::select! {
            result = serve => result.map_err(|e| ServerError::Serve(e.to_string())),
            () = async {
                draining.notified().await;
                tokio::time::sleep(grace).await;
            } => {
                warn!(timeout_secs = grace.as_secs(), "Graceful shutdown timed out, dropping connections");
                Ok(())
            }
        };

        for task in tasks {
            task.abort();
        }

        match &result {
            Ok(()) => info!("Server shutdown complete"),
            Err(e) => error!(error = %e, "Server stopped with error"),
        }
        result
    }
}

/// Server error type
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to address
    #[error("Failed to bind to address: {0}")]
    Bind(String),
    /// Server error during operation
    #[error("Server error: {0}")]
    Serve(String),
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        () = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
