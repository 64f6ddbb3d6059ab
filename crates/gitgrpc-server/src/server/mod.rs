//! gRPC server for the git tunnel.

mod config;
mod git_svc;
mod tls;

pub use config::ServerConfig;
pub use git_svc::GitServiceImpl;
pub use tls::{TlsConfigError, TlsMode};

use thiserror::Error;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::transport::server::Router;
use tracing::info;

use gitgrpc_proto::v1::git_server::GitServer;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] TlsConfigError),
}

/// gRPC server handle.
pub struct GrpcServer {
    config: ServerConfig,
    git_service: GitServiceImpl,
}

impl GrpcServer {
    pub fn new(config: ServerConfig) -> Self {
        let git_service = GitServiceImpl::from_config(&config);
        Self {
            config,
            git_service,
        }
    }

    /// Get the server configuration.
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn serve_tcp<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind(self.config.addr).await?;
        self.serve_listener(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    pub async fn serve_listener<F>(
        self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = listener.local_addr()?;
        let tls = self.config.tls.is_enabled();
        let router = self.router().await?;

        info!(%addr, tls, "Starting gRPC server on TCP");
        router
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
            .await?;
        info!(%addr, "gRPC server stopped");
        Ok(())
    }

    async fn router(self) -> Result<Router, ServerError> {
        let mut builder = Server::builder()
            .http2_keepalive_interval(Some(self.config.keepalive_interval))
            .http2_keepalive_timeout(Some(self.config.keepalive_timeout));
        if let Some(tls) = self.config.tls.to_server_tls_config()? {
            builder = builder.tls_config(tls)?;
        }

        let (health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<GitServer<GitServiceImpl>>()
            .await;

        Ok(builder
            .add_service(health_service)
            .add_service(GitServer::new(self.git_service)))
    }
}
