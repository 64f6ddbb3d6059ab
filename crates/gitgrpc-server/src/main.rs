//! git-grpc-server
//!
//! Serves `git-upload-pack` and `git-receive-pack` over a bidirectional
//! gRPC stream.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use gitgrpc_core::tracing_init::init_tracing;
use gitgrpc_server::{GrpcServer, ServerConfig, TlsMode};

#[derive(Parser, Debug)]
#[command(name = "git-grpc-server")]
#[command(version, about = "Serves git fetch and push over gRPC")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "GITGRPC_ADDR", default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// Directory containing git-upload-pack and git-receive-pack.
    /// Looked up on PATH when unset.
    #[arg(long, env = "GITGRPC_EXEC_PATH")]
    exec_path: Option<PathBuf>,

    /// Directory that repository identifiers resolve under.
    #[arg(long, env = "GITGRPC_REPO_ROOT")]
    repo_root: Option<PathBuf>,

    /// Path to TLS certificate file (PEM).
    #[arg(long, env = "GITGRPC_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// Path to TLS private key file (PEM).
    #[arg(long, env = "GITGRPC_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Log level when RUST_LOG is not set.
    #[arg(long, env = "GITGRPC_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "GITGRPC_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_filter = format!(
        "gitgrpc_server={level},gitgrpc_core={level}",
        level = args.log_level
    );
    init_tracing(&log_filter, args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %args.addr,
        "Starting git-grpc-server"
    );

    if let Some(root) = &args.repo_root
        && !root.is_dir()
    {
        anyhow::bail!("repository root {} is not a directory", root.display());
    }
    if let Some(dir) = &args.exec_path
        && !dir.is_dir()
    {
        anyhow::bail!("exec path {} is not a directory", dir.display());
    }

    let tls = match (args.tls_cert, args.tls_key) {
        (Some(cert_path), Some(key_path)) => TlsMode::Custom {
            cert_path,
            key_path,
        },
        _ => TlsMode::Disabled,
    };

    let config = ServerConfig::tcp(args.addr)
        .with_exec_path(args.exec_path)
        .with_repo_root(args.repo_root)
        .with_tls(tls);
    let server = GrpcServer::new(config);

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    // `true` unsets $NOTIFY_SOCKET so spawned git commands don't inherit it.
    #[cfg(unix)]
    sd_notify::notify(true, &[sd_notify::NotifyState::Ready])?;

    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    let shutdown = async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C shutdown signal");
            }
            _ = sigterm_future => {
                info!("Received SIGTERM shutdown signal");
            }
        }
    };

    server.serve_tcp(shutdown).await?;

    info!("Server stopped");
    Ok(())
}
