//! git-remote-grpc
//!
//! git remote helper for `grpc://` and `grpcs://` remotes. git runs it as
//! `git-remote-grpc <remote> [<url>]` with the protocol on stdin/stdout.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tokio::io::BufReader;

use gitgrpc_core::tracing_init::init_tracing;
use gitgrpc_remote::{ConnectOptions, RemoteAddress, RemoteHelper};

#[derive(Parser, Debug)]
#[command(name = "git-remote-grpc")]
#[command(version, about = "git remote helper that tunnels fetch and push over gRPC")]
struct Args {
    /// Remote name, or the URL when git passes a single argument.
    remote: String,

    /// Remote URL.
    url: Option<String>,

    /// PEM CA certificate to trust for grpcs:// remotes.
    #[arg(long, env = "GITGRPC_CA_CERT")]
    ca_cert: Option<PathBuf>,

    /// Connection timeout in seconds.
    #[arg(long, env = "GITGRPC_CONNECT_TIMEOUT", default_value_t = 10)]
    connect_timeout: u64,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "GITGRPC_LOG_JSON")]
    log_json: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing("gitgrpc_remote=warn,gitgrpc_core=warn", args.log_json);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => return fail(&format!("failed to build tokio runtime: {e}")),
    };
    let result = runtime.block_on(run(args));

    // A stdin read still pending on the blocking pool only returns once git
    // closes the pipe, and git waits for this process to exit first.
    runtime.shutdown_background();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(&e.to_string()),
    }
}

#[allow(clippy::print_stderr)]
fn fail(message: &str) -> ExitCode {
    eprintln!("git-remote-grpc: {message}");
    ExitCode::FAILURE
}

async fn run(args: Args) -> anyhow::Result<()> {
    let url = args.url.as_deref().unwrap_or(&args.remote);
    let address = RemoteAddress::parse(url).map_err(gitgrpc_remote::RemoteError::from)?;

    let options = ConnectOptions {
        ca_cert: args.ca_cert,
        connect_timeout: Duration::from_secs(args.connect_timeout),
        ..Default::default()
    };

    let helper = RemoteHelper::new(address, options);
    helper
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await?;
    Ok(())
}
