//! gRPC connection to the tunnel server.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};
use tonic::{Request, Streaming};
use tracing::{debug, info};

use gitgrpc_core::{FrameReader, FrameWriter, StreamMetadata};
use gitgrpc_proto::v1::Data;
use gitgrpc_proto::v1::git_client::GitClient;

use crate::address::RemoteAddress;
use crate::error::RemoteError;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// PEM CA certificate trusted in addition to the system roots.
    pub ca_cert: Option<PathBuf>,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Capacity of the outbound frame channel.
    pub channel_size: usize,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            ca_cert: None,
            connect_timeout: Duration::from_secs(10),
            channel_size: 16,
        }
    }
}

/// The two halves of an open `Connect` stream.
pub struct GitStream {
    pub reader: FrameReader<Streaming<Data>>,
    pub writer: FrameWriter<Data>,
}

/// Dial the server named by `address`.
pub async fn open_channel(
    address: &RemoteAddress,
    options: &ConnectOptions,
) -> Result<Channel, RemoteError> {
    let transport_err = |reason: String| RemoteError::Transport {
        endpoint: address.endpoint.clone(),
        reason,
    };

    let mut endpoint = Endpoint::from_shared(address.endpoint.clone())
        .map_err(|e| transport_err(e.to_string()))?
        .connect_timeout(options.connect_timeout)
        .http2_keep_alive_interval(Duration::from_secs(30))
        .keep_alive_timeout(Duration::from_secs(10));

    if address.tls {
        let mut tls_config = ClientTlsConfig::new().with_enabled_roots();
        if let Some(ca_path) = &options.ca_cert {
            let ca_pem = std::fs::read_to_string(ca_path).map_err(|source| RemoteError::CaCert {
                path: ca_path.clone(),
                source,
            })?;
            tls_config = tls_config.ca_certificate(Certificate::from_pem(ca_pem));
            info!(ca_cert = %ca_path.display(), "TLS configured with custom CA cert");
        }
        endpoint = endpoint
            .tls_config(tls_config)
            .map_err(|e| transport_err(e.to_string()))?;
    }

    endpoint.connect().await.map_err(|e| {
        debug!(error = ?e, "connection error details");
        transport_err(format!("{e}: {}", error_chain(&e)))
    })
}

/// Open a `Connect` stream for `service` on `repository`.
///
/// Resolves once the server has accepted the stream, so validation
/// failures surface here as `RemoteError::Status`.
pub async fn open_stream(
    channel: Channel,
    service: &str,
    repository: &str,
    channel_size: usize,
) -> Result<GitStream, RemoteError> {
    let (tx, rx) = mpsc::channel::<Data>(channel_size.max(1));
    let mut request = Request::new(ReceiverStream::new(rx));
    StreamMetadata::new(service, repository).attach(request.metadata_mut())?;

    let response = GitClient::new(channel).connect(request).await?;
    debug!(%service, %repository, "Stream accepted");

    Ok(GitStream {
        reader: FrameReader::new(response.into_inner()),
        writer: FrameWriter::new(tx),
    })
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut chain = Vec::new();
    let mut current = err.source();
    while let Some(e) = current {
        chain.push(e.to_string());
        current = e.source();
    }
    if chain.is_empty() {
        String::from("(no further details)")
    } else {
        chain.join(" -> ")
    }
}
