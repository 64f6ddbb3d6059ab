//! One remote-helper session from first command to final byte.

use tokio::io::{AsyncBufRead, AsyncWrite};
use tracing::info;

use gitgrpc_core::{Relay, RelayStats};

use crate::address::RemoteAddress;
use crate::connect::{ConnectOptions, open_channel, open_stream};
use crate::control::ControlChannel;
use crate::error::RemoteError;

/// Drives git's side of the tunnel for one remote address.
#[derive(Debug, Clone)]
pub struct RemoteHelper {
    address: RemoteAddress,
    options: ConnectOptions,
    relay: Relay,
}

impl RemoteHelper {
    pub fn new(address: RemoteAddress, options: ConnectOptions) -> Self {
        Self {
            address,
            options,
            relay: Relay::new(),
        }
    }

    pub const fn address(&self) -> &RemoteAddress {
        &self.address
    }

    /// Serve git on `input` / `output` (the helper's stdin and stdout).
    ///
    /// The stream is opened before git is told the connection is up, so a
    /// rejected request never reaches the relay.
    pub async fn run<R, W>(&self, input: R, output: W) -> Result<RelayStats, RemoteError>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin,
    {
        let mut control = ControlChannel::new(input, output);
        let service = control.negotiate().await?;

        let channel = open_channel(&self.address, &self.options).await?;
        let stream = open_stream(
            channel,
            &service,
            &self.address.repository,
            self.options.channel_size,
        )
        .await?;
        control.confirm_connect().await?;

        info!(
            %service,
            endpoint = %self.address.endpoint,
            repository = %self.address.repository,
            "Tunnel established"
        );

        let (input, output) = control.into_inner();
        let stats = self
            .relay
            .run(input, output, stream.reader, stream.writer)
            .await?;
        info!(
            uploaded = stats.uploaded,
            downloaded = stats.downloaded,
            "Tunnel closed"
        );
        Ok(stats)
    }
}
