//! Remote-helper control channel.
//!
//! git writes newline-terminated commands on the helper's stdin and reads
//! replies from its stdout. Only two commands are understood:
//!
//! - `capabilities` is answered with `*connect` and a blank line;
//! - `connect <service>` hands the channel over to the tunnel once the
//!   stream is open, which is confirmed to git with a single blank line.
//!
//! Anything else ends the helper with an error.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::RemoteError;

/// Reply to `capabilities`: the mandatory `connect` capability, then the
/// blank line that ends the list.
pub const CAPABILITIES_REPLY: &[u8] = b"*connect\n\n";

/// Reply to `connect` once the tunnel is established.
pub const CONNECT_REPLY: &[u8] = b"\n";

const CONNECT_PREFIX: &str = "connect ";

/// One line from git, without its trailing newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Capabilities,
    Connect { service: String },
    Unrecognized(String),
}

impl ControlCommand {
    pub fn parse(line: &str) -> Self {
        if line == "capabilities" {
            Self::Capabilities
        } else if let Some(service) = line.strip_prefix(CONNECT_PREFIX) {
            Self::Connect {
                service: service.to_string(),
            }
        } else {
            Self::Unrecognized(line.to_string())
        }
    }
}

/// git's side of the helper: its stdin (buffered) and stdout.
///
/// The same buffered reader is later handed to the relay, so bytes git
/// sends right after the `connect` line are not lost.
pub struct ControlChannel<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> ControlChannel<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub const fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Read the next command line.
    ///
    /// End of input, including a final line without a newline, is an error:
    /// git always terminates commands.
    pub async fn read_command(&mut self) -> Result<ControlCommand, RemoteError> {
        let mut line = Vec::new();
        self.reader
            .read_until(b'\n', &mut line)
            .await
            .map_err(RemoteError::ControlRead)?;
        if line.pop() != Some(b'\n') {
            return Err(RemoteError::ControlRead(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "git closed the control channel",
            )));
        }
        let line = String::from_utf8(line).map_err(|e| {
            RemoteError::ControlRead(io::Error::new(io::ErrorKind::InvalidData, e))
        })?;
        Ok(ControlCommand::parse(&line))
    }

    /// Answer `capabilities` until git asks to connect; returns the service.
    pub async fn negotiate(&mut self) -> Result<String, RemoteError> {
        loop {
            match self.read_command().await? {
                ControlCommand::Capabilities => {
                    debug!("Advertising connect capability");
                    self.reply(CAPABILITIES_REPLY).await?;
                }
                ControlCommand::Connect { service } => {
                    debug!(%service, "git requested connect");
                    return Ok(service);
                }
                ControlCommand::Unrecognized(cmd) => {
                    return Err(RemoteError::UnsupportedCommand(cmd));
                }
            }
        }
    }

    /// Tell git the tunnel is up.
    pub async fn confirm_connect(&mut self) -> Result<(), RemoteError> {
        self.reply(CONNECT_REPLY).await
    }

    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }

    async fn reply(&mut self, bytes: &[u8]) -> Result<(), RemoteError> {
        self.writer
            .write_all(bytes)
            .await
            .map_err(RemoteError::ControlWrite)?;
        self.writer.flush().await.map_err(RemoteError::ControlWrite)
    }
}
