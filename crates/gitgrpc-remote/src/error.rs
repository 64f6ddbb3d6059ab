//! Remote helper errors.

use std::io;
use std::path::PathBuf;

use tonic::Status;

use gitgrpc_core::{MetadataError, RelayError};

use crate::address::AddressError;

/// Everything that can end a helper run. Each one makes the helper exit 1.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),

    #[error("unexpected error reading stdin: {0}")]
    ControlRead(#[source] io::Error),

    #[error("writing stdout: {0}")]
    ControlWrite(#[source] io::Error),

    #[error("parsing remote address: {0}")]
    Address(#[from] AddressError),

    #[error("Failed to read CA cert {}: {source}", path.display())]
    CaCert {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("dial {endpoint}: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("{}", .0.message())]
    Status(Status),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Relay(RelayError),
}

impl From<Status> for RemoteError {
    fn from(status: Status) -> Self {
        Self::Status(status)
    }
}

impl From<RelayError> for RemoteError {
    /// A failed RPC surfaces inside the relay as an I/O error wrapping the
    /// `Status`; unwrap it so the server's message reaches the user as-is.
    fn from(err: RelayError) -> Self {
        let status = err
            .io_error()
            .and_then(io::Error::get_ref)
            .and_then(|inner| inner.downcast_ref::<Status>());
        match status {
            Some(status) => Self::Status(status.clone()),
            None => Self::Relay(err),
        }
    }
}

impl RemoteError {
    /// The gRPC status, when the server rejected or failed the session.
    pub const fn status(&self) -> Option<&Status> {
        match self {
            Self::Status(status) => Some(status),
            _ => None,
        }
    }
}
