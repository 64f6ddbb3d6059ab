//! TLS configuration for the gRPC server.

use std::io;
use std::path::{Path, PathBuf};

use tonic::transport::{Identity, ServerTlsConfig};
use tracing::info;

/// TLS configuration for the server.
#[derive(Debug, Clone, Default)]
pub enum TlsMode {
    /// No TLS (plaintext).
    #[default]
    Disabled,
    /// User-provided certificate and key files.
    Custom {
        /// Path to PEM-encoded certificate file.
        cert_path: PathBuf,
        /// Path to PEM-encoded private key file.
        key_path: PathBuf,
    },
}

impl TlsMode {
    /// Build a tonic `ServerTlsConfig` from this mode.
    ///
    /// Returns `None` if TLS is disabled.
    pub fn to_server_tls_config(&self) -> Result<Option<ServerTlsConfig>, TlsConfigError> {
        match self {
            Self::Disabled => Ok(None),
            Self::Custom {
                cert_path,
                key_path,
            } => {
                let cert_pem = read_pem("certificate", cert_path)?;
                let key_pem = read_pem("key", key_path)?;

                let identity = Identity::from_pem(cert_pem, key_pem);
                let tls_config = ServerTlsConfig::new().identity(identity);

                info!(
                    cert = %cert_path.display(),
                    key = %key_path.display(),
                    "Custom TLS enabled"
                );
                Ok(Some(tls_config))
            }
        }
    }

    pub const fn is_enabled(&self) -> bool {
        matches!(self, Self::Custom { .. })
    }
}

fn read_pem(kind: &'static str, path: &Path) -> Result<String, TlsConfigError> {
    std::fs::read_to_string(path).map_err(|source| TlsConfigError::FileRead {
        kind,
        path: path.to_path_buf(),
        source,
    })
}

/// TLS configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum TlsConfigError {
    #[error("failed to read TLS {kind} {}: {source}", path.display())]
    FileRead {
        kind: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
