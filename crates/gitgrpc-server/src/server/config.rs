//! Server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use gitgrpc_core::Relay;

use super::tls::TlsMode;
use crate::executor::SubprocessExecutor;
use crate::validate::{RepositoryPolicy, ServiceAllowList, ServiceValidator};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP bind address.
    pub addr: SocketAddr,

    /// Commands the server may run.
    pub allow_list: ServiceAllowList,

    /// Directory holding the backing commands. `PATH` lookup when unset.
    pub exec_path: Option<PathBuf>,

    /// Directory repository identifiers resolve under.
    pub repo_root: Option<PathBuf>,

    /// Transport security.
    pub tls: TlsMode,

    /// Capacity of each stream's outbound frame channel.
    pub channel_size: usize,

    /// HTTP/2 keepalive ping interval.
    pub keepalive_interval: Duration,

    /// HTTP/2 keepalive ping timeout.
    pub keepalive_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            allow_list: ServiceAllowList::git(),
            exec_path: None,
            repo_root: None,
            tls: TlsMode::Disabled,
            channel_size: 16,
            keepalive_interval: Duration::from_secs(30),
            keepalive_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Create a new server config listening on `addr`.
    pub fn tcp(addr: SocketAddr) -> Self {
        Self {
            addr,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_allow_list(mut self, allow_list: ServiceAllowList) -> Self {
        self.allow_list = allow_list;
        self
    }

    #[must_use]
    pub fn with_exec_path(mut self, exec_path: Option<PathBuf>) -> Self {
        self.exec_path = exec_path;
        self
    }

    #[must_use]
    pub fn with_repo_root(mut self, repo_root: Option<PathBuf>) -> Self {
        self.repo_root = repo_root;
        self
    }

    #[must_use]
    pub fn with_tls(mut self, tls: TlsMode) -> Self {
        self.tls = tls;
        self
    }

    /// Set the outbound frame channel capacity. Zero is treated as one.
    #[must_use]
    pub const fn with_channel_size(mut self, size: usize) -> Self {
        self.channel_size = if size == 0 { 1 } else { size };
        self
    }

    /// The validator every `Connect` request passes through.
    pub fn validator(&self) -> ServiceValidator {
        ServiceValidator::new(
            self.allow_list.clone(),
            RepositoryPolicy::new(self.repo_root.clone()),
        )
        .with_exec_path(self.exec_path.clone())
    }

    pub const fn executor(&self) -> SubprocessExecutor {
        SubprocessExecutor::new(Relay::new())
    }
}
