//! Remote address parsing.
//!
//! git hands the helper a URL such as `grpc://host:8080/team/project.git`.
//! The authority becomes the gRPC endpoint and the path, minus its leading
//! slash, becomes the repository identifier sent to the server.

use std::fmt;
use std::str::FromStr;

use url::Url;

const PLAINTEXT_SCHEMES: &[&str] = &["grpc", "http"];
const TLS_SCHEMES: &[&str] = &["grpcs", "https"];

/// Errors parsing a remote URL.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid URL: {0}")]
    Invalid(#[from] url::ParseError),

    #[error("no host in {0}")]
    MissingHost(String),

    #[error("unsupported scheme {0:?} (expected grpc, grpcs, http or https)")]
    UnsupportedScheme(String),

    #[error("repository path {0:?} is not valid percent-encoded UTF-8")]
    InvalidPath(String),
}

/// Where to connect and which repository to ask for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAddress {
    /// `http://host:port` or `https://host:port`.
    pub endpoint: String,
    /// Whether the endpoint uses TLS.
    pub tls: bool,
    /// Repository identifier for the `repository` metadata key.
    pub repository: String,
}

impl RemoteAddress {
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let url = Url::parse(input)?;

        let tls = if TLS_SCHEMES.contains(&url.scheme()) {
            true
        } else if PLAINTEXT_SCHEMES.contains(&url.scheme()) {
            false
        } else {
            return Err(AddressError::UnsupportedScheme(url.scheme().to_string()));
        };

        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host,
            _ => return Err(AddressError::MissingHost(input.to_string())),
        };
        let port = url.port().unwrap_or(if tls { 443 } else { 80 });
        let endpoint = format!("{}://{host}:{port}", if tls { "https" } else { "http" });

        let raw_path = url.path();
        let trimmed = raw_path.strip_prefix('/').unwrap_or(raw_path);
        let repository =
            percent_decode(trimmed).ok_or_else(|| AddressError::InvalidPath(raw_path.to_string()))?;

        Ok(Self {
            endpoint,
            tls,
            repository,
        })
    }
}

impl FromStr for RemoteAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RemoteAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.endpoint, self.repository)
    }
}

/// Decode `%XX` escapes. `None` on a malformed escape or non-UTF-8 result.
fn percent_decode(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = s.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
