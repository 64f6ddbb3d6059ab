//! Stream-establishment metadata.
//!
//! The remote helper names the backing command and the repository in the
//! request metadata of `Git.Connect`; the server reads them exactly once,
//! before any data is exchanged.

use tonic::metadata::{Ascii, MetadataMap, MetadataValue};

/// Metadata key carrying the backing command name.
pub const SERVICE_KEY: &str = "service";

/// Metadata key carrying the repository identifier.
pub const REPOSITORY_KEY: &str = "repository";

/// Errors reading or writing stream metadata.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("missing {0} metadata")]
    Missing(&'static str),

    #[error("expected exactly one {key} metadata value, got {count}")]
    Repeated { key: &'static str, count: usize },

    #[error("{0} metadata is not valid ASCII")]
    NotAscii(&'static str),
}

/// The two required fields of a `Connect` stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMetadata {
    pub service: String,
    pub repository: String,
}

impl StreamMetadata {
    pub fn new(service: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            repository: repository.into(),
        }
    }

    /// Attach `service` and `repository` to outgoing request metadata.
    ///
    /// Existing values for either key are replaced.
    pub fn attach(&self, map: &mut MetadataMap) -> Result<(), MetadataError> {
        map.insert(SERVICE_KEY, ascii_value(SERVICE_KEY, &self.service)?);
        map.insert(REPOSITORY_KEY, ascii_value(REPOSITORY_KEY, &self.repository)?);
        Ok(())
    }

    /// Read both fields from incoming request metadata.
    ///
    /// Each key must be present exactly once; a repeated key is rejected
    /// rather than picking one of the values.
    pub fn extract(map: &MetadataMap) -> Result<Self, MetadataError> {
        Ok(Self {
            service: single_value(map, SERVICE_KEY)?,
            repository: single_value(map, REPOSITORY_KEY)?,
        })
    }
}

fn ascii_value(key: &'static str, value: &str) -> Result<MetadataValue<Ascii>, MetadataError> {
    value.parse().map_err(|_| MetadataError::NotAscii(key))
}

fn single_value(map: &MetadataMap, key: &'static str) -> Result<String, MetadataError> {
    let values: Vec<_> = map.get_all(key).iter().collect();
    match values.as_slice() {
        [] => Err(MetadataError::Missing(key)),
        [value] => value
            .to_str()
            .map(str::to_owned)
            .map_err(|_| MetadataError::NotAscii(key)),
        _ => Err(MetadataError::Repeated {
            key,
            count: values.len(),
        }),
    }
}
