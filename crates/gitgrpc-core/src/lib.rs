//! `gitgrpc` Core Library
//!
//! Shared functionality for the gitgrpc server and remote helper:
//! - Byte-stream adapters over gRPC `Data` frames
//! - Duplex relay with half-close and combined outcome
//! - Stream metadata (`service`, `repository`) attach/extract
//! - Tracing initialisation

pub mod frame;
pub mod metadata;
pub mod relay;
pub mod tracing_init;

pub use frame::{ChannelEvent, FrameReader, FrameWriter, FromPayload};
pub use metadata::{MetadataError, REPOSITORY_KEY, SERVICE_KEY, StreamMetadata};
pub use relay::{DEFAULT_CHUNK_SIZE, Relay, RelayError, RelayStats};
