//! gitgrpc Protocol Buffers
//!
//! Generated protobuf code for the gitgrpc API.
//!
//! This crate contains:
//! - `Git` service with the bidirectional `Connect` stream
//! - `Data`, the opaque byte frame carried in both directions

#![allow(clippy::derive_partial_eq_without_eq)]

/// gitgrpc v1 API definitions.
///
/// All generated types and services are included here.
pub mod v1 {
    tonic::include_proto!("gitgrpc.v1");
}

// Re-export v1 as the default API version for convenience
pub use v1::*;
