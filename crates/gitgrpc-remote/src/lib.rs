//! gitgrpc remote helper library.
//!
//! Implements the `connect` capability of git's remote-helper protocol on
//! top of the `Git.Connect` bidirectional stream.

pub mod address;
pub mod connect;
pub mod control;
pub mod error;
pub mod helper;

pub use address::{AddressError, RemoteAddress};
pub use connect::{ConnectOptions, GitStream, open_channel, open_stream};
pub use control::{ControlChannel, ControlCommand};
pub use error::RemoteError;
pub use helper::RemoteHelper;
