//! gitgrpc server library.
//!
//! Accepts `Git.Connect` streams, validates the requested service and
//! repository, and relays the stream to the matching git command.

pub mod executor;
pub mod server;
pub mod validate;

pub use executor::{ExecError, SubprocessExecutor};
pub use server::{GitServiceImpl, GrpcServer, ServerConfig, ServerError, TlsMode};
pub use validate::{
    RECEIVE_PACK, RepositoryPolicy, ServiceAllowList, ServiceValidator, UPLOAD_PACK,
    ValidatedRequest, ValidationError,
};
