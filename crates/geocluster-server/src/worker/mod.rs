//! The worker side of the shard RPC.
//!
//! - [`endpoint`] - TCP accept loop and graceful shutdown ([`WorkerEndpoint`]).
//! - [`handler`] - one connection: read a shard, cluster it, answer.

pub mod endpoint;
pub mod handler;

pub use endpoint::WorkerEndpoint;
