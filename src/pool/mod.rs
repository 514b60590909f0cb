//! Throwaway servers with their own directory and port.
//!
//! - [`Pool`] creates servers; [`PoolConfig`] holds its settings.
//! - [`TempServer`] returns errors to the caller.
//! - [`TestServer`] reports failures through a [`FailureReporter`], which by
//!   default fails the current test.
//!
//! Nothing is reclaimed automatically: call `close` on every server.

mod config;
mod temp;
mod test_server;

pub use config::*;
pub use temp::*;
pub use test_server::*;
