//! # pgctl
//!
//! Throwaway PostgreSQL servers for tests, driven through `pg_ctl`.
//!
//! ## Layers
//!
//! - **[`ctl`]**: one `pg_ctl` invocation per call (`initdb`, `start`,
//!   `status`, `stop`), with exit codes mapped to [`Error`] kinds
//! - **[`Server`]**: a handle bound to one data directory that serializes
//!   its own start/stop transitions and initializes on first start
//! - **[`port`]**: round-robin candidate ports with a bind probe, and a
//!   bounded start-with-retry loop
//! - **[`pool`]**: servers with a private scratch directory and port, plus
//!   cleanup that still removes the directory when stopping fails
//!
//! ## Quick Start
//!
//! ```no_run
//! use pgctl::Pool;
//!
//! # async fn example() -> Result<(), pgctl::Error> {
//! let pool = Pool::tempg()?;
//! let mut server = pool.create().await?;
//! println!("connect to {}", server.name()?);
//! server.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! - Any number of servers can be created, started and stopped from
//!   independent tasks
//! - Transitions on one [`Server`] are totally ordered by its own lock
//! - Every blocking operation has a `*_with_cancel` variant taking a
//!   `CancellationToken`; cancelling kills the in-flight `pg_ctl` and leaves
//!   the handle in its previous state

pub mod config;
pub mod ctl;
pub mod error;
pub mod pool;
pub mod port;
pub mod runner;
pub mod server;

pub use config::{is_available, PgCtlConfig};
pub use ctl::{data_source_name, InitOptions, PgCtl, StartOptions};
pub use error::{Error, Result};
pub use pool::{FailureReporter, PanicReporter, Pool, PoolConfig, TempServer, TestServer};
pub use port::PortAllocator;
pub use runner::{CommandRunner, ProcessRunner, RunOutput};
pub use server::Server;
