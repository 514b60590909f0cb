//! Direct `pg_ctl` invocations.
//!
//! [`PgCtl`] wraps the `initdb`, `start`, `status` and `stop` verbs and maps
//! their exit codes onto [`Error`](crate::Error) kinds:
//!
//! | verb   | exit 0  | exit 3       | exit 4           | other non-zero  |
//! |--------|---------|--------------|------------------|-----------------|
//! | status | running | `NotRunning` | `NotInitialized` | `Process`       |
//! | start  | ok      | `StartFailed`| `StartFailed`    | `StartFailed`   |
//! | stop   | ok      | `NotRunning` | `NotRunning`     | `NotRunning`    |
//! | initdb | ok      | `Process`    | `Process`        | `Process`       |
//!
//! It keeps no state between calls. Use [`Server`](crate::Server) for a
//! handle that tracks whether it started the server.

mod executor;
mod options;

pub use executor::*;
pub use options::*;
