//! Picking loopback ports for servers started in parallel.
//!
//! Two levels of retry cooperate:
//!
//! - [`PortAllocator::acquire`] skips candidates that fail a bind probe.
//!   These misses are free.
//! - [`start_on_free_port`] retries a failed server start on a fresh
//!   candidate, up to a fixed budget, to cover the window between the probe
//!   and the server binding the port.

mod allocator;
mod retry;

pub use allocator::*;
pub use retry::*;
