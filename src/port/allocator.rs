use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::net::TcpListener;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;

/// Base port of the window used by [`TempServer`](crate::pool::TempServer).
pub const TEMPG_BASE_PORT: u16 = 25432;
/// Window size used by [`TempServer`](crate::pool::TempServer).
pub const TEMPG_WINDOW: u16 = 1024;
/// Base port of the window used by [`TestServer`](crate::pool::TestServer).
pub const TPG_BASE_PORT: u16 = 15432;
/// Window size used by [`TestServer`](crate::pool::TestServer).
pub const TPG_WINDOW: u16 = 128;

static SHARED_TEMPG: OnceLock<Arc<PortAllocator>> = OnceLock::new();
static SHARED_TPG: OnceLock<Arc<PortAllocator>> = OnceLock::new();

/// Round-robin source of candidate ports in `[base, base + window)`.
///
/// The counter only orders candidate draws; it does not reserve anything.
/// Another process can take a candidate at any time, which is why callers
/// probe it with [`is_port_available`] and retry failed starts.
///
/// # Thread Safety
///
/// The lock is held only for the read-and-increment of the counter, never
/// while probing or while a server starts.
#[derive(Debug)]
pub struct PortAllocator {
    base: u16,
    window: u16,
    next_index: Mutex<u16>,
}

impl PortAllocator {
    /// Allocator over `window` ports starting at `base`.
    ///
    /// Fails when the window is empty or runs past port 65535.
    pub fn new(base: u16, window: u16) -> Result<Self> {
        if window == 0 {
            return Err(Error::PortAllocation(
                "port window must contain at least one port".to_string(),
            ));
        }
        if base == 0 || u32::from(base) + u32::from(window) - 1 > u32::from(u16::MAX) {
            return Err(Error::PortAllocation(format!(
                "port window {}+{} is outside 1..=65535",
                base, window
            )));
        }
        Ok(Self {
            base,
            window,
            next_index: Mutex::new(0),
        })
    }

    /// Fresh allocator over the temporary-server window.
    pub fn tempg() -> Self {
        Self {
            base: TEMPG_BASE_PORT,
            window: TEMPG_WINDOW,
            next_index: Mutex::new(0),
        }
    }

    /// Fresh allocator over the test-server window.
    pub fn tpg() -> Self {
        Self {
            base: TPG_BASE_PORT,
            window: TPG_WINDOW,
            next_index: Mutex::new(0),
        }
    }

    /// Process-wide allocator for the temporary-server window.
    ///
    /// Pools that share it draw distinct candidates even when created
    /// independently.
    pub fn shared_tempg() -> Arc<Self> {
        Arc::clone(SHARED_TEMPG.get_or_init(|| Arc::new(Self::tempg())))
    }

    /// Process-wide allocator for the test-server window.
    pub fn shared_tpg() -> Arc<Self> {
        Arc::clone(SHARED_TPG.get_or_init(|| Arc::new(Self::tpg())))
    }

    pub fn base(&self) -> u16 {
        self.base
    }

    pub fn window(&self) -> u16 {
        self.window
    }

    /// Draw the next candidate. Consecutive draws cycle through the window.
    pub fn next_candidate(&self) -> u16 {
        let index = {
            let mut next = self.next_index.lock();
            let index = *next;
            *next = (index + 1) % self.window;
            index
        };
        self.base + index
    }

    /// Draw candidates until one passes [`is_port_available`].
    ///
    /// Busy candidates are skipped without limit other than the window size:
    /// once every port in the window has been tried this returns
    /// [`Error::PortAllocation`]. Checks `cancel` before each draw.
    pub fn acquire(&self, cancel: &CancellationToken) -> Result<u16> {
        for _ in 0..self.window {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled("port allocation".to_string()));
            }
            let port = self.next_candidate();
            if is_port_available(port) {
                return Ok(port);
            }
            tracing::debug!("Candidate port {} is busy, drawing another", port);
        }
        Err(Error::PortAllocation(format!(
            "no free port among {} candidates starting at {}",
            self.window, self.base
        )))
    }
}

/// Whether `port` can be bound on loopback right now.
///
/// Binds and immediately releases. Checks both 127.0.0.1 and 0.0.0.0: on
/// macOS a loopback bind can succeed while the wildcard address is taken.
pub fn is_port_available(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok() && TcpListener::bind(("0.0.0.0", port)).is_ok()
}
