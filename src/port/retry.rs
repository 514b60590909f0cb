use super::PortAllocator;
use crate::ctl::StartOptions;
use crate::error::{Error, Result};
use crate::server::Server;
use tokio_util::sync::CancellationToken;

/// Start attempts made by the pooled helpers before giving up.
pub const DEFAULT_START_ATTEMPTS: u32 = 3;

/// Start `server` on a port drawn from `allocator`.
///
/// `template` supplies everything but the port. Each attempt draws a probed
/// candidate and starts the server on it; a failed start costs one of
/// `attempts`, a busy candidate does not. When the budget runs out the last
/// start error is returned. Cancellation aborts immediately.
pub async fn start_on_free_port(
    server: &Server,
    allocator: &PortAllocator,
    template: &StartOptions,
    attempts: u32,
    cancel: &CancellationToken,
) -> Result<u16> {
    let mut last_error = None;

    for attempt in 1..=attempts {
        let port = allocator.acquire(cancel)?;
        server
            .set_start_options(StartOptions {
                port,
                ..template.clone()
            })
            .await?;

        match server.start_with_cancel(cancel).await {
            Ok(()) => return Ok(port),
            Err(e) if e.is_cancelled() || e.is_already_running() => return Err(e),
            Err(e) => {
                tracing::warn!(
                    "Start attempt {}/{} on port {} failed for {}: {}",
                    attempt,
                    attempts,
                    port,
                    server.dir().display(),
                    e
                );
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        Error::PortAllocation("start attempt budget is zero".to_string())
    }))
}
