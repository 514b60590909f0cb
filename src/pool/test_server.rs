use super::{Pool, TempServer};
use crate::error::Result;
use crate::server::Server;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Where a [`TestServer`] sends its failures.
///
/// `fatal` is used when no server could be started and must not return.
/// `error` is used for cleanup failures, after cleanup has run to completion.
pub trait FailureReporter: Send + Sync {
    fn fatal(&self, message: &str) -> !;
    fn error(&self, message: &str);
}

/// Fails the calling test by panicking.
#[derive(Debug, Default, Clone, Copy)]
pub struct PanicReporter;

impl FailureReporter for PanicReporter {
    fn fatal(&self, message: &str) -> ! {
        panic!("{}", message)
    }

    fn error(&self, message: &str) {
        if std::thread::panicking() {
            // Already failing; a second panic would abort the test binary.
            tracing::error!("{}", message);
        } else {
            panic!("{}", message)
        }
    }
}

/// A [`TempServer`] for use inside tests: failures are reported instead of
/// returned.
///
/// ```no_run
/// # async fn example() {
/// let mut pg = pgctl::TestServer::start().await;
/// let dsn = pg.name();
/// // ... connect to `dsn` ...
/// pg.close().await;
/// # }
/// ```
pub struct TestServer {
    inner: TempServer,
    reporter: Arc<dyn FailureReporter>,
}

impl TestServer {
    /// Start a server from the shared test-server pool, panicking on failure.
    pub async fn start() -> Self {
        let reporter: Arc<dyn FailureReporter> = Arc::new(PanicReporter);
        let pool = match Pool::tpg() {
            Ok(pool) => pool,
            Err(e) => reporter.fatal(&format!("failed to configure PostgreSQL pool: {}", e)),
        };
        Self::from_pool(&pool, Some(reporter)).await
    }

    /// Start a server from `pool`. Without a reporter, [`PanicReporter`] is
    /// used.
    pub async fn from_pool(pool: &Pool, reporter: Option<Arc<dyn FailureReporter>>) -> Self {
        let reporter =
            reporter.unwrap_or_else(|| Arc::new(PanicReporter) as Arc<dyn FailureReporter>);
        match pool.create().await {
            Ok(inner) => Self { inner, reporter },
            Err(e) => reporter.fatal(&format!("failed to start PostgreSQL server: {}", e)),
        }
    }

    pub fn dir(&self) -> &Path {
        self.inner.dir()
    }

    pub fn port(&self) -> u16 {
        self.inner.port()
    }

    /// Connection descriptor. Empty once the server is closed.
    pub fn name(&self) -> String {
        self.inner.name().unwrap_or_default()
    }

    pub fn server(&self) -> &Server {
        self.inner.server()
    }

    /// Stop the server and remove its directory, reporting any failure.
    pub async fn close(&mut self) {
        self.close_with_cancel(&CancellationToken::new()).await
    }

    /// Like [`close`](Self::close); `cancel` aborts a hanging stop, which is
    /// reported like any other close failure.
    pub async fn close_with_cancel(&mut self, cancel: &CancellationToken) {
        if let Err(e) = self.inner.close_with_cancel(cancel).await {
            self.reporter
                .error(&format!("failed to close PostgreSQL server: {}", e));
        }
    }

    /// Same as [`close`](Self::close) but hands the error back.
    pub async fn try_close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}
