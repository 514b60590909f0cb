use super::PoolConfig;
use crate::ctl::PgCtl;
use crate::error::{Error, Result};
use crate::port::{start_on_free_port, PortAllocator};
use crate::server::Server;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Factory for independent, throwaway PostgreSQL servers.
///
/// Every [`TempServer`] it creates gets its own scratch directory and, with
/// `auto_port`, its own port drawn from the pool's allocator. Pools built
/// with the same allocator never draw the same candidate twice in a row.
pub struct Pool {
    ctl: PgCtl,
    /// `None` in fixed-port mode.
    allocator: Option<Arc<PortAllocator>>,
    config: PoolConfig,
}

impl Pool {
    /// Pool with a private allocator built from `config`.
    pub fn new(ctl: PgCtl, config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let allocator = if config.auto_port {
            Some(Arc::new(PortAllocator::new(config.base_port, config.window)?))
        } else {
            None
        };
        Ok(Self {
            ctl,
            allocator,
            config,
        })
    }

    /// Pool drawing ports from a caller-supplied allocator. The config's
    /// `base_port` and `window` are ignored.
    pub fn with_allocator(
        ctl: PgCtl,
        allocator: Arc<PortAllocator>,
        config: PoolConfig,
    ) -> Result<Self> {
        let config = PoolConfig {
            base_port: allocator.base(),
            window: allocator.window(),
            ..config
        };
        config.validate()?;
        Ok(Self {
            ctl,
            allocator: Some(allocator),
            config,
        })
    }

    /// Temporary-server pool: environment-configured `pg_ctl` and the
    /// process-wide temporary-server port window.
    pub fn tempg() -> Result<Self> {
        Self::with_allocator(
            PgCtl::from_env()?,
            PortAllocator::shared_tempg(),
            PoolConfig::tempg(),
        )
    }

    /// Test-server pool: like [`tempg`](Self::tempg) with the test-server
    /// window.
    pub fn tpg() -> Result<Self> {
        Self::with_allocator(
            PgCtl::from_env()?,
            PortAllocator::shared_tpg(),
            PoolConfig::tpg(),
        )
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Port source, or `None` for a pool that always uses `start.port`.
    pub fn allocator(&self) -> Option<&Arc<PortAllocator>> {
        self.allocator.as_ref()
    }

    pub async fn create(&self) -> Result<TempServer> {
        self.create_with_cancel(&CancellationToken::new()).await
    }

    /// Create a scratch directory and start a server in it.
    ///
    /// On failure the scratch directory is removed before the error is
    /// returned.
    pub async fn create_with_cancel(&self, cancel: &CancellationToken) -> Result<TempServer> {
        let scratch = tempfile::Builder::new()
            .prefix(&self.config.scratch_prefix)
            .tempdir()
            .map_err(|e| {
                Error::Filesystem(format!("failed to create scratch directory: {}", e))
            })?;
        let server = Server::with_ctl(
            scratch.path().join(&self.config.data_subdir),
            self.ctl.clone(),
        );

        match self.start(&server, cancel).await {
            Ok(port) => {
                tracing::debug!(
                    "Temporary server ready in {} on port {}",
                    scratch.path().display(),
                    port
                );
                Ok(TempServer {
                    dir: scratch.path().to_path_buf(),
                    scratch: Some(scratch),
                    port,
                    server,
                })
            }
            Err(e) => {
                if e.is_cancelled() {
                    // The killed `pg_ctl start -w` may already have forked a
                    // postmaster; stop it before its directory disappears.
                    if let Err(stop) = self.ctl.stop(server.dir()).await {
                        tracing::debug!(
                            "No server to stop in {} after cancelled start: {}",
                            server.dir().display(),
                            stop
                        );
                    }
                }
                let dir = scratch.path().to_path_buf();
                if let Err(cleanup) = remove_scratch(scratch).await {
                    tracing::warn!(
                        "Failed to remove scratch directory {} after start failure: {}",
                        dir.display(),
                        cleanup
                    );
                }
                Err(e)
            }
        }
    }

    async fn start(&self, server: &Server, cancel: &CancellationToken) -> Result<u16> {
        server.set_init_options(self.config.init.clone()).await?;
        if let (true, Some(allocator)) = (self.config.auto_port, &self.allocator) {
            start_on_free_port(
                server,
                allocator,
                &self.config.start,
                self.config.start_attempts,
                cancel,
            )
            .await
        } else {
            server.set_start_options(self.config.start.clone()).await?;
            server.start_with_cancel(cancel).await?;
            Ok(server.port())
        }
    }
}

/// A running server that owns its scratch directory.
///
/// Call [`close`](Self::close) on every path, including test failures. If a
/// `TempServer` is dropped without being closed the scratch directory is
/// still removed, but the server process is left for PostgreSQL to notice
/// its data directory is gone.
pub struct TempServer {
    dir: PathBuf,
    scratch: Option<TempDir>,
    port: u16,
    server: Server,
}

impl TempServer {
    /// Scratch directory holding the data directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Connection descriptor; [`Error::NotRunning`] after close.
    pub fn name(&self) -> Result<String> {
        self.server.name()
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    pub fn is_closed(&self) -> bool {
        self.scratch.is_none()
    }

    /// Stop the server and remove the scratch directory.
    ///
    /// A server that is already stopped is not an error, so closing twice is
    /// fine. The directory is removed even when stopping fails; the first
    /// error is returned.
    pub async fn close(&mut self) -> Result<()> {
        self.close_with_cancel(&CancellationToken::new()).await
    }

    /// Like [`close`](Self::close), but `cancel` aborts a hanging stop.
    ///
    /// The scratch directory is removed even then, and [`Error::Cancelled`]
    /// is returned. The handle keeps reporting the server as running.
    pub async fn close_with_cancel(&mut self, cancel: &CancellationToken) -> Result<()> {
        let mut errors = Vec::new();

        match self.server.stop_with_cancel(cancel).await {
            Ok(()) | Err(Error::NotRunning(_)) => {}
            Err(e) => errors.push(e),
        }

        if let Some(scratch) = self.scratch.take() {
            if let Err(e) = remove_scratch(scratch).await {
                errors.push(e);
            }
        }

        let mut errors = errors.into_iter();
        match errors.next() {
            None => Ok(()),
            Some(first) => {
                for other in errors {
                    tracing::warn!("Additional error closing {}: {}", self.dir.display(), other);
                }
                Err(first)
            }
        }
    }
}

impl Drop for TempServer {
    fn drop(&mut self) {
        if self.server.is_running() {
            tracing::warn!(
                "TempServer in {} dropped while running; call close() to stop it",
                self.dir.display()
            );
        }
    }
}

async fn remove_scratch(scratch: TempDir) -> Result<()> {
    let dir = scratch.path().to_path_buf();
    let outcome = tokio::task::spawn_blocking(move || scratch.close())
        .await
        .map_err(|e| Error::Filesystem(format!("failed to remove {}: {}", dir.display(), e)))?;
    match outcome {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Filesystem(format!(
            "failed to remove {}: {}",
            dir.display(),
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctl::StartOptions;
    use crate::runner::{ProcessRunner, RunOutput};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::ffi::OsString;
    use std::time::Duration;

    /// Minimal pg_ctl: initdb creates the directory, start and stop can be
    /// made to misbehave.
    #[derive(Default)]
    struct FakeCluster {
        running: Arc<Mutex<HashSet<PathBuf>>>,
        refuse_start: bool,
        refuse_stop: bool,
        /// Stop fails to spawn instead of exiting.
        stop_spawn_error: bool,
        /// Stop hangs until cancelled.
        hang_stop: bool,
        /// Start forks the server, then is cancelled while waiting for it.
        cancel_after_fork: bool,
    }

    #[async_trait]
    impl ProcessRunner for FakeCluster {
        async fn run(&self, args: &[OsString], cancel: &CancellationToken) -> Result<RunOutput> {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled("fake".into()));
            }
            let dir_at = args.iter().position(|a| a == "-D").unwrap() + 1;
            let dir = PathBuf::from(&args[dir_at]);
            let verb = args[0].to_str().unwrap();
            match verb {
                "start" if self.cancel_after_fork => {
                    self.running.lock().insert(dir);
                    return Err(Error::Cancelled("fake start".into()));
                }
                "stop" if self.stop_spawn_error => {
                    return Err(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::PermissionDenied,
                        "pg_ctl not executable",
                    )));
                }
                "stop" if self.hang_stop => {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(Error::Cancelled("fake stop".into()));
                        }
                        _ = tokio::time::sleep(Duration::from_secs(60)) => {}
                    }
                }
                _ => {}
            }
            Ok(match verb {
                "initdb" => {
                    std::fs::create_dir_all(&dir)?;
                    RunOutput::success()
                }
                "status" if !dir.exists() => RunOutput::exit(4),
                "status" if self.running.lock().contains(&dir) => RunOutput::success(),
                "status" => RunOutput::exit(3),
                "start" if self.refuse_start => RunOutput::exit(1),
                "start" => {
                    self.running.lock().insert(dir);
                    RunOutput::success()
                }
                "stop" if self.refuse_stop => RunOutput::exit(1),
                "stop" if self.running.lock().remove(&dir) => RunOutput::success(),
                "stop" => RunOutput::exit(1),
                other => panic!("unexpected verb {}", other),
            })
        }
    }

    #[tokio::test]
    async fn close_returns_stop_error_and_still_removes_directory() {
        let pool = pool(
            FakeCluster {
                stop_spawn_error: true,
                ..FakeCluster::default()
            },
            PoolConfig::tempg(),
        );
        let mut server = pool.create().await.unwrap();
        let dir = server.dir().to_path_buf();

        let err = server.close().await.unwrap_err();

        assert!(matches!(err, Error::Io(_)), "{:?}", err);
        assert!(!dir.exists());
        assert!(server.is_closed());
    }

    #[tokio::test]
    async fn cancelled_close_still_removes_directory() {
        let pool = pool(
            FakeCluster {
                hang_stop: true,
                ..FakeCluster::default()
            },
            PoolConfig::tempg(),
        );
        let mut server = pool.create().await.unwrap();
        let dir = server.dir().to_path_buf();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = server.close_with_cancel(&cancel).await.unwrap_err();

        assert!(err.is_cancelled(), "{:?}", err);
        assert!(!dir.exists());
        // The stop never completed.
        assert!(server.server().is_running());
    }

    #[tokio::test]
    async fn cancelled_start_stops_forked_server() {
        let cluster = FakeCluster {
            cancel_after_fork: true,
            ..FakeCluster::default()
        };
        let running = Arc::clone(&cluster.running);
        let pool = pool(cluster, PoolConfig::tempg());

        let err = match pool.create().await {
            Ok(_) => panic!("create should be cancelled"),
            Err(e) => e,
        };

        assert!(err.is_cancelled(), "{:?}", err);
        assert!(running.lock().is_empty());
    }

    #[test]
    fn fixed_port_pool_has_no_allocator() {
        let ctl = PgCtl::with_runner(Arc::new(FakeCluster::default()));
        let fixed = Pool::new(
            ctl.clone(),
            PoolConfig {
                auto_port: false,
                ..PoolConfig::tempg()
            },
        )
        .unwrap();
        assert!(fixed.allocator().is_none());

        let auto = Pool::new(ctl, PoolConfig::tempg()).unwrap();
        let allocator = auto.allocator().unwrap();
        assert_eq!((allocator.base(), allocator.window()), (25432, 1024));
    }

    fn pool(cluster: FakeCluster, config: PoolConfig) -> Pool {
        let ctl = PgCtl::with_runner(Arc::new(cluster));
        let allocator = Arc::new(PortAllocator::new(41000, 64).unwrap());
        Pool::with_allocator(ctl, allocator, config).unwrap()
    }

    #[tokio::test]
    async fn create_then_close_removes_scratch() {
        let pool = pool(
            FakeCluster::default(),
            PoolConfig {
                scratch_prefix: "pgctl-unit-".into(),
                ..PoolConfig::tempg()
            },
        );
        let mut server = pool.create().await.unwrap();
        let dir = server.dir().to_path_buf();

        assert!(dir.join("data").is_dir());
        assert!(dir
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("pgctl-unit-"));
        assert!((41000..41064).contains(&server.port()));
        assert!(server.name().unwrap().contains(&format!(":{}/", server.port())));

        server.close().await.unwrap();
        assert!(!dir.exists());
        assert!(server.is_closed());
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn failed_create_leaves_no_scratch_behind() {
        let pool = pool(
            FakeCluster {
                refuse_start: true,
                ..FakeCluster::default()
            },
            PoolConfig {
                scratch_prefix: "pgctl-fail-".into(),
                start_attempts: 2,
                ..PoolConfig::tempg()
            },
        );
        let before = scratch_dirs("pgctl-fail-");

        let err = match pool.create().await {
            Ok(_) => panic!("create should fail"),
            Err(e) => e,
        };
        assert!(err.is_start_failed(), "{:?}", err);
        assert_eq!(scratch_dirs("pgctl-fail-"), before);
    }

    #[tokio::test]
    async fn close_removes_directory_even_when_stop_fails() {
        let pool = pool(
            FakeCluster {
                refuse_stop: true,
                ..FakeCluster::default()
            },
            PoolConfig::tempg(),
        );
        let mut server = pool.create().await.unwrap();
        let dir = server.dir().to_path_buf();

        // pg_ctl stop failures surface as NotRunning, which close tolerates.
        server.close().await.unwrap();
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn fixed_port_mode_uses_template_port() {
        let pool = pool(
            FakeCluster::default(),
            PoolConfig {
                auto_port: false,
                start: StartOptions::with_port(6543),
                ..PoolConfig::tempg()
            },
        );
        let mut server = pool.create().await.unwrap();
        assert_eq!(server.port(), 6543);
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_create_cleans_up() {
        let pool = pool(
            FakeCluster::default(),
            PoolConfig {
                scratch_prefix: "pgctl-cancel-".into(),
                ..PoolConfig::tempg()
            },
        );
        let before = scratch_dirs("pgctl-cancel-");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = match pool.create_with_cancel(&cancel).await {
            Ok(_) => panic!("create should be cancelled"),
            Err(e) => e,
        };
        assert!(err.is_cancelled(), "{:?}", err);
        assert_eq!(scratch_dirs("pgctl-cancel-"), before);
    }

    #[test]
    fn with_allocator_takes_window_from_allocator() {
        let pool = pool(FakeCluster::default(), PoolConfig::tpg());
        assert_eq!(pool.config().base_port, 41000);
        assert_eq!(pool.config().window, 64);
        assert_eq!(pool.config().scratch_prefix, "tpg-");
    }

    fn scratch_dirs(prefix: &str) -> HashSet<PathBuf> {
        std::fs::read_dir(std::env::temp_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(prefix))
            .map(|e| e.path())
            .collect()
    }
}
