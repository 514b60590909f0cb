use super::options::{InitOptions, StartOptions};
use crate::config::PgCtlConfig;
use crate::error::{Error, Result};
use crate::runner::{CommandRunner, ProcessRunner, RunOutput};
use std::ffi::OsString;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// `pg_ctl status` exit code for "server is not running".
pub const EXIT_NOT_RUNNING: i32 = 3;

/// `pg_ctl status` exit code for "no accessible data directory".
pub const EXIT_NOT_INITIALIZED: i32 = 4;

/// Stateless wrapper around the four `pg_ctl` verbs.
///
/// Each call spawns exactly one process (two for `start`, which checks
/// status first) and maps its exit code to an [`Error`] kind. Cloning is
/// cheap and clones share the runner.
#[derive(Clone)]
pub struct PgCtl {
    runner: Arc<dyn ProcessRunner>,
}

impl fmt::Debug for PgCtl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgCtl").finish_non_exhaustive()
    }
}

impl Default for PgCtl {
    fn default() -> Self {
        Self::with_runner(Arc::new(CommandRunner::default()))
    }
}

impl PgCtl {
    pub fn new(config: &PgCtlConfig) -> Self {
        Self::with_runner(Arc::new(CommandRunner::new(config)))
    }

    /// Configure from `POSTGRES_HOME` / `PGCTL_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(&PgCtlConfig::from_env()?))
    }

    pub fn with_runner(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    /// Create `dir` and initialize it as a database cluster.
    pub async fn init_db(&self, dir: &Path, opts: &InitOptions) -> Result<()> {
        self.init_db_with_cancel(dir, opts, &CancellationToken::new())
            .await
    }

    pub async fn init_db_with_cancel(
        &self,
        dir: &Path,
        opts: &InitOptions,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match tokio::fs::metadata(dir).await {
            Ok(_) => return Err(Error::AlreadyExists(dir.to_path_buf())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(e)),
        }

        let args = vec![
            OsString::from("initdb"),
            OsString::from("-s"),
            OsString::from("-D"),
            dir.as_os_str().to_owned(),
            OsString::from("-o"),
            OsString::from(opts.options()),
        ];
        let out = self.runner.run(&args, cancel).await?;
        if !out.is_success() {
            tracing::warn!(
                "initdb failed for {}: {}",
                dir.display(),
                out.stderr.trim()
            );
            return Err(unexpected("initdb", out));
        }
        tracing::debug!("Initialized data directory {}", dir.display());
        Ok(())
    }

    /// Start a server on `dir` and wait until it accepts connections.
    pub async fn start(&self, dir: &Path, opts: &StartOptions) -> Result<()> {
        self.start_with_cancel(dir, opts, &CancellationToken::new())
            .await
    }

    pub async fn start_with_cancel(
        &self,
        dir: &Path,
        opts: &StartOptions,
        cancel: &CancellationToken,
    ) -> Result<()> {
        // Refuse to launch a second postmaster on the same directory.
        match self.status_with_cancel(dir, cancel).await {
            Ok(()) => return Err(Error::AlreadyRunning(dir.to_path_buf())),
            Err(Error::NotRunning(_)) => {}
            Err(e) => return Err(e),
        }

        let args = vec![
            OsString::from("start"),
            OsString::from("-s"),
            OsString::from("-D"),
            dir.as_os_str().to_owned(),
            OsString::from("-w"),
            OsString::from("-o"),
            OsString::from(opts.options()),
        ];
        let out = self.runner.run(&args, cancel).await?;
        if !out.is_success() {
            tracing::warn!(
                "Start failed for {} (exit {:?}): {}",
                dir.display(),
                out.code,
                out.stderr.trim()
            );
            return Err(Error::StartFailed {
                dir: dir.to_path_buf(),
                stderr: out.stderr,
            });
        }
        tracing::info!("Started database in {} on port {}", dir.display(), opts.port());
        Ok(())
    }

    /// Check whether a server is running on `dir`.
    ///
    /// `Ok(())` means running; [`Error::NotRunning`] and
    /// [`Error::NotInitialized`] report the two expected negative answers.
    pub async fn status(&self, dir: &Path) -> Result<()> {
        self.status_with_cancel(dir, &CancellationToken::new()).await
    }

    pub async fn status_with_cancel(&self, dir: &Path, cancel: &CancellationToken) -> Result<()> {
        let args = vec![
            OsString::from("status"),
            OsString::from("-D"),
            dir.as_os_str().to_owned(),
        ];
        let out = self.runner.run(&args, cancel).await?;
        match out.code {
            Some(0) => Ok(()),
            Some(EXIT_NOT_RUNNING) => Err(Error::NotRunning(dir.to_path_buf())),
            Some(EXIT_NOT_INITIALIZED) => Err(Error::NotInitialized(dir.to_path_buf())),
            _ => Err(unexpected("status", out)),
        }
    }

    /// Stop the server on `dir`.
    ///
    /// Any non-zero exit is reported as [`Error::NotRunning`]; the captured
    /// stderr is logged for callers that need to tell the cases apart.
    pub async fn stop(&self, dir: &Path) -> Result<()> {
        self.stop_with_cancel(dir, &CancellationToken::new()).await
    }

    pub async fn stop_with_cancel(&self, dir: &Path, cancel: &CancellationToken) -> Result<()> {
        let args = vec![
            OsString::from("stop"),
            OsString::from("-s"),
            OsString::from("-D"),
            dir.as_os_str().to_owned(),
        ];
        let out = self.runner.run(&args, cancel).await?;
        if !out.is_success() {
            tracing::warn!(
                "Stop failed for {} (exit {:?}): {}",
                dir.display(),
                out.code,
                out.stderr.trim()
            );
            return Err(Error::NotRunning(dir.to_path_buf()));
        }
        tracing::info!("Stopped database in {}", dir.display());
        Ok(())
    }
}

fn unexpected(verb: &'static str, out: RunOutput) -> Error {
    Error::Process {
        verb,
        code: out.code,
        stderr: out.stderr,
    }
}
