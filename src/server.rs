//! A PostgreSQL server bound to one data directory.
//!
//! [`Server`] owns the running flag for its directory. Every transition
//! (`start`, `stop`, option changes) runs under the handle's transition lock,
//! so concurrent callers are serialized and never need to lock anything
//! themselves.
//!
//! ```text
//! Stopped ──start()──► Running
//!    ▲                    │
//!    └──────stop()────────┘
//! ```
//!
//! The flag is the handle's own view: it is not re-checked against `pg_ctl`
//! on each call. A failed or cancelled transition leaves it unchanged.

use crate::ctl::{data_source_name, InitOptions, PgCtl, StartOptions};
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Stopped,
    Running,
}

#[derive(Debug)]
struct State {
    phase: Phase,
    init: InitOptions,
    start: StartOptions,
}

/// Handle to a PostgreSQL instance in `dir`.
///
/// # Lock discipline
///
/// - `transition` (`tokio::sync::Mutex`) is held for the whole of a lifecycle
///   operation, including the `pg_ctl` runs, so it must be an async mutex.
/// - `state` (`parking_lot::RwLock`) is only written while `transition` is
///   held and is never held across an await point. Accessors such as
///   [`is_running`](Self::is_running) read it without waiting for an
///   in-flight transition.
#[derive(Debug)]
pub struct Server {
    dir: PathBuf,
    ctl: PgCtl,
    transition: tokio::sync::Mutex<()>,
    state: RwLock<State>,
}

impl Server {
    /// Handle for `dir` using `pg_ctl` as configured by the environment.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::with_ctl(dir, PgCtl::from_env()?))
    }

    pub fn with_ctl(dir: impl Into<PathBuf>, ctl: PgCtl) -> Self {
        Self {
            dir: dir.into(),
            ctl,
            transition: tokio::sync::Mutex::new(()),
            state: RwLock::new(State {
                phase: Phase::Stopped,
                init: InitOptions::default(),
                start: StartOptions::default(),
            }),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_running(&self) -> bool {
        self.state.read().phase == Phase::Running
    }

    /// Effective port of the current start options.
    pub fn port(&self) -> u16 {
        self.state.read().start.port()
    }

    /// Connection descriptor, or [`Error::NotRunning`] when stopped.
    pub fn name(&self) -> Result<String> {
        let state = self.state.read();
        if state.phase != Phase::Running {
            return Err(Error::NotRunning(self.dir.clone()));
        }
        Ok(data_source_name(&state.init, &state.start))
    }

    /// Replace the options used when `start` has to initialize the directory.
    pub async fn set_init_options(&self, opts: InitOptions) -> Result<()> {
        let _guard = self.transition.lock().await;
        let mut state = self.state.write();
        if state.phase == Phase::Running {
            return Err(Error::AlreadyRunning(self.dir.clone()));
        }
        state.init = opts;
        Ok(())
    }

    /// Replace the options used by the next `start`.
    pub async fn set_start_options(&self, opts: StartOptions) -> Result<()> {
        let _guard = self.transition.lock().await;
        let mut state = self.state.write();
        if state.phase == Phase::Running {
            return Err(Error::AlreadyRunning(self.dir.clone()));
        }
        state.start = opts;
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        self.start_with_cancel(&CancellationToken::new()).await
    }

    /// Start the server, initializing the directory first if it is missing.
    ///
    /// The two steps fail independently: an `initdb` failure is returned
    /// as-is and no start is attempted; a start failure leaves the freshly
    /// initialized directory in place for the next attempt.
    pub async fn start_with_cancel(&self, cancel: &CancellationToken) -> Result<()> {
        let _guard = self.lock_transition(cancel, "start").await?;

        let (init, start) = {
            let state = self.state.read();
            if state.phase == Phase::Running {
                return Err(Error::AlreadyRunning(self.dir.clone()));
            }
            (state.init.clone(), state.start.clone())
        };

        match tokio::fs::metadata(&self.dir).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("Initializing {} before first start", self.dir.display());
                self.ctl.init_db_with_cancel(&self.dir, &init, cancel).await?;
            }
            Err(e) => return Err(Error::Io(e)),
        }

        self.ctl.start_with_cancel(&self.dir, &start, cancel).await?;
        self.state.write().phase = Phase::Running;
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        self.stop_with_cancel(&CancellationToken::new()).await
    }

    /// Stop a server this handle started.
    ///
    /// Returns [`Error::NotRunning`] without running `pg_ctl` when the handle
    /// has not started it.
    pub async fn stop_with_cancel(&self, cancel: &CancellationToken) -> Result<()> {
        let _guard = self.lock_transition(cancel, "stop").await?;
        if self.state.read().phase != Phase::Running {
            return Err(Error::NotRunning(self.dir.clone()));
        }
        self.ctl.stop_with_cancel(&self.dir, cancel).await?;
        self.state.write().phase = Phase::Stopped;
        Ok(())
    }

    /// Ask `pg_ctl` whether the server is running, without touching the
    /// handle's flag. Useful to resynchronize after a cancelled transition.
    pub async fn status(&self, cancel: &CancellationToken) -> Result<()> {
        self.ctl.status_with_cancel(&self.dir, cancel).await
    }

    async fn lock_transition(
        &self,
        cancel: &CancellationToken,
        operation: &str,
    ) -> Result<tokio::sync::MutexGuard<'_, ()>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled(format!(
                "{} on {}",
                operation,
                self.dir.display()
            ))),
            guard = self.transition.lock() => Ok(guard),
        }
    }
}
