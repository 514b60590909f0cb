//! Locating and configuring the `pg_ctl` control executable.
//!
//! Resolution order:
//!
//! 1. `POSTGRES_HOME` environment variable, joined with `bin/pg_ctl`
//! 2. the bare name `pg_ctl`, looked up on `PATH` when spawned
//!
//! An optional per-invocation timeout can be set with `PGCTL_TIMEOUT_SECS`.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming a PostgreSQL install prefix.
pub const POSTGRES_HOME_ENV: &str = "POSTGRES_HOME";

/// Environment variable holding a timeout, in seconds, for each pg_ctl run.
pub const TIMEOUT_ENV: &str = "PGCTL_TIMEOUT_SECS";

/// Executable name used when no install prefix is configured.
pub const DEFAULT_PROGRAM: &str = "pg_ctl";

/// How to invoke `pg_ctl`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgCtlConfig {
    /// Path to the executable, or a bare name resolved via `PATH`.
    pub program: PathBuf,
    /// Upper bound for a single invocation. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for PgCtlConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_PROGRAM),
            timeout: None,
        }
    }
}

impl PgCtlConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build a configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reads variables through
    /// `lookup`, which keeps tests away from the real environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let program = match lookup(POSTGRES_HOME_ENV) {
            Some(home) => resolve_program(Some(Path::new(&home))),
            None => resolve_program(None),
        };

        let timeout = match lookup(TIMEOUT_ENV) {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|_| {
                    Error::Config(format!(
                        "{} must be a whole number of seconds, got '{}'",
                        TIMEOUT_ENV, raw
                    ))
                })?;
                if secs == 0 {
                    None
                } else {
                    Some(Duration::from_secs(secs))
                }
            }
            None => None,
        };

        Ok(Self { program, timeout })
    }

    /// Whether the configured executable can be found.
    ///
    /// Paths with more than one component are checked for existence; a bare
    /// name is searched for on `PATH`.
    pub fn is_available(&self) -> bool {
        if self.program.components().count() > 1 {
            self.program.is_file()
        } else {
            which::which(&self.program).is_ok()
        }
    }
}

/// Resolve the control executable for an optional install prefix.
pub fn resolve_program(postgres_home: Option<&Path>) -> PathBuf {
    match postgres_home {
        Some(home) => home.join("bin").join(DEFAULT_PROGRAM),
        None => PathBuf::from(DEFAULT_PROGRAM),
    }
}

/// Whether `pg_ctl` can be found using the environment's configuration.
pub fn is_available() -> bool {
    PgCtlConfig::from_env()
        .map(|config| config.is_available())
        .unwrap_or(false)
}
