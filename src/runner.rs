//! Running the control executable.
//!
//! [`ProcessRunner`] is the only place a subprocess is spawned. The lifecycle
//! code in [`crate::ctl`] maps the returned exit code to error kinds, so a fake
//! runner is enough to test that mapping without PostgreSQL installed.

use crate::config::PgCtlConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Outcome of a subprocess that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunOutput {
    /// Exit code, `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    /// Everything the process wrote to stderr, lossily decoded.
    pub stderr: String,
}

impl RunOutput {
    pub fn success() -> Self {
        Self {
            code: Some(0),
            stderr: String::new(),
        }
    }

    pub fn exit(code: i32) -> Self {
        Self {
            code: Some(code),
            stderr: String::new(),
        }
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Capability to run the control executable with a list of arguments.
///
/// Implementations return `Ok` whenever the process ran and exited, whatever
/// its exit code. `Err` is reserved for spawn failures (`Error::Io`) and for
/// cancellation (`Error::Cancelled`), in which case the process must have
/// been terminated before returning.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, args: &[OsString], cancel: &CancellationToken) -> Result<RunOutput>;
}

/// Runs the real executable with `tokio::process`.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl CommandRunner {
    pub fn new(config: &PgCtlConfig) -> Self {
        Self {
            program: config.program.clone(),
            timeout: config.timeout,
        }
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new(&PgCtlConfig::default())
    }
}

fn describe(args: &[OsString]) -> String {
    args.first()
        .map(|verb| verb.to_string_lossy().into_owned())
        .unwrap_or_else(|| "pg_ctl".to_string())
}

#[async_trait]
impl ProcessRunner for CommandRunner {
    async fn run(&self, args: &[OsString], cancel: &CancellationToken) -> Result<RunOutput> {
        let operation = describe(args);
        if cancel.is_cancelled() {
            return Err(Error::Cancelled(format!("{} (before spawn)", operation)));
        }

        tracing::debug!("Spawning {:?} with args {:?}", self.program, args);

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Drain stderr concurrently so a chatty child never blocks on a full pipe.
        let mut stderr_pipe = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            String::from_utf8_lossy(&buf).into_owned()
        });

        let deadline = async {
            match self.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                tracing::debug!("Cancelling pg_ctl {}", operation);
                let _ = child.kill().await;
                stderr_task.abort();
                return Err(Error::Cancelled(operation));
            }
            _ = deadline => {
                let timeout = self.timeout.unwrap_or_default();
                tracing::warn!("pg_ctl {} timed out after {:?}", operation, timeout);
                let _ = child.kill().await;
                stderr_task.abort();
                return Err(Error::Cancelled(format!(
                    "{} timed out after {:?}",
                    operation, timeout
                )));
            }
        };

        let stderr = stderr_task.await.unwrap_or_default();
        Ok(RunOutput {
            code: status.code(),
            stderr,
        })
    }
}
