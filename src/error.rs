// Allow unused_assignments at module level because thiserror's generated code
// for struct variants triggers false positive warnings - the fields ARE used
// in the Display impl but rustc's lint pass doesn't see this.
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Data directory already exists: {}", .0.display())]
    #[diagnostic(
        code(pgctl::initdb::already_exists),
        help("Remove the directory or start the existing cluster instead of initializing it again")
    )]
    AlreadyExists(PathBuf),

    #[error("Data directory is not initialized: {}", .0.display())]
    #[diagnostic(
        code(pgctl::status::not_initialized),
        help("Run `pgc --datadir <dir> initdb` first, or let `start` initialize it")
    )]
    NotInitialized(PathBuf),

    #[error("Database is not running: {}", .0.display())]
    #[diagnostic(code(pgctl::server::not_running))]
    NotRunning(PathBuf),

    #[error("Database is running already: {}", .0.display())]
    #[diagnostic(
        code(pgctl::server::already_running),
        help("Stop the server before starting it again or changing its options")
    )]
    AlreadyRunning(PathBuf),

    #[error("Failed to start database in {}{}", .dir.display(), stderr_suffix(.stderr))]
    #[diagnostic(
        code(pgctl::server::start_failed),
        help("Check the server log in the data directory; the port may be taken by another process")
    )]
    StartFailed { dir: PathBuf, stderr: String },

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("pg_ctl {verb} exited with {}{}",
        .code.map(|c| format!("code {}", c)).unwrap_or_else(|| "a signal".to_string()),
        stderr_suffix(.stderr)
    )]
    #[diagnostic(
        code(pgctl::process::failed),
        help("Run the same pg_ctl command by hand to see its full output")
    )]
    Process {
        verb: &'static str,
        code: Option<i32>,
        stderr: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Filesystem error: {0}")]
    #[diagnostic(code(pgctl::filesystem::error))]
    Filesystem(String),

    #[error("Port allocation failed: {0}")]
    #[diagnostic(
        code(pgctl::port::allocation_failed),
        help("Use a pool with a wider port window or a different base port")
    )]
    PortAllocation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}

impl Error {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists(_))
    }

    pub fn is_not_initialized(&self) -> bool {
        matches!(self, Error::NotInitialized(_))
    }

    pub fn is_not_running(&self) -> bool {
        matches!(self, Error::NotRunning(_))
    }

    pub fn is_already_running(&self) -> bool {
        matches!(self, Error::AlreadyRunning(_))
    }

    pub fn is_start_failed(&self) -> bool {
        matches!(self, Error::StartFailed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }

    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::AlreadyExists(dir) => Some(format!(
                "'{}' is already a data directory. Start it with: pgc --datadir {} start",
                dir.display(),
                dir.display()
            )),
            Error::NotInitialized(dir) => Some(format!(
                "Initialize it with: pgc --datadir {} initdb",
                dir.display()
            )),
            Error::NotRunning(dir) => Some(format!(
                "Start the server with: pgc --datadir {} start",
                dir.display()
            )),
            Error::AlreadyRunning(dir) => Some(format!(
                "Stop the server with: pgc --datadir {} stop",
                dir.display()
            )),
            Error::StartFailed { dir, .. } => Some(format!(
                "Inspect {}/log or the server output; try a different --port if the port is in use.",
                dir.display()
            )),
            Error::Io(e) if e.kind() == io::ErrorKind::NotFound => Some(
                "pg_ctl was not found. Install PostgreSQL or set POSTGRES_HOME to its install prefix."
                    .to_string(),
            ),
            Error::PortAllocation(_) => Some(
                "Every candidate port in the window was busy. Widen the window or pick another base port."
                    .to_string(),
            ),
            Error::Config(_) | Error::Yaml(_) => {
                Some("Check the pool configuration file for typos and value ranges.".to_string())
            }
            _ => None,
        }
    }

    /// Formats the error with its suggestion (if any) for user-friendly display.
    pub fn with_suggestion(&self) -> String {
        match self.suggestion() {
            Some(suggestion) => format!("{}\n\nHint: {}", self, suggestion),
            None => self.to_string(),
        }
    }
}
