//! A stand-in for `pg_ctl` that keeps its "servers" in memory.
//!
//! `start` binds a real loopback listener on the requested port and holds it
//! until `stop`, so port probes see started servers exactly as they would see
//! a postmaster.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use pgctl::{Error, PgCtl, ProcessRunner, Result, RunOutput};
use std::collections::HashMap;
use std::ffi::OsString;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct FakeCluster {
    running: Mutex<HashMap<PathBuf, Option<TcpListener>>>,
    /// Simulated postmaster startup time.
    pub start_delay: Option<Duration>,
    /// Number of upcoming starts that fail as if the port was stolen.
    pub stolen_ports: AtomicUsize,
    pub start_calls: AtomicUsize,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            start_delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn ctl(self: &Arc<Self>) -> PgCtl {
        PgCtl::with_runner(Arc::clone(self) as Arc<dyn ProcessRunner>)
    }

    pub fn running_count(&self) -> usize {
        self.running.lock().len()
    }

    pub fn is_running(&self, dir: &std::path::Path) -> bool {
        self.running.lock().contains_key(dir)
    }
}

fn arg_after(args: &[OsString], flag: &str) -> Option<String> {
    let at = args.iter().position(|a| a == flag)?;
    args.get(at + 1).map(|a| a.to_string_lossy().into_owned())
}

fn requested_port(options: &str) -> Option<u16> {
    let mut words = options.split_whitespace();
    while let Some(word) = words.next() {
        if word == "-p" {
            return words.next().and_then(|p| p.parse().ok());
        }
    }
    None
}

#[async_trait]
impl ProcessRunner for FakeCluster {
    async fn run(&self, args: &[OsString], cancel: &CancellationToken) -> Result<RunOutput> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled("fake pg_ctl".into()));
        }
        let verb = args[0].to_string_lossy().into_owned();
        let dir = PathBuf::from(arg_after(args, "-D").expect("-D is always passed"));

        match verb.as_str() {
            "initdb" => {
                std::fs::create_dir_all(&dir)?;
                std::fs::write(dir.join("PG_VERSION"), "16\n")?;
                Ok(RunOutput::success())
            }
            "status" => Ok(if !dir.join("PG_VERSION").exists() {
                RunOutput::exit(4)
            } else if self.running.lock().contains_key(&dir) {
                RunOutput::success()
            } else {
                RunOutput::exit(3)
            }),
            "start" => {
                if let Some(delay) = self.start_delay {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {
                            return Err(Error::Cancelled("fake pg_ctl start".into()));
                        }
                    }
                }
                self.start_calls.fetch_add(1, Ordering::SeqCst);
                if self
                    .stolen_ports
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
                {
                    return Ok(RunOutput::exit(1)
                        .with_stderr("LOG:  could not bind IPv4 address: Address already in use"));
                }
                let options = arg_after(args, "-o").unwrap_or_default();
                let listener = match requested_port(&options) {
                    Some(port) => match TcpListener::bind(("127.0.0.1", port)) {
                        Ok(listener) => Some(listener),
                        Err(e) => {
                            return Ok(RunOutput::exit(1)
                                .with_stderr(format!("could not bind port {}: {}", port, e)))
                        }
                    },
                    None => None,
                };
                self.running.lock().insert(dir, listener);
                Ok(RunOutput::success())
            }
            "stop" => Ok(if self.running.lock().remove(&dir).is_some() {
                RunOutput::success()
            } else {
                RunOutput::exit(1).with_stderr("pg_ctl: PID file does not exist")
            }),
            other => panic!("unexpected pg_ctl verb {}", other),
        }
    }
}

/// A window of `len` ports that were free a moment ago.
pub fn free_window(len: u16) -> pgctl::PortAllocator {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let base = listener
        .local_addr()
        .unwrap()
        .port()
        .min(u16::MAX - len);
    drop(listener);
    pgctl::PortAllocator::new(base, len).expect("valid window")
}
