use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pgc")]
#[command(about = "Control a PostgreSQL data directory through pg_ctl")]
pub struct Cli {
    /// Database data directory
    #[arg(short, long)]
    pub datadir: PathBuf,

    /// Port number (start sub-command)
    #[arg(short, long, default_value_t = 0)]
    pub port: u16,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create and initialize the data directory
    Initdb,
    /// Start a server and print its connection string
    Start,
    /// Report whether a server is running
    Status,
    /// Stop the server
    Stop,
}
