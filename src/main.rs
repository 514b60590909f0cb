mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use pgctl::{data_source_name, Error as PgError, InitOptions, PgCtl, StartOptions};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        if let Some(pg_error) = e.downcast_ref::<PgError>() {
            eprintln!("Error: {}", pg_error);
            if let Some(suggestion) = pg_error.suggestion() {
                eprintln!("\nHint: {}", suggestion);
            }
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let ctl = PgCtl::from_env()?;

    // Ctrl-C kills the in-flight pg_ctl instead of leaving it orphaned.
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });

    let dir = cli.datadir.as_path();
    match cli.command {
        Commands::Initdb => {
            ctl.init_db_with_cancel(dir, &InitOptions::default(), &cancel)
                .await?;
        }
        Commands::Start => {
            let opts = StartOptions::with_port(cli.port);
            ctl.start_with_cancel(dir, &opts, &cancel).await?;
            println!("{}", data_source_name(&InitOptions::default(), &opts));
        }
        Commands::Status => {
            ctl.status_with_cancel(dir, &cancel).await?;
            println!("database is running: {}", dir.display());
        }
        Commands::Stop => {
            ctl.stop_with_cancel(dir, &cancel).await?;
        }
    }
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
