// src/main.rs
//! Ledger keyring command-line entry point.
use anyhow::Result;
use clap::Parser;
use ledger_bridge_keyring::cli::{run, Cli};
use tracing::debug;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;
    debug!("ledger-keyring v{}", env!("CARGO_PKG_VERSION"));

    let output = run(cli)?;
    print!("{}", output);
    Ok(())
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
