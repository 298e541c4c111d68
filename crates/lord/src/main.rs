mod cli;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use lord::{ServerConfig, serve};
use lornews_store::Store;

use crate::cli::Cli;

async fn run(cli: Cli) -> anyhow::Result<()> {
    let store = Store::from_home()?;
    let catalog = store.catalog()?;

    let listener = TcpListener::bind(("127.0.0.1", cli.port))
        .await
        .with_context(|| format!("binding port {}", cli.port))?;
    tracing::info!("lord/{} listening on port {}", lord::VERSION, cli.port);

    serve(
        listener,
        store,
        catalog,
        ServerConfig {
            postcmd: cli.postcmd,
        },
    )
    .await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("lord: {err:#}");
            ExitCode::FAILURE
        }
    }
}
