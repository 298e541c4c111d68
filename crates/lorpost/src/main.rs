use std::io::Read;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use lornews_store::{Article, Store};
use lorpost::cli::Cli;

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;

    let article = Article::parse(&input)?;
    let submission = lorpost::validate(&article)?;

    let store = Store::from_home()?;
    lorpost::submit::submit(&store, &submission, cli.timeout).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // One diagnostic line; the NNTP server forwards it as `441 <text>`.
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
