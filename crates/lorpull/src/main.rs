use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use lornews_forum::{CookieJar, Forum};
use lornews_store::{Pattern, Store};
use lorpull::cli::Cli;
use lorpull::pull::Puller;

fn init_tracing(quiet: bool) {
    let default = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// SIGINT becomes a cooperative flag so an index write transaction is never
/// torn mid-commit; the puller bails at the next transaction boundary.
fn watch_interrupt() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let watched = flag.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing current transaction");
            watched.store(true, Ordering::Relaxed);
        }
    });
    flag
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let store = Store::from_home()?;
    let catalog = store.catalog()?;
    let pattern = match &cli.pattern {
        Some(text) => Pattern::parse(text)?,
        None => Pattern::all(),
    };

    // Pulling is anonymous: the jar only holds the forum's transient cookies
    // for this run and is never saved.
    let jar = Arc::new(CookieJar::load(store.root().join("pull-cookies"))?);
    let forum = Forum::new(jar, Duration::from_secs(cli.timeout))?;

    let interrupted = watch_interrupt();
    let puller = Puller::new(store, forum, cli.days, cli.expire, interrupted);

    for group in catalog.filtered(&pattern) {
        puller
            .process_group(group)
            .await
            .with_context(|| format!("group {}", group.name))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.quiet);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("lorpull: {err:#}");
            ExitCode::FAILURE
        }
    }
}
