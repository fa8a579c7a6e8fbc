mod cli;
mod error;
mod locate;
mod report;

use crate::cli::Args;
use crate::error::{ErrorKind, Result};
use crate::report::Progress;
use clap::Parser;
use futures::StreamExt;
use newmonkey_config::Config;
use newmonkey_export::{ExportEvent, Exporter};
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(err) = run(args).await {
        tracing::debug!("{err:?}");
        eprintln!("Error: {}", *err);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load(args.config.as_deref(), &args.overrides()).map_err(error::config)?;
    let options = config.options().map_err(error::config)?;
    let cache_dir = match &config.cache_dir {
        Some(dir) => dir.clone(),
        None => locate::find_discord_cache().ok_or(ErrorKind::NoCache)?,
    };
    let exporter = Exporter::open(&cache_dir, &config.output_dir, options).map_err(error::export)?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, finishing entries already started");
                cancel.cancel();
            }
        }
    });

    let mut progress = Progress::new(args.silent);
    let mut events = std::pin::pin!(exporter.run(cancel));
    while let Some(event) = events.next().await {
        match event {
            ExportEvent::Started { estimated } => progress.start(estimated),
            ExportEvent::Entry(report) => progress.entry(&report),
            ExportEvent::Complete(summary) => {
                progress.finish();
                if !args.silent || args.stats {
                    print!("{}", report::render(&summary, exporter.output_root(), args.stats));
                }
            },
        }
    }
    Ok(())
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::builder().with_default_directive(Level::WARN.into()).from_env_lossy()
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}
