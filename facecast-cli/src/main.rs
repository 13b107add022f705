mod cli;
mod config;
mod error;

use crate::{
    cli::{Args, Commands, RunArgs},
    config::AppConfig,
    error::{AppError, Result},
};
use clap::Parser;
use facecast::{DetectionSource, JsonLinesSource, Session};
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    init_logging(args.verbose, args.quiet)?;

    let mut config = AppConfig::load(args.config.as_deref())?;

    match args.command {
        Commands::Run(run_args) => {
            config.apply(&run_args);
            publish(config, run_args).await
        }
        Commands::Config { show } => {
            if show {
                println!("{}", config.show()?);
            } else {
                match AppConfig::default_path() {
                    Some(path) => println!("Config file: {}", path.display()),
                    None => println!("No config directory on this platform"),
                }
                println!("Use --show to display the effective configuration");
            }
            Ok(())
        }
    }
}

async fn publish(config: AppConfig, args: RunArgs) -> Result<()> {
    let publisher = config.publisher;
    let source: Box<dyn DetectionSource> = if args.reads_stdin() {
        Box::new(JsonLinesSource::stdin().with_min_confidence(publisher.min_confidence))
    } else {
        let source = JsonLinesSource::open(&args.input).await.map_err(|e| {
            AppError::InvalidInput(format!("cannot read {}: {}", args.input.display(), e))
        })?;
        Box::new(source.with_min_confidence(publisher.min_confidence))
    };

    info!(
        "Publishing {} to {} every {}ms",
        source.name(),
        publisher.endpoint,
        publisher.tick_period_ms
    );
    let session = Session::start(publisher, source)?;

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted, shutting down");
                ctrl_c_cancel.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    if args.wait_for_consumer {
        info!("Waiting for consumer at {}", session.config().endpoint);
        tokio::select! {
            result = session.wait_until_open() => result?,
            _ = cancel.cancelled() => return Ok(()),
        }
    }

    let summary = session.run(cancel).await;
    info!(
        "Ticks: {} run, {} skipped, {} coalesced, {} source errors",
        summary.run.runner.ticks_run,
        summary.run.runner.ticks_skipped,
        summary.run.runner.ticks_coalesced,
        summary.run.runner.source_errors
    );
    Ok(())
}

fn init_logging(verbose: bool, quiet: bool) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    let subscriber = tracing_subscriber::registry().with(filter);

    subscriber
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(verbose)
                .with_writer(std::io::stderr),
        )
        .init();
    Ok(())
}
