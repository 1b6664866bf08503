use anyhow::{Context, Result};
use clap::Parser;
use loop_runner::{open_store, Args, EventSource, RunnerConfig};
use tokio::io::BufReader;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // stdout carries the event stream, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = RunnerConfig::from_args(args)?;
    info!(
        source = ?config.source,
        vote_window_ms = config.engine.vote_window_ms,
        settle_ms = config.engine.settle_ms,
        "Loop runner starting"
    );

    let store = open_store(&config);
    let stdout = tokio::io::stdout();
    let (report, _) = match &config.source {
        EventSource::Demo => loop_runner::run(&config, store, tokio::io::empty(), stdout).await?,
        EventSource::Stdin => {
            loop_runner::run(&config, store, BufReader::new(tokio::io::stdin()), stdout).await?
        }
        EventSource::File(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open events file {}", path.display()))?;
            loop_runner::run(&config, store, BufReader::new(file), stdout).await?
        }
    };

    info!(
        phase = %report.status.phase,
        iteration = report.status.iteration,
        events_written = report.written,
        agents = report.stats.len(),
        "Loop runner finished"
    );
    Ok(())
}
