//! Wires the engine runtime, the event bus, input, and NDJSON output.

use anyhow::{Context, Result};
use coordination::events::{EventBusExt, EventFilter};
use coordination::{
    BackgroundStatsStore, EngineRuntime, EngineStatus, EventBus, InMemoryStatsStore, LoopEngine,
    StatsSnapshot, StatsStore,
};
use tokio::io::{AsyncBufRead, AsyncWrite};
use tracing::info;

use crate::config::{EventSource, RunnerConfig};
use crate::demo;
use crate::ndjson::{feed_lines, write_events, FeedSummary};
use crate::stats_file::JsonFileStatsStore;

/// What a finished run did.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub feed: FeedSummary,
    /// Envelopes written to the output.
    pub written: u64,
    /// Engine state at shutdown.
    pub status: EngineStatus,
    pub stats: StatsSnapshot,
}

/// Statistics store selected by `--stats-path`.
pub fn open_store(config: &RunnerConfig) -> Box<dyn StatsStore> {
    match &config.stats_path {
        Some(path) => {
            info!(path = %path.display(), "Using JSON stats file");
            Box::new(JsonFileStatsStore::new(path))
        }
        None => Box::new(InMemoryStatsStore::new()),
    }
}

/// Run the loop until input ends and the linger period passes.
///
/// `input` is ignored for the demo source. Statistics are written by a
/// background task, never from the engine task. Returns the report and the
/// output writer once every event and the final statistics are written.
pub async fn run<R, W>(
    config: &RunnerConfig,
    store: Box<dyn StatsStore>,
    input: R,
    output: W,
) -> Result<(RunReport, W)>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (store, stats_writer) =
        BackgroundStatsStore::spawn(store).context("Failed to load agent statistics")?;
    let engine = LoopEngine::new(config.engine.clone(), Box::new(store))
        .context("Failed to load agent statistics")?;
    let bus = EventBus::new().shared();

    let filter = if config.print_ticks {
        EventFilter::new()
    } else {
        EventFilter::new().without_ticks()
    };
    let printer = tokio::spawn(write_events(bus.subscribe_filtered(filter), output));

    let runtime = EngineRuntime::spawn(engine, bus.clone());
    let handle = runtime.handle();

    let feed = match &config.source {
        EventSource::Demo => demo::run(&handle, &bus).await?,
        EventSource::Stdin | EventSource::File(_) => feed_lines(input, &handle).await?,
    };
    info!(
        accepted = feed.accepted,
        rejected = feed.rejected,
        malformed = feed.malformed,
        "Input finished"
    );

    if !config.linger.is_zero() {
        info!(linger_ms = config.linger.as_millis() as u64, "Waiting for pending timers");
        tokio::select! {
            _ = tokio::time::sleep(config.linger) => {}
            _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
        }
    }

    let engine = runtime.shutdown().await?;
    // Last bus reference; the printer drains and stops once it is gone.
    drop(bus);
    let (written, output) = printer.await.context("Output task failed")??;

    let report = RunReport {
        feed,
        written,
        status: engine.status(),
        stats: engine.tracker().all_stats().clone(),
    };
    // Dropping the engine releases the store; the writer then finishes the last snapshot.
    drop(engine);
    stats_writer.finished().await;
    Ok((report, output))
}
