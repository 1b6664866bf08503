//! Runner configuration: CLI flags layered over [`EngineConfig`].

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use coordination::EngineConfig;

/// Command-line arguments
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about = "Drive the story loop from NDJSON events", long_about = None)]
pub struct Args {
    /// NDJSON file of inbound events (reads stdin when omitted)
    #[arg(long)]
    pub events: Option<PathBuf>,

    /// TOML file with engine timings (overridden by LOOP_* env vars)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// JSON file holding lifetime agent statistics (in-memory when omitted)
    #[arg(long)]
    pub stats_path: Option<PathBuf>,

    /// Vote window length (overrides config and LOOP_VOTE_WINDOW_MS)
    #[arg(long)]
    pub vote_window_ms: Option<u64>,

    /// Cleanup settle time (overrides config and LOOP_SETTLE_MS)
    #[arg(long)]
    pub settle_ms: Option<u64>,

    /// Run the built-in scripted iteration instead of reading events
    #[arg(long, default_value_t = false)]
    pub demo: bool,

    /// Keep running this long after input ends so pending timers can fire
    #[arg(long, default_value_t = 0)]
    pub linger_ms: u64,

    /// Also print countdown ticks
    #[arg(long, default_value_t = false)]
    pub ticks: bool,
}

/// Where inbound events come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventSource {
    Stdin,
    File(PathBuf),
    Demo,
}

/// Fully resolved runner settings.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub engine: EngineConfig,
    pub source: EventSource,
    pub stats_path: Option<PathBuf>,
    pub linger: Duration,
    pub print_ticks: bool,
}

impl RunnerConfig {
    /// Defaults, then the TOML file, then `LOOP_*` env, then CLI flags.
    pub fn from_args(args: Args) -> Result<Self> {
        let mut engine = EngineConfig::load(args.config.as_deref()).with_context(|| {
            format!(
                "Failed to load engine config{}",
                args.config
                    .as_ref()
                    .map(|p| format!(" from {}", p.display()))
                    .unwrap_or_default()
            )
        })?;
        Self::resolve(&args, &mut engine)?;

        let source = match (args.demo, args.events) {
            (true, _) => EventSource::Demo,
            (false, Some(path)) => EventSource::File(path),
            (false, None) => EventSource::Stdin,
        };

        Ok(Self {
            engine,
            source,
            stats_path: args.stats_path,
            linger: Duration::from_millis(args.linger_ms),
            print_ticks: args.ticks,
        })
    }

    fn resolve(args: &Args, engine: &mut EngineConfig) -> Result<()> {
        if let Some(ms) = args.vote_window_ms {
            engine.vote_window_ms = ms;
        }
        if let Some(ms) = args.settle_ms {
            engine.settle_ms = ms;
        }
        engine.validate().context("Invalid engine config after CLI overrides")?;
        Ok(())
    }
}
