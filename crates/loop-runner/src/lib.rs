//! NDJSON driver for the story loop engine.
//!
//! Reads inbound events one JSON object per line, feeds them through the
//! engine runtime, and prints every outbound event as a JSON line. Agent
//! statistics can be kept in a JSON file across runs.

pub mod app;
pub mod config;
pub mod demo;
pub mod ndjson;
pub mod stats_file;

pub use app::{open_store, run, RunReport};
pub use config::{Args, EventSource, RunnerConfig};
pub use ndjson::FeedSummary;
pub use stats_file::JsonFileStatsStore;
