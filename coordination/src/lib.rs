//! Story Loop Coordination Library
//!
//! This library drives one live story loop: the audience votes on a genre,
//! AI agents compete to propose the next scene, a judge picks a winner, and
//! the scene is built and presented before the cycle starts over.
//!
//! # Components
//!
//! - [`phase`]: the nine-phase cycle, its legal transitions, and epochs
//!   that make stale timer expiries harmless
//! - [`voting`]: per-iteration vote tally with one current vote per voter,
//!   plus chat-line vote parsing
//! - [`competition`]: proposals, judge decisions, and lifetime per-agent
//!   statistics behind a pluggable [`StatsStore`], written off the engine
//!   task by [`BackgroundStatsStore`]
//! - [`timer`]: cancellable countdowns that report expiry through a queue
//! - [`engine`]: the single-writer engine tying the above together, and
//!   the tokio runtime that feeds it
//! - [`events`]: inbound/outbound event types and the broadcast bus
//!
//! # Usage
//!
//! ```ignore
//! use coordination::{EngineConfig, EngineRuntime, EventBus, InMemoryStatsStore, LoopEngine};
//! use coordination::events::InboundEvent;
//!
//! let engine = LoopEngine::new(EngineConfig::from_env(), Box::new(InMemoryStatsStore::new()))?;
//! let bus = EventBus::new().shared();
//! let runtime = EngineRuntime::spawn(engine, bus.clone());
//!
//! runtime.handle().submit(InboundEvent::StartLoop).await?;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod competition;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod phase;
pub mod timer;
pub mod voting;

// Re-export key engine types
pub use config::{ConfigError, EngineConfig};
pub use engine::{
    EngineHandle, EngineInput, EngineRuntime, EngineStatus, LoopEngine, Outcome, Step,
    TimerCommand, TimerFired,
};
pub use error::{EngineError, EngineResult, InvalidVote};

// Re-export state types
pub use competition::{
    AgentStatistics, BackgroundStatsStore, CompetitionResult, CompetitionTracker,
    InMemoryStatsStore, StatsSnapshot, StatsStore, StatsStoreError, StatsWriter,
};
pub use phase::{Phase, PhaseMachine, Signal, TransitionError, Trigger};
pub use voting::{GenreOption, VoteTally, WinnerResult};

// Re-export event types
pub use events::{EventBus, EventEnvelope, InboundEvent, OutboundEvent, SharedEventBus};
