//! Story-loop phase cycle
//!
//! ```text
//! Idle ─start─▶ GenreSelection ─▶ VotingAnnouncement ─▶ VoteCollection
//!                    ▲                                        │
//!                    │                                        ▼
//!              CleanupReset                           AgentCompetition
//!                    ▲                                        │
//!                    │                                        ▼
//!           ScenePresentation ◀─ SceneConstruction ◀─ JudgeSelection
//!
//! CleanupReset ─(stop requested)─▶ Idle
//! ```
//!
//! `stop` forces `Idle` from anywhere. Every accepted transition bumps the
//! epoch; timers scheduled in an older epoch are discarded on delivery.

pub mod machine;
pub mod state;

pub use machine::{PhaseChange, PhaseMachine, TransitionError, TransitionRecord};
pub use state::{Epoch, Phase, Signal, Trigger};
