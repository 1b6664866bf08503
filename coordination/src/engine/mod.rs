//! The loop engine and its async runtime.
//!
//! [`LoopEngine`] is the synchronous state owner; [`EngineRuntime`] runs it
//! on a tokio task behind a single input queue.

pub mod core;
pub mod runtime;

pub use self::core::{
    EngineInput, EngineStatus, LoopEngine, Outcome, Step, TimerCommand, TimerFired,
};
pub use self::runtime::{EngineHandle, EngineRuntime};
