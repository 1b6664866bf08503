//! Countdown timers for bounded windows.

pub mod countdown;

pub use countdown::{CountdownController, CountdownTick, TimerHandle, TimerId, TimerOwner};
