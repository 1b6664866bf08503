//! Event plumbing for the story loop
//!
//! # Architecture
//!
//! 1. **Event Types** (`types.rs`): the closed set of inbound events the
//!    engine consumes and outbound events it emits.
//!
//! 2. **Event Bus** (`bus.rs`): Tokio broadcast-based pub/sub delivering
//!    outbound events to display and logging collaborators.
//!
//! # Event Flow
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │  Producers   │────▶│ Engine queue │────▶│  Event Bus   │────▶│  Subscribers │
//! │ (votes, ...) │     │ (one writer) │     │  (broadcast) │     │   (recv)     │
//! └──────────────┘     └──────▲───────┘     └──────────────┘     └──────────────┘
//!                             │
//!                      timer expiries
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use coordination::events::{EventBus, EventBusExt, EventFilter};
//!
//! let bus = EventBus::new().shared();
//! let mut receiver = bus.subscribe_filtered(EventFilter::new().without_ticks());
//!
//! let envelope = receiver.recv().await?;
//! println!("{}", serde_json::to_string(&envelope)?);
//! ```

pub mod bus;
pub mod types;

// Re-export core types
pub use bus::{EventBus, EventBusExt, EventFilter, FilteredReceiver, SharedEventBus};
pub use types::{EventEnvelope, InboundEvent, OutboundEvent};
