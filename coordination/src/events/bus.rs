//! Event bus for outbound loop events
//!
//! Provides pub/sub delivery of [`OutboundEvent`]s using a Tokio broadcast
//! channel. Each event is wrapped in an [`EventEnvelope`] carrying a
//! publication sequence number.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::types::{EventEnvelope, OutboundEvent};

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Event bus with broadcast channels
pub struct EventBus {
    /// Broadcast sender for publishing events
    sender: broadcast::Sender<EventEnvelope>,

    /// Last assigned sequence number. Held across the send so subscribers
    /// see sequences in order even with several publishing tasks.
    sequence: Mutex<u64>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    /// Create an event bus buffering up to `capacity` events per subscriber
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: Mutex::new(0),
        }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers. Returns the envelope sent.
    pub fn publish(&self, event: OutboundEvent) -> EventEnvelope {
        let event_type = event.event_type();
        if event.is_warning() {
            warn!(event_type, ?event, "Warning event published");
        }

        let mut sequence = self.sequence.lock().unwrap_or_else(PoisonError::into_inner);
        *sequence += 1;
        let envelope = EventEnvelope {
            sequence: *sequence,
            emitted_at: Utc::now(),
            event,
        };

        // Broadcast to subscribers (ignore if no receivers)
        match self.sender.send(envelope.clone()) {
            Ok(count) => debug!(event_type, receivers = count, "Event published"),
            Err(_) => debug!(event_type, "Event published (no receivers)"),
        }
        drop(sequence);
        envelope
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if the bus has any subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }

    /// Number of events published so far
    pub fn published(&self) -> u64 {
        *self.sequence.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event filter for selective subscription
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Only these event types
    pub event_types: Option<Vec<String>>,
    /// Drop display-only countdown ticks
    pub skip_ticks: bool,
}

impl EventFilter {
    /// Create a new empty filter (matches all events)
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by event types
    pub fn types(mut self, event_types: Vec<&str>) -> Self {
        self.event_types = Some(event_types.into_iter().map(String::from).collect());
        self
    }

    pub fn without_ticks(mut self) -> Self {
        self.skip_ticks = true;
        self
    }

    /// Check if an event matches this filter
    pub fn matches(&self, event: &OutboundEvent) -> bool {
        if self.skip_ticks && matches!(event, OutboundEvent::CountdownTick { .. }) {
            return false;
        }

        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }

        true
    }
}

/// Filtered event receiver that only yields matching events
pub struct FilteredReceiver {
    receiver: broadcast::Receiver<EventEnvelope>,
    filter: EventFilter,
}

impl FilteredReceiver {
    /// Create a new filtered receiver
    pub fn new(receiver: broadcast::Receiver<EventEnvelope>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Receive the next matching event
    pub async fn recv(&mut self) -> Result<EventEnvelope, broadcast::error::RecvError> {
        loop {
            let envelope = self.receiver.recv().await?;
            if self.filter.matches(&envelope.event) {
                return Ok(envelope);
            }
        }
    }

    /// Next matching event already buffered, if any
    pub fn try_recv(&mut self) -> Result<EventEnvelope, broadcast::error::TryRecvError> {
        loop {
            let envelope = self.receiver.try_recv()?;
            if self.filter.matches(&envelope.event) {
                return Ok(envelope);
            }
        }
    }
}

/// Extension trait for subscribing with filters
pub trait EventBusExt {
    /// Subscribe with a filter
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver;
}

impl EventBusExt for EventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}

impl EventBusExt for SharedEventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}
