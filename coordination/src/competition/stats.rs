//! Cumulative agent statistics and the store they are loaded from.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// Identity of a competing agent.
pub type AgentId = String;

/// Per-agent counters. Both only ever grow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatistics {
    pub agent_id: AgentId,
    pub proposals_submitted: u64,
    pub wins: u64,
}

impl AgentStatistics {
    pub fn new(agent_id: impl Into<AgentId>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Default::default()
        }
    }

    /// `wins / proposals_submitted`, or 0 before the first proposal.
    pub fn win_rate(&self) -> f64 {
        if self.proposals_submitted == 0 {
            0.0
        } else {
            self.wins as f64 / self.proposals_submitted as f64
        }
    }
}

/// All agents' statistics keyed by agent id.
pub type StatsSnapshot = BTreeMap<AgentId, AgentStatistics>;

/// Error type for statistics store operations
#[derive(Debug, thiserror::Error)]
pub enum StatsStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// External durability for agent statistics.
///
/// The tracker loads once on construction and flushes after every change,
/// from inside the engine's queue. Stores that touch disk or network should
/// be wrapped in a [`BackgroundStatsStore`](super::BackgroundStatsStore).
#[cfg_attr(test, mockall::automock)]
pub trait StatsStore: Send {
    fn load(&self) -> Result<StatsSnapshot, StatsStoreError>;

    fn flush(&self, snapshot: &StatsSnapshot) -> Result<(), StatsStoreError>;
}

/// Process-local store. Clones share the same snapshot.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStatsStore {
    inner: Arc<Mutex<StatsSnapshot>>,
}

impl InMemoryStatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `snapshot`.
    pub fn with_snapshot(snapshot: StatsSnapshot) -> Self {
        Self {
            inner: Arc::new(Mutex::new(snapshot)),
        }
    }

    /// Last flushed snapshot.
    pub fn snapshot(&self) -> StatsSnapshot {
        self.inner
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl StatsStore for InMemoryStatsStore {
    fn load(&self) -> Result<StatsSnapshot, StatsStoreError> {
        self.inner
            .lock()
            .map(|guard| guard.clone())
            .map_err(|e| StatsStoreError::Unavailable(e.to_string()))
    }

    fn flush(&self, snapshot: &StatsSnapshot) -> Result<(), StatsStoreError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|e| StatsStoreError::Unavailable(e.to_string()))?;
        *guard = snapshot.clone();
        Ok(())
    }
}
