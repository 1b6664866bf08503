//! Background statistics writer.
//!
//! [`BackgroundStatsStore`] wraps a blocking [`StatsStore`] so the engine
//! never waits on it. The snapshot is loaded once, up front. Afterwards
//! `flush` only publishes the latest snapshot to a writer task, which hands
//! it to the inner store on the blocking pool. Snapshots that arrive while a
//! write is in progress are coalesced: only the newest one is written.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::stats::{StatsSnapshot, StatsStore, StatsStoreError};

/// Non-blocking front for a blocking statistics store.
pub struct BackgroundStatsStore {
    loaded: StatsSnapshot,
    tx: watch::Sender<Option<StatsSnapshot>>,
}

/// Writer task behind a [`BackgroundStatsStore`].
pub struct StatsWriter {
    task: JoinHandle<()>,
}

impl BackgroundStatsStore {
    /// Load from `inner`, then move it onto a writer task.
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn(inner: Box<dyn StatsStore>) -> Result<(Self, StatsWriter), StatsStoreError> {
        let loaded = inner.load()?;
        let (tx, rx) = watch::channel(None);
        let task = tokio::spawn(write_latest(inner, rx));
        Ok((Self { loaded, tx }, StatsWriter { task }))
    }
}

impl StatsStore for BackgroundStatsStore {
    fn load(&self) -> Result<StatsSnapshot, StatsStoreError> {
        Ok(self.loaded.clone())
    }

    fn flush(&self, snapshot: &StatsSnapshot) -> Result<(), StatsStoreError> {
        self.tx
            .send(Some(snapshot.clone()))
            .map_err(|_| StatsStoreError::Unavailable("stats writer stopped".to_string()))
    }
}

impl StatsWriter {
    /// Wait until the last snapshot is written.
    ///
    /// Returns once the owning [`BackgroundStatsStore`] has been dropped and
    /// its final snapshot handed to the inner store.
    pub async fn finished(self) {
        if let Err(e) = self.task.await {
            error!(error = %e, "Stats writer task failed");
        }
    }
}

async fn write_latest(
    mut store: Box<dyn StatsStore>,
    mut rx: watch::Receiver<Option<StatsSnapshot>>,
) {
    while rx.changed().await.is_ok() {
        let Some(snapshot) = rx.borrow_and_update().clone() else {
            continue;
        };

        let written = tokio::task::spawn_blocking(move || {
            let result = store.flush(&snapshot);
            (store, result, snapshot.len())
        })
        .await;

        match written {
            Ok((returned, result, agents)) => {
                store = returned;
                match result {
                    Ok(()) => debug!(agents, "Stats written"),
                    Err(e) => warn!(error = %e, "Failed to flush agent statistics"),
                }
            }
            Err(e) => {
                error!(error = %e, "Stats flush panicked, writer stopping");
                return;
            }
        }
    }
    debug!("Stats writer stopped");
}
