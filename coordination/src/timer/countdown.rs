//! Cancellable countdowns delivering their expiry through a queue.
//!
//! Each countdown is a tokio task that sleeps until its deadline and then
//! sends its `on_expire` payload into the owner's input queue. Expiry is
//! never executed inline, so the receiving side stays single-writer.
//! Periodic ticks go to a broadcast channel for display only.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Logical owner of a countdown. One live countdown per owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerOwner {
    /// Timed phases (announcement, competition, construction, ...).
    Phase,
    /// Audience vote window.
    VoteWindow,
}

impl fmt::Display for TimerOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Phase => write!(f, "phase"),
            Self::VoteWindow => write!(f, "vote_window"),
        }
    }
}

pub type TimerId = u64;

/// Display-only countdown observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountdownTick {
    pub owner: TimerOwner,
    pub timer_id: TimerId,
    pub remaining_ms: u64,
}

/// Handle to a started countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle {
    owner: TimerOwner,
    id: TimerId,
    started_at: Instant,
    duration: Duration,
}

impl TimerHandle {
    pub fn owner(&self) -> TimerOwner {
        self.owner
    }

    pub fn id(&self) -> TimerId {
        self.id
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Time left before expiry (zero once elapsed).
    pub fn remaining(&self) -> Duration {
        self.duration.saturating_sub(self.started_at.elapsed())
    }

    pub fn remaining_ms(&self) -> u64 {
        self.remaining().as_millis() as u64
    }
}

struct LiveTimer {
    handle: TimerHandle,
    task: JoinHandle<()>,
}

/// Owner-keyed countdowns that deliver `T` on expiry.
pub struct CountdownController<T> {
    expire_tx: mpsc::UnboundedSender<T>,
    tick_tx: Option<broadcast::Sender<CountdownTick>>,
    tick_interval: Duration,
    live: HashMap<TimerOwner, LiveTimer>,
    next_id: TimerId,
}

impl<T: Send + 'static> CountdownController<T> {
    /// Controller sending expiries into `expire_tx`.
    pub fn new(expire_tx: mpsc::UnboundedSender<T>, tick_interval: Duration) -> Self {
        Self {
            expire_tx,
            tick_tx: None,
            tick_interval,
            live: HashMap::new(),
            next_id: 1,
        }
    }

    /// Also publish a tick every `tick_interval` while a countdown runs.
    pub fn with_ticks(mut self, tick_tx: broadcast::Sender<CountdownTick>) -> Self {
        self.tick_tx = Some(tick_tx);
        self
    }

    /// Start a countdown for `owner`, cancelling the owner's previous one
    /// without delivering its expiry.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self, owner: TimerOwner, duration: Duration, on_expire: T) -> TimerHandle {
        self.cancel_owner(owner);

        let handle = TimerHandle {
            owner,
            id: self.next_id,
            started_at: Instant::now(),
            duration,
        };
        self.next_id += 1;

        let task = tokio::spawn(run_countdown(
            handle,
            self.tick_interval,
            self.tick_tx.clone(),
            self.expire_tx.clone(),
            on_expire,
        ));

        debug!(%owner, timer_id = handle.id, duration_ms = duration.as_millis() as u64, "Countdown started");
        self.live.insert(owner, LiveTimer { handle, task });
        handle
    }

    /// Cancel the countdown behind `handle` if it is still the owner's live one.
    pub fn cancel(&mut self, handle: &TimerHandle) -> bool {
        match self.live.get(&handle.owner) {
            Some(live) if live.handle.id == handle.id => self.cancel_owner(handle.owner),
            _ => false,
        }
    }

    /// Cancel whatever countdown `owner` has. Returns whether one was running.
    pub fn cancel_owner(&mut self, owner: TimerOwner) -> bool {
        match self.live.remove(&owner) {
            Some(live) => {
                let running = !live.task.is_finished();
                live.task.abort();
                if running {
                    debug!(%owner, timer_id = live.handle.id, "Countdown cancelled");
                }
                running
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        let owners: Vec<TimerOwner> = self.live.keys().copied().collect();
        for owner in owners {
            self.cancel_owner(owner);
        }
    }

    /// Live countdown of `owner`, if any.
    pub fn handle(&self, owner: TimerOwner) -> Option<TimerHandle> {
        self.live
            .get(&owner)
            .filter(|live| !live.task.is_finished())
            .map(|live| live.handle)
    }

    pub fn is_live(&self, owner: TimerOwner) -> bool {
        self.handle(owner).is_some()
    }

    /// Time left on `owner`'s countdown.
    pub fn remaining(&self, owner: TimerOwner) -> Option<Duration> {
        self.handle(owner).map(|h| h.remaining())
    }
}

impl<T> Drop for CountdownController<T> {
    fn drop(&mut self) {
        for live in self.live.values() {
            live.task.abort();
        }
    }
}

async fn run_countdown<T>(
    handle: TimerHandle,
    tick_interval: Duration,
    tick_tx: Option<broadcast::Sender<CountdownTick>>,
    expire_tx: mpsc::UnboundedSender<T>,
    on_expire: T,
) {
    let deadline = handle.started_at + handle.duration;

    match tick_tx {
        Some(tick_tx) if !tick_interval.is_zero() => {
            let sleep = tokio::time::sleep_until(deadline);
            tokio::pin!(sleep);
            let mut ticker = tokio::time::interval_at(handle.started_at + tick_interval, tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut sleep => break,
                    at = ticker.tick() => {
                        let remaining = deadline.saturating_duration_since(at);
                        // Receivers may come and go.
                        let _ = tick_tx.send(CountdownTick {
                            owner: handle.owner,
                            timer_id: handle.id,
                            remaining_ms: remaining.as_millis() as u64,
                        });
                    }
                }
            }
        }
        _ => tokio::time::sleep_until(deadline).await,
    }

    if expire_tx.send(on_expire).is_err() {
        debug!(owner = %handle.owner, timer_id = handle.id, "Countdown expired after queue closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(
        tick_interval: Duration,
    ) -> (CountdownController<u32>, mpsc::UnboundedReceiver<u32>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (CountdownController::new(tx, tick_interval), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_delivered_through_queue() {
        let (mut timers, mut rx) = controller(Duration::from_secs(1));
        timers.start(TimerOwner::Phase, Duration::from_secs(5), 42);

        assert_eq!(rx.recv().await, Some(42));
        assert!(!timers.is_live(TimerOwner::Phase));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_on_same_owner_fires_once() {
        let (mut timers, mut rx) = controller(Duration::from_secs(1));
        timers.start(TimerOwner::VoteWindow, Duration::from_secs(30), 1);
        timers.start(TimerOwner::VoteWindow, Duration::from_secs(30), 2);

        assert_eq!(rx.recv().await, Some(2));
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_owners_are_independent() {
        let (mut timers, mut rx) = controller(Duration::from_secs(1));
        timers.start(TimerOwner::Phase, Duration::from_secs(10), 1);
        timers.start(TimerOwner::VoteWindow, Duration::from_secs(5), 2);

        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(rx.recv().await, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_expiry() {
        let (mut timers, mut rx) = controller(Duration::from_secs(1));
        let handle = timers.start(TimerOwner::Phase, Duration::from_secs(5), 7);
        assert!(timers.cancel(&handle));
        assert!(!timers.cancel(&handle));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_handle_does_not_cancel_newer_timer() {
        let (mut timers, mut rx) = controller(Duration::from_secs(1));
        let old = timers.start(TimerOwner::Phase, Duration::from_secs(5), 1);
        timers.start(TimerOwner::Phase, Duration::from_secs(5), 2);

        assert!(!timers.cancel(&old));
        assert_eq!(rx.recv().await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_counts_down() {
        let (mut timers, _rx) = controller(Duration::from_secs(1));
        let handle = timers.start(TimerOwner::Phase, Duration::from_secs(30), 0);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(handle.remaining(), Duration::from_secs(20));
        assert_eq!(
            timers.remaining(TimerOwner::Phase),
            Some(Duration::from_secs(20))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_are_published_before_expiry() {
        let (tick_tx, mut ticks) = broadcast::channel(16);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = CountdownController::new(tx, Duration::from_secs(1)).with_ticks(tick_tx);

        timers.start(TimerOwner::VoteWindow, Duration::from_secs(3), ());
        rx.recv().await.unwrap();

        let mut seen = Vec::new();
        while let Ok(tick) = ticks.try_recv() {
            assert_eq!(tick.owner, TimerOwner::VoteWindow);
            seen.push(tick.remaining_ms);
        }
        assert_eq!(seen, vec![2000, 1000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all() {
        let (mut timers, mut rx) = controller(Duration::from_secs(1));
        timers.start(TimerOwner::Phase, Duration::from_secs(5), 1);
        timers.start(TimerOwner::VoteWindow, Duration::from_secs(5), 2);
        timers.cancel_all();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
        assert!(!timers.is_live(TimerOwner::Phase));
    }
}
