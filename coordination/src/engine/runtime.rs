//! Async runtime around [`LoopEngine`].
//!
//! One task owns the engine and drains a single unbounded queue. Producers
//! submit through an [`EngineHandle`]; countdown expiries land in the same
//! queue, so no input is ever handled concurrently with another. Outbound
//! events go to the shared [`EventBus`](crate::events::EventBus) in the
//! order the engine produced them.

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::core::{EngineInput, EngineStatus, LoopEngine, Outcome, Step, TimerCommand};
use crate::error::{EngineError, EngineResult};
use crate::events::{InboundEvent, OutboundEvent, SharedEventBus};
use crate::timer::{CountdownController, CountdownTick};

/// Tick buffer between countdown tasks and the bus forwarder.
const TICK_CAPACITY: usize = 64;

type Reply = oneshot::Sender<EngineResult<Outcome>>;

enum Command {
    Input {
        input: EngineInput,
        reply: Option<Reply>,
    },
    Status(oneshot::Sender<EngineStatus>),
    Shutdown,
}

/// Cloneable producer side of the engine queue.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl EngineHandle {
    /// Enqueue an event and wait for the engine's verdict.
    pub async fn submit(&self, event: InboundEvent) -> EngineResult<Outcome> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Input {
                input: EngineInput::Event(event),
                reply: Some(reply),
            })
            .map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)?
    }

    /// Enqueue an event without waiting. Rejections are logged by the engine task.
    pub fn send(&self, event: InboundEvent) -> EngineResult<()> {
        self.tx
            .send(Command::Input {
                input: EngineInput::Event(event),
                reply: None,
            })
            .map_err(|_| EngineError::Closed)
    }

    /// Snapshot of the engine, taken in queue order.
    pub async fn status(&self) -> EngineResult<EngineStatus> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Status(reply))
            .map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Running engine task plus its tick forwarder.
pub struct EngineRuntime {
    handle: EngineHandle,
    engine_task: JoinHandle<LoopEngine>,
    tick_task: JoinHandle<()>,
}

impl EngineRuntime {
    /// Move `engine` onto its own task. Must be called inside a tokio runtime.
    pub fn spawn(engine: LoopEngine, bus: SharedEventBus) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (tick_tx, tick_rx) = broadcast::channel(TICK_CAPACITY);

        let timers = CountdownController::new(tx.clone(), engine.config().tick_interval())
            .with_ticks(tick_tx);

        let tick_task = tokio::spawn(forward_ticks(tick_rx, bus.clone()));
        let engine_task = tokio::spawn(run(engine, rx, timers, bus));

        Self {
            handle: EngineHandle { tx },
            engine_task,
            tick_task,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Stop after the inputs already queued and hand back the engine.
    pub async fn shutdown(self) -> EngineResult<LoopEngine> {
        // The task may already be gone; the join below reports that.
        let _ = self.handle.tx.send(Command::Shutdown);
        let result = self.engine_task.await;
        self.tick_task.abort();
        // Wait for the forwarder to drop its bus reference.
        let _ = self.tick_task.await;
        result.map_err(|e| EngineError::Defect(format!("engine task failed: {e}")))
    }
}

async fn run(
    mut engine: LoopEngine,
    mut rx: mpsc::UnboundedReceiver<Command>,
    mut timers: CountdownController<Command>,
    bus: SharedEventBus,
) -> LoopEngine {
    info!(phase = %engine.phase(), "Loop engine started");

    while let Some(command) = rx.recv().await {
        match command {
            Command::Input { input, reply } => {
                let outcome = match engine.handle(input) {
                    Ok(step) => Ok(apply(step, &mut timers, &bus)),
                    Err(e) => {
                        report(&e);
                        Err(e)
                    }
                };
                if let Some(reply) = reply {
                    // Caller may have given up waiting.
                    let _ = reply.send(outcome);
                }
            }
            Command::Status(reply) => {
                let _ = reply.send(engine.status());
            }
            Command::Shutdown => break,
        }
    }

    timers.cancel_all();
    info!(
        phase = %engine.phase(),
        iteration = engine.machine().iteration(),
        "Loop engine stopped"
    );
    engine
}

fn apply(step: Step, timers: &mut CountdownController<Command>, bus: &SharedEventBus) -> Outcome {
    for command in step.timers {
        match command {
            TimerCommand::CancelAll => timers.cancel_all(),
            TimerCommand::Start {
                owner,
                duration,
                fired,
            } => {
                timers.start(
                    owner,
                    duration,
                    Command::Input {
                        input: EngineInput::TimerExpired(fired),
                        reply: None,
                    },
                );
            }
        }
    }

    for event in step.events {
        bus.publish(event);
    }

    if step.outcome == Outcome::Discarded {
        debug!("Stale timer discarded");
    }
    step.outcome
}

fn report(err: &EngineError) {
    if err.is_defect() {
        error!(code = err.code(), error = %err, "Engine defect");
    } else {
        warn!(code = err.code(), error = %err, "Input rejected");
    }
}

async fn forward_ticks(mut rx: broadcast::Receiver<CountdownTick>, bus: SharedEventBus) {
    loop {
        match rx.recv().await {
            Ok(tick) => {
                bus.publish(OutboundEvent::CountdownTick {
                    owner: tick.owner,
                    remaining_ms: tick.remaining_ms,
                });
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Countdown ticks dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::competition::InMemoryStatsStore;
    use crate::config::EngineConfig;
    use crate::events::{EventBus, EventBusExt, EventFilter};
    use crate::phase::Phase;
    use crate::voting::GenreOption;
    use chrono::Utc;
    use std::time::Duration;

    fn spawn(config: EngineConfig) -> (EngineRuntime, SharedEventBus) {
        let engine = LoopEngine::new(config, Box::new(InMemoryStatsStore::new())).unwrap();
        let bus = EventBus::new().shared();
        (EngineRuntime::spawn(engine, bus.clone()), bus)
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_returns_outcome() {
        let (runtime, _bus) = spawn(EngineConfig::default());
        let handle = runtime.handle();

        let outcome = handle.submit(InboundEvent::StartLoop).await.unwrap();
        assert!(matches!(outcome, Outcome::Transitioned(_)));

        let err = handle.submit(InboundEvent::StartLoop).await.unwrap_err();
        assert_eq!(err.code(), "REJECTED_TRANSITION");

        let engine = runtime.shutdown().await.unwrap();
        assert_eq!(engine.phase(), Phase::GenreSelection);
    }

    #[tokio::test(start_paused = true)]
    async fn test_announcement_timer_advances_phase() {
        let (runtime, bus) = spawn(EngineConfig::default());
        let mut events = bus.subscribe_filtered(EventFilter::new().types(vec!["phase_changed"]));
        let handle = runtime.handle();

        handle.submit(InboundEvent::StartLoop).await.unwrap();
        handle
            .submit(InboundEvent::GenreSetPublished {
                options: vec![GenreOption::new(1, "Noir", ""), GenreOption::new(2, "Space", "")],
            })
            .await
            .unwrap();

        events.recv().await.unwrap();
        events.recv().await.unwrap();
        let envelope = events.recv().await.unwrap();
        assert_eq!(
            envelope.event,
            OutboundEvent::PhaseChanged {
                from: Phase::VotingAnnouncement,
                to: Phase::VoteCollection,
                iteration: 1,
            }
        );
        runtime.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_timer() {
        let (runtime, _bus) = spawn(EngineConfig::default());
        let handle = runtime.handle();

        handle.submit(InboundEvent::StartLoop).await.unwrap();
        handle
            .submit(InboundEvent::GenreSetPublished {
                options: vec![GenreOption::new(1, "Noir", "")],
            })
            .await
            .unwrap();
        handle.submit(InboundEvent::StopLoop).await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        let status = handle.status().await.unwrap();
        assert_eq!(status.phase, Phase::Idle);
        runtime.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_forwarded_to_bus() {
        let (runtime, bus) = spawn(EngineConfig::default());
        let mut ticks = bus.subscribe_filtered(EventFilter::new().types(vec!["countdown_tick"]));
        let handle = runtime.handle();

        handle.submit(InboundEvent::StartLoop).await.unwrap();
        handle
            .submit(InboundEvent::GenreSetPublished {
                options: vec![GenreOption::new(1, "Noir", "")],
            })
            .await
            .unwrap();

        let envelope = ticks.recv().await.unwrap();
        assert_eq!(
            envelope.event,
            OutboundEvent::CountdownTick {
                owner: crate::timer::TimerOwner::Phase,
                remaining_ms: 9_000,
            }
        );
        runtime.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_closed_after_shutdown() {
        let (runtime, _bus) = spawn(EngineConfig::default());
        let handle = runtime.handle();
        runtime.shutdown().await.unwrap();

        let err = handle
            .submit(InboundEvent::VoteCast {
                voter_id: "v".into(),
                option_id: 1,
                cast_at: Utc::now(),
            })
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::Closed);
    }
}
