//! Runtime tests with paused tokio time.

use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use coordination::competition::ProposalContent;
use coordination::events::{EventBusExt, EventFilter, FilteredReceiver};
use coordination::{
    BackgroundStatsStore, EngineConfig, EngineRuntime, EventBus, GenreOption, InMemoryStatsStore,
    InboundEvent, LoopEngine, OutboundEvent, Outcome, Phase, StatsSnapshot, StatsStore,
    StatsStoreError,
};
use tokio::sync::broadcast::error::TryRecvError;

fn spawn(config: EngineConfig) -> (EngineRuntime, FilteredReceiver) {
    let engine = LoopEngine::new(config, Box::new(InMemoryStatsStore::new())).unwrap();
    let bus = EventBus::new().shared();
    let receiver = bus.subscribe_filtered(EventFilter::new().without_ticks());
    (EngineRuntime::spawn(engine, bus), receiver)
}

fn vote(voter: &str, option_id: u32) -> InboundEvent {
    InboundEvent::VoteCast {
        voter_id: voter.to_string(),
        option_id,
        cast_at: Utc::now(),
    }
}

fn drain(receiver: &mut FilteredReceiver) -> Vec<OutboundEvent> {
    let mut events = Vec::new();
    loop {
        match receiver.try_recv() {
            Ok(envelope) => events.push(envelope.event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            Err(TryRecvError::Lagged(_)) => continue,
        }
    }
    events
}

async fn open_vote_window(runtime: &EngineRuntime) {
    let handle = runtime.handle();
    handle.submit(InboundEvent::StartLoop).await.unwrap();
    handle
        .submit(InboundEvent::GenreSetPublished {
            options: vec![GenreOption::new(1, "Noir", ""), GenreOption::new(2, "Fantasy", "")],
        })
        .await
        .unwrap();
    handle
        .submit(InboundEvent::AdvancePhase {
            to: Phase::VoteCollection,
        })
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_vote_window_fires_once() {
    let (runtime, mut events) = spawn(EngineConfig::default());
    open_vote_window(&runtime).await;
    let handle = runtime.handle();

    handle.submit(vote("a", 1)).await.unwrap();
    tokio::time::advance(Duration::from_secs(10)).await;
    handle.submit(vote("b", 2)).await.unwrap();
    handle.submit(vote("c", 2)).await.unwrap();

    // Window started with the first vote: 30s from then.
    tokio::time::sleep(Duration::from_secs(25)).await;
    let status = handle.status().await.unwrap();
    assert_eq!(status.phase, Phase::AgentCompetition);

    let closed: Vec<_> = drain(&mut events)
        .into_iter()
        .filter(|e| e.event_type() == "voting_closed")
        .collect();
    assert_eq!(closed.len(), 1);
    assert!(matches!(
        closed[0],
        OutboundEvent::VotingClosed { winner: Some(2), .. }
    ));

    runtime.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_window_stays_open_without_votes() {
    let (runtime, _events) = spawn(EngineConfig::default());
    open_vote_window(&runtime).await;

    tokio::time::sleep(Duration::from_secs(600)).await;
    let status = runtime.handle().status().await.unwrap();
    assert_eq!(status.phase, Phase::VoteCollection);
    assert_eq!(status.total_votes, 0);

    runtime.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_manual_close_beats_window_timer() {
    let (runtime, mut events) = spawn(EngineConfig::default());
    open_vote_window(&runtime).await;
    let handle = runtime.handle();

    handle.submit(vote("a", 1)).await.unwrap();
    let outcome = handle.submit(InboundEvent::CloseVoting).await.unwrap();
    assert!(matches!(outcome, Outcome::Transitioned(_)));

    // Past the original window deadline, still a single close.
    tokio::time::sleep(Duration::from_secs(31)).await;
    let status = handle.status().await.unwrap();
    assert_eq!(status.phase, Phase::AgentCompetition);
    let closes = drain(&mut events)
        .iter()
        .filter(|e| e.event_type() == "voting_closed")
        .count();
    assert_eq!(closes, 1);

    runtime.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_inputs_applied_in_submission_order() {
    let (runtime, mut events) = spawn(EngineConfig::default());
    open_vote_window(&runtime).await;
    let handle = runtime.handle();

    for i in 0..20 {
        handle.send(vote(&format!("v{i}"), 1 + (i % 2))).unwrap();
    }
    let status = handle.status().await.unwrap();
    assert_eq!(status.total_votes, 20);

    let totals: Vec<u32> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            OutboundEvent::VoteTallyUpdated { total_votes, .. } => Some(total_votes),
            _ => None,
        })
        .collect();
    assert_eq!(totals, (1..=20).collect::<Vec<_>>());

    runtime.shutdown().await.unwrap();
}

/// Store whose writes wait until the test releases them.
struct GatedStore {
    gate: mpsc::Receiver<()>,
    written: Arc<Mutex<Vec<StatsSnapshot>>>,
}

impl StatsStore for GatedStore {
    fn load(&self) -> Result<StatsSnapshot, StatsStoreError> {
        Ok(StatsSnapshot::new())
    }

    fn flush(&self, snapshot: &StatsSnapshot) -> Result<(), StatsStoreError> {
        let _ = self.gate.recv();
        self.written.lock().unwrap().push(snapshot.clone());
        Ok(())
    }
}

#[tokio::test]
async fn test_slow_stats_store_does_not_stall_queue() {
    let (release, gate) = mpsc::channel();
    let written = Arc::new(Mutex::new(Vec::new()));
    let inner = GatedStore {
        gate,
        written: written.clone(),
    };
    let (store, writer) = BackgroundStatsStore::spawn(Box::new(inner)).unwrap();
    let engine = LoopEngine::new(EngineConfig::default(), Box::new(store)).unwrap();
    let runtime = EngineRuntime::spawn(engine, EventBus::new().shared());
    open_vote_window(&runtime).await;
    let handle = runtime.handle();

    handle.submit(vote("a", 1)).await.unwrap();
    handle.submit(InboundEvent::CloseVoting).await.unwrap();
    handle
        .submit(InboundEvent::ProposalSubmitted {
            agent_id: "alpha".into(),
            content: ProposalContent {
                kind: "scene".into(),
                rationale: String::new(),
            },
            submitted_at: Utc::now(),
        })
        .await
        .unwrap();

    // The store is still blocked, yet the queue keeps moving.
    let status = handle.status().await.unwrap();
    assert_eq!(status.phase, Phase::AgentCompetition);
    assert!(written.lock().unwrap().is_empty());

    release.send(()).unwrap();
    drop(runtime.shutdown().await.unwrap());
    writer.finished().await;
    let written = written.lock().unwrap();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0]["alpha"].proposals_submitted, 1);
}
