//! Built-in scripted iteration for `--demo`.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use coordination::competition::{Confidence, ProposalContent};
use coordination::events::{EventBusExt, EventFilter};
use coordination::{EngineHandle, GenreOption, InboundEvent, OutboundEvent, Phase, SharedEventBus};
use tracing::info;

use crate::ndjson::{feed_events, FeedSummary};

pub fn genres() -> Vec<GenreOption> {
    vec![
        GenreOption::new(1, "Noir", "Rain, neon, and a detective with debts"),
        GenreOption::new(2, "Fantasy", "A map with one region left blank"),
        GenreOption::new(3, "Space Opera", "Two fleets, one wormhole"),
    ]
}

/// One iteration: publish, vote, compete, judge, then stop once it ends.
pub fn script(start: DateTime<Utc>) -> Vec<InboundEvent> {
    let at = |secs: i64| start + Duration::seconds(secs);
    let proposal = |kind: &str, rationale: &str| ProposalContent {
        kind: kind.to_string(),
        rationale: rationale.to_string(),
    };

    vec![
        InboundEvent::StartLoop,
        InboundEvent::GenreSetPublished { options: genres() },
        InboundEvent::AdvancePhase {
            to: Phase::VoteCollection,
        },
        InboundEvent::VoteCast {
            voter_id: "viewer-a".into(),
            option_id: 1,
            cast_at: at(1),
        },
        InboundEvent::VoteCast {
            voter_id: "viewer-b".into(),
            option_id: 2,
            cast_at: at(2),
        },
        InboundEvent::ChatMessage {
            author_id: "viewer-c".into(),
            text: "!vote fantasy".into(),
            sent_at: at(3),
        },
        // viewer-a changes their mind
        InboundEvent::VoteCast {
            voter_id: "viewer-a".into(),
            option_id: 2,
            cast_at: at(4),
        },
        InboundEvent::CloseVoting,
        InboundEvent::ProposalSubmitted {
            agent_id: "agent-plot".into(),
            content: proposal("plot_twist", "The map's blank region is the narrator's home"),
            submitted_at: at(10),
        },
        InboundEvent::ProposalSubmitted {
            agent_id: "agent-cast".into(),
            content: proposal("new_character", "A cartographer who refuses to draw"),
            submitted_at: at(11),
        },
        InboundEvent::AdvancePhase {
            to: Phase::JudgeSelection,
        },
        InboundEvent::JudgeDecision {
            winning_agent_id: "agent-plot".into(),
            confidence: Confidence::High,
            rationale: "Strongest hook for the next scene".into(),
            decided_at: at(20),
        },
        InboundEvent::StopAfterIteration,
    ]
}

/// Feed the script and wait for the loop to settle back to idle.
pub async fn run(handle: &EngineHandle, bus: &SharedEventBus) -> Result<FeedSummary> {
    let mut phases = bus.subscribe_filtered(EventFilter::new().types(vec!["phase_changed"]));

    let summary = feed_events(script(Utc::now()), handle).await?;
    info!(accepted = summary.accepted, rejected = summary.rejected, "Demo script fed");

    loop {
        let envelope = phases
            .recv()
            .await
            .context("Event bus closed before the demo finished")?;
        if let OutboundEvent::PhaseChanged { to: Phase::Idle, .. } = envelope.event {
            break;
        }
    }
    Ok(summary)
}
