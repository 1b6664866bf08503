//! Inbound and outbound event types
//!
//! Both directions are closed tagged unions. Inbound events are validated at
//! the boundary before they reach the engine.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::competition::{
    AgentId, AgentStatistics, CompetitionResult, Confidence, InstanceId, ProposalContent,
};
use crate::error::{EngineError, EngineResult};
use crate::phase::Phase;
use crate::timer::TimerOwner;
use crate::voting::{option_counts, GenreOption, OptionId, VoterId, WinnerResult};

/// Events consumed by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum InboundEvent {
    /// Start the loop from idle
    StartLoop,

    /// Stop immediately and return to idle
    StopLoop,

    /// Finish the current iteration, then go idle
    StopAfterIteration,

    /// Explicit move to the next phase
    AdvancePhase { to: Phase },

    /// Close the vote window early
    CloseVoting,

    /// Genres for this iteration
    GenreSetPublished { options: Vec<GenreOption> },

    /// An audience vote
    VoteCast {
        voter_id: VoterId,
        option_id: OptionId,
        cast_at: DateTime<Utc>,
    },

    /// A raw live-chat line that may contain a vote
    ChatMessage {
        author_id: VoterId,
        text: String,
        sent_at: DateTime<Utc>,
    },

    /// An agent's proposal for the current competition
    ProposalSubmitted {
        agent_id: AgentId,
        content: ProposalContent,
        submitted_at: DateTime<Utc>,
    },

    /// The judge's pick for the current competition
    JudgeDecision {
        winning_agent_id: AgentId,
        confidence: Confidence,
        #[serde(default)]
        rationale: String,
        decided_at: DateTime<Utc>,
    },
}

impl InboundEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            InboundEvent::StartLoop => "start_loop",
            InboundEvent::StopLoop => "stop_loop",
            InboundEvent::StopAfterIteration => "stop_after_iteration",
            InboundEvent::AdvancePhase { .. } => "advance_phase",
            InboundEvent::CloseVoting => "close_voting",
            InboundEvent::GenreSetPublished { .. } => "genre_set_published",
            InboundEvent::VoteCast { .. } => "vote_cast",
            InboundEvent::ChatMessage { .. } => "chat_message",
            InboundEvent::ProposalSubmitted { .. } => "proposal_submitted",
            InboundEvent::JudgeDecision { .. } => "judge_decision",
        }
    }

    /// Check required fields that serde cannot express.
    pub fn validate(&self) -> EngineResult<()> {
        match self {
            InboundEvent::GenreSetPublished { options } => validate_options(options),
            InboundEvent::VoteCast { voter_id, .. } => require_id("voterId", voter_id),
            InboundEvent::ChatMessage { author_id, .. } => require_id("authorId", author_id),
            InboundEvent::ProposalSubmitted {
                agent_id, content, ..
            } => {
                require_id("agentId", agent_id)?;
                if content.kind.trim().is_empty() {
                    return Err(EngineError::InvalidEvent(
                        "proposal content.kind must not be empty".to_string(),
                    ));
                }
                Ok(())
            }
            InboundEvent::JudgeDecision {
                winning_agent_id, ..
            } => require_id("winningAgentId", winning_agent_id),
            _ => Ok(()),
        }
    }

    /// Parse one JSON object and validate it.
    pub fn from_json(line: &str) -> EngineResult<Self> {
        let event: InboundEvent = serde_json::from_str(line)
            .map_err(|e| EngineError::InvalidEvent(format!("malformed event: {e}")))?;
        event.validate()?;
        Ok(event)
    }
}

fn require_id(field: &str, value: &str) -> EngineResult<()> {
    if value.trim().is_empty() {
        return Err(EngineError::InvalidEvent(format!("{field} must not be empty")));
    }
    Ok(())
}

fn validate_options(options: &[GenreOption]) -> EngineResult<()> {
    if options.is_empty() {
        return Err(EngineError::InvalidEvent(
            "genre set must contain at least one option".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for option in options {
        if !seen.insert(option.id) {
            return Err(EngineError::InvalidEvent(format!(
                "duplicate option id {}",
                option.id
            )));
        }
        if option.name.trim().is_empty() {
            return Err(EngineError::InvalidEvent(format!(
                "option {} has an empty name",
                option.id
            )));
        }
    }
    Ok(())
}

/// Events emitted by the engine. Informational only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum OutboundEvent {
    /// An accepted phase transition
    PhaseChanged {
        from: Phase,
        to: Phase,
        iteration: u64,
    },

    /// Counts after a vote changed them
    VoteTallyUpdated {
        #[serde(deserialize_with = "option_counts::deserialize")]
        counts: BTreeMap<OptionId, u32>,
        total_votes: u32,
    },

    /// Vote window closed
    VotingClosed {
        winner: Option<OptionId>,
        #[serde(deserialize_with = "option_counts::deserialize")]
        counts: BTreeMap<OptionId, u32>,
    },

    /// An agent's cumulative statistics changed
    CompetitionStatsUpdated {
        agent_id: AgentId,
        proposals_submitted: u64,
        wins: u64,
        win_rate: f64,
    },

    /// Snapshot taken on entering cleanup
    IterationSummary {
        iteration: u64,
        voting_result: Option<WinnerResult>,
        competition_result: Option<CompetitionResult>,
    },

    /// Warning: the judge picked an agent that did not propose
    DecisionAnomaly {
        instance_id: InstanceId,
        agent_id: AgentId,
    },

    /// Display-only countdown observation
    CountdownTick { owner: TimerOwner, remaining_ms: u64 },
}

impl OutboundEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            OutboundEvent::PhaseChanged { .. } => "phase_changed",
            OutboundEvent::VoteTallyUpdated { .. } => "vote_tally_updated",
            OutboundEvent::VotingClosed { .. } => "voting_closed",
            OutboundEvent::CompetitionStatsUpdated { .. } => "competition_stats_updated",
            OutboundEvent::IterationSummary { .. } => "iteration_summary",
            OutboundEvent::DecisionAnomaly { .. } => "decision_anomaly",
            OutboundEvent::CountdownTick { .. } => "countdown_tick",
        }
    }

    pub fn stats(stats: &AgentStatistics) -> Self {
        OutboundEvent::CompetitionStatsUpdated {
            agent_id: stats.agent_id.clone(),
            proposals_submitted: stats.proposals_submitted,
            wins: stats.wins,
            win_rate: stats.win_rate(),
        }
    }

    /// Whether this event is a warning for operators.
    pub fn is_warning(&self) -> bool {
        matches!(self, OutboundEvent::DecisionAnomaly { .. })
    }
}

/// Outbound event as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Publication order, starting at 1.
    pub sequence: u64,
    pub emitted_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: OutboundEvent,
}
