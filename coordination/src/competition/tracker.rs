//! Competition tracker — proposals, the judge decision, and win statistics.
//!
//! One competition instance is open per iteration. Proposals are
//! last-write-wins per agent; the decision is write-once. Statistics outlive
//! instances and are flushed to the injected [`StatsStore`] on every change.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::stats::{AgentId, AgentStatistics, StatsSnapshot, StatsStore, StatsStoreError};

/// Identifier of a competition instance.
pub type InstanceId = String;

/// Judge's confidence in a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Body of an agent's proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalContent {
    pub kind: String,
    #[serde(default)]
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub agent_id: AgentId,
    pub kind: String,
    pub rationale: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeDecision {
    pub winning_agent_id: AgentId,
    pub rationale: String,
    pub confidence: Confidence,
    pub decided_at: DateTime<Utc>,
}

/// Error type for competition operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompetitionError {
    /// The engine routed competition input while no instance exists.
    #[error("no competition instance is open")]
    NoInstance,

    #[error("competition {instance_id} already decided for {winner}")]
    AlreadyDecided {
        instance_id: InstanceId,
        winner: AgentId,
    },

    #[error("competition {instance_id} is decided and closed to proposals")]
    InstanceClosed { instance_id: InstanceId },
}

impl CompetitionError {
    /// Whether this is an internal ordering bug rather than bad input.
    pub fn is_defect(&self) -> bool {
        matches!(self, Self::NoInstance)
    }
}

/// Result of submitting a proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalReceipt {
    pub instance_id: InstanceId,
    /// The agent had not proposed in this instance before.
    pub first_submission: bool,
    /// Older than the agent's stored proposal; not applied.
    pub superseded: bool,
    pub stats: AgentStatistics,
}

/// Result of recording a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionOutcome {
    pub instance_id: InstanceId,
    pub decision: JudgeDecision,
    /// The winner never proposed in this instance.
    pub anomalous: bool,
    /// Statistics of every agent who took part, winner included.
    pub updated: Vec<AgentStatistics>,
}

/// Snapshot of one instance for the iteration summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetitionResult {
    pub instance_id: InstanceId,
    pub proposals: Vec<Proposal>,
    pub decision: Option<JudgeDecision>,
    pub anomalous: bool,
}

#[derive(Debug, Clone)]
struct CompetitionInstance {
    id: InstanceId,
    proposals: BTreeMap<AgentId, Proposal>,
    decision: Option<JudgeDecision>,
    anomalous: bool,
}

impl CompetitionInstance {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            proposals: BTreeMap::new(),
            decision: None,
            anomalous: false,
        }
    }
}

/// Tracker owning proposals, the decision, and cumulative statistics.
pub struct CompetitionTracker {
    store: Box<dyn StatsStore>,
    stats: StatsSnapshot,
    instance: Option<CompetitionInstance>,
}

impl CompetitionTracker {
    /// Create a tracker seeded from `store`.
    pub fn new(store: Box<dyn StatsStore>) -> Result<Self, StatsStoreError> {
        let stats = store.load()?;
        info!(agents = stats.len(), "Loaded agent statistics");
        Ok(Self {
            store,
            stats,
            instance: None,
        })
    }

    /// Open a new instance, replacing any previous one.
    pub fn open_instance(&mut self) -> InstanceId {
        let instance = CompetitionInstance::new();
        let id = instance.id.clone();
        debug!(instance_id = %id, "Competition instance opened");
        self.instance = Some(instance);
        id
    }

    /// Clear proposals and the decision. Statistics are kept.
    pub fn reset(&mut self) {
        self.instance = None;
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.instance.as_ref().map(|i| i.id.as_str())
    }

    pub fn is_decided(&self) -> bool {
        self.instance
            .as_ref()
            .is_some_and(|i| i.decision.is_some())
    }

    pub fn proposal(&self, agent_id: &str) -> Option<&Proposal> {
        self.instance.as_ref()?.proposals.get(agent_id)
    }

    pub fn stats(&self, agent_id: &str) -> Option<&AgentStatistics> {
        self.stats.get(agent_id)
    }

    pub fn all_stats(&self) -> &StatsSnapshot {
        &self.stats
    }

    /// Store `agent_id`'s proposal for the open instance.
    pub fn submit_proposal(
        &mut self,
        agent_id: &str,
        content: ProposalContent,
        submitted_at: DateTime<Utc>,
    ) -> Result<ProposalReceipt, CompetitionError> {
        let instance = self.instance.as_mut().ok_or(CompetitionError::NoInstance)?;
        if instance.decision.is_some() {
            return Err(CompetitionError::InstanceClosed {
                instance_id: instance.id.clone(),
            });
        }

        let existing = instance.proposals.get(agent_id);
        let first_submission = existing.is_none();
        let superseded = existing.is_some_and(|p| submitted_at < p.submitted_at);

        if !superseded {
            instance.proposals.insert(
                agent_id.to_string(),
                Proposal {
                    agent_id: agent_id.to_string(),
                    kind: content.kind,
                    rationale: content.rationale,
                    submitted_at,
                },
            );
        }
        let instance_id = instance.id.clone();

        if first_submission {
            self.stats
                .entry(agent_id.to_string())
                .or_insert_with(|| AgentStatistics::new(agent_id))
                .proposals_submitted += 1;
            self.flush();
        }

        debug!(instance_id = %instance_id, agent_id, first_submission, superseded, "Proposal stored");

        Ok(ProposalReceipt {
            instance_id,
            first_submission,
            superseded,
            stats: self.stats.get(agent_id).cloned().unwrap_or_default(),
        })
    }

    /// Record the single decision for the open instance.
    pub fn record_decision(
        &mut self,
        winning_agent_id: &str,
        confidence: Confidence,
        rationale: &str,
        decided_at: DateTime<Utc>,
    ) -> Result<DecisionOutcome, CompetitionError> {
        let instance = self.instance.as_mut().ok_or(CompetitionError::NoInstance)?;
        if let Some(existing) = &instance.decision {
            return Err(CompetitionError::AlreadyDecided {
                instance_id: instance.id.clone(),
                winner: existing.winning_agent_id.clone(),
            });
        }

        let decision = JudgeDecision {
            winning_agent_id: winning_agent_id.to_string(),
            rationale: rationale.to_string(),
            confidence,
            decided_at,
        };
        let anomalous = !instance.proposals.contains_key(winning_agent_id);
        instance.decision = Some(decision.clone());
        instance.anomalous = anomalous;

        let instance_id = instance.id.clone();
        let mut participants: Vec<AgentId> = instance.proposals.keys().cloned().collect();

        let winner = self
            .stats
            .entry(winning_agent_id.to_string())
            .or_insert_with(|| AgentStatistics::new(winning_agent_id));
        if anomalous {
            warn!(
                instance_id = %instance_id,
                agent_id = winning_agent_id,
                "Decision names an agent with no proposal in this competition"
            );
            // Implicit entry so wins never exceed proposals.
            winner.proposals_submitted += 1;
            participants.push(winning_agent_id.to_string());
        }
        winner.wins += 1;
        self.flush();

        info!(
            instance_id = %instance_id,
            winner = winning_agent_id,
            %confidence,
            anomalous,
            "Judge decision recorded"
        );

        let updated = participants
            .iter()
            .filter_map(|id| self.stats.get(id).cloned())
            .collect();

        Ok(DecisionOutcome {
            instance_id,
            decision,
            anomalous,
            updated,
        })
    }

    /// Snapshot of the open instance.
    pub fn result(&self) -> Option<CompetitionResult> {
        let instance = self.instance.as_ref()?;
        Some(CompetitionResult {
            instance_id: instance.id.clone(),
            proposals: instance.proposals.values().cloned().collect(),
            decision: instance.decision.clone(),
            anomalous: instance.anomalous,
        })
    }

    fn flush(&self) {
        if let Err(e) = self.store.flush(&self.stats) {
            warn!(error = %e, "Failed to flush agent statistics");
        }
    }
}

impl fmt::Debug for CompetitionTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompetitionTracker")
            .field("agents", &self.stats.len())
            .field("instance", &self.instance_id())
            .finish()
    }
}
