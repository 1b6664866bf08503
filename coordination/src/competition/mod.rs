//! Agent competition: proposals, judging, and cumulative win statistics.

pub mod stats;
pub mod tracker;
pub mod writer;

pub use stats::{
    AgentId, AgentStatistics, InMemoryStatsStore, StatsSnapshot, StatsStore, StatsStoreError,
};
pub use tracker::{
    CompetitionError, CompetitionResult, CompetitionTracker, Confidence, DecisionOutcome,
    InstanceId, JudgeDecision, Proposal, ProposalContent, ProposalReceipt,
};
pub use writer::{BackgroundStatsStore, StatsWriter};
