//! Engine error types
//!
//! Every variant except [`EngineError::Defect`] is a recoverable rejection
//! of caller input: the engine state is unchanged and the caller decides
//! what to do. `Defect` means the engine's own ordering invariants broke.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::competition::{AgentId, CompetitionError, InstanceId};
use crate::phase::{Phase, TransitionError};
use crate::voting::{OptionId, VoteError};

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Why a vote was not counted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum InvalidVote {
    /// No window open in the current phase.
    WindowClosed { phase: Phase },
    /// Option not in the published set.
    UnknownOption { option_id: OptionId },
}

impl fmt::Display for InvalidVote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WindowClosed { phase } => write!(f, "no vote window open during {}", phase),
            Self::UnknownOption { option_id } => {
                write!(f, "option {} is not in the published set", option_id)
            }
        }
    }
}

/// Errors reported by the engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Signal does not match the current phase or epoch
    #[error("rejected transition: {0}")]
    RejectedTransition(#[from] TransitionError),

    /// Vote outside an open window or for an unknown option
    #[error("invalid vote: {0}")]
    InvalidVote(InvalidVote),

    /// Second decision for an already decided competition
    #[error("competition {instance_id} already decided for {winner}")]
    DuplicateDecision {
        instance_id: InstanceId,
        winner: AgentId,
    },

    /// Well-formed event that the current phase does not take
    #[error("{event_type} not accepted during {phase}")]
    NotAccepted {
        event_type: &'static str,
        phase: Phase,
    },

    /// Malformed or incomplete event rejected at the boundary
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// Internal ordering bug; not caused by caller input
    #[error("engine invariant violated: {0}")]
    Defect(String),

    /// The engine task is no longer running
    #[error("engine is shut down")]
    Closed,
}

impl EngineError {
    /// Whether this signals a programming error rather than bad input.
    pub fn is_defect(&self) -> bool {
        matches!(self, Self::Defect(_))
    }

    /// Map a tracker error raised while handling `event_type` in `phase`.
    pub fn from_competition(err: CompetitionError, event_type: &'static str, phase: Phase) -> Self {
        match err {
            CompetitionError::AlreadyDecided {
                instance_id,
                winner,
            } => Self::DuplicateDecision {
                instance_id,
                winner,
            },
            CompetitionError::InstanceClosed { .. } => Self::NotAccepted { event_type, phase },
            CompetitionError::NoInstance => Self::Defect(err.to_string()),
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RejectedTransition(_) => "REJECTED_TRANSITION",
            Self::InvalidVote(_) => "INVALID_VOTE",
            Self::DuplicateDecision { .. } => "DUPLICATE_DECISION",
            Self::NotAccepted { .. } => "NOT_ACCEPTED",
            Self::InvalidEvent(_) => "INVALID_EVENT",
            Self::Defect(_) => "ENGINE_DEFECT",
            Self::Closed => "ENGINE_CLOSED",
        }
    }
}

impl From<VoteError> for EngineError {
    fn from(err: VoteError) -> Self {
        match err {
            VoteError::UnknownOption(option_id) => {
                Self::InvalidVote(InvalidVote::UnknownOption { option_id })
            }
            VoteError::NoWindow => Self::Defect(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vote_error_mapping() {
        let err: EngineError = VoteError::UnknownOption(4).into();
        assert_eq!(err.code(), "INVALID_VOTE");
        assert!(!err.is_defect());

        let err: EngineError = VoteError::NoWindow.into();
        assert!(err.is_defect());
    }

    #[test]
    fn test_transition_error_wraps() {
        let err: EngineError = TransitionError::NotRunning.into();
        assert_eq!(err.code(), "REJECTED_TRANSITION");
        assert_eq!(err.to_string(), "rejected transition: loop is not running");
    }

    #[test]
    fn test_invalid_vote_display() {
        let err = EngineError::InvalidVote(InvalidVote::WindowClosed {
            phase: Phase::AgentCompetition,
        });
        assert_eq!(
            err.to_string(),
            "invalid vote: no vote window open during agent_competition"
        );
    }

    #[test]
    fn test_competition_error_mapping() {
        let err = EngineError::from_competition(
            CompetitionError::AlreadyDecided {
                instance_id: "i-1".into(),
                winner: "bard".into(),
            },
            "judge_decision",
            Phase::SceneConstruction,
        );
        assert_eq!(err.code(), "DUPLICATE_DECISION");

        let err = EngineError::from_competition(
            CompetitionError::NoInstance,
            "proposal_submitted",
            Phase::AgentCompetition,
        );
        assert!(err.is_defect());
    }
}

