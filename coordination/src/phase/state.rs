//! Loop phases, triggers, and the static transition table.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Monotonic tag identifying one occurrence of a phase.
///
/// Bumped on every accepted transition. Timers and triggers carry the epoch
/// they were created in so stale deliveries can be dropped.
pub type Epoch = u64;

/// One stage of the fixed story-loop cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Loop stopped; nothing is accepted except `start`.
    Idle,
    /// Waiting for the content source to publish this iteration's genres.
    GenreSelection,
    /// Genres shown to the audience before voting opens.
    VotingAnnouncement,
    /// Audience vote window.
    VoteCollection,
    /// Agents submit proposals for the winning genre.
    AgentCompetition,
    /// Waiting for the judge to pick a winning proposal.
    JudgeSelection,
    /// Scene is being built from the winning proposal.
    SceneConstruction,
    /// Scene is on screen.
    ScenePresentation,
    /// Iteration summary emitted; settling before the next iteration.
    CleanupReset,
}

impl Phase {
    /// Every phase in cycle order, starting with `Idle`.
    pub const ALL: [Phase; 9] = [
        Phase::Idle,
        Phase::GenreSelection,
        Phase::VotingAnnouncement,
        Phase::VoteCollection,
        Phase::AgentCompetition,
        Phase::JudgeSelection,
        Phase::SceneConstruction,
        Phase::ScenePresentation,
        Phase::CleanupReset,
    ];

    /// The trigger that moves this phase forward.
    pub fn exit_trigger(self) -> Trigger {
        match self {
            Self::Idle => Trigger::Start,
            Self::GenreSelection => Trigger::OptionsPublished,
            Self::VotingAnnouncement => Trigger::AnnouncementElapsed,
            Self::VoteCollection => Trigger::VotingClosed,
            Self::AgentCompetition => Trigger::ProposalsClosed,
            Self::JudgeSelection => Trigger::DecisionRecorded,
            Self::SceneConstruction => Trigger::SceneReady,
            Self::ScenePresentation => Trigger::PresentationElapsed,
            Self::CleanupReset => Trigger::SettleElapsed,
        }
    }

    /// Successor reached via [`Phase::exit_trigger`].
    ///
    /// `stop_requested` only matters for `CleanupReset`, which settles into
    /// `Idle` instead of starting another iteration.
    pub fn successor(self, stop_requested: bool) -> Phase {
        match self {
            Self::Idle => Self::GenreSelection,
            Self::GenreSelection => Self::VotingAnnouncement,
            Self::VotingAnnouncement => Self::VoteCollection,
            Self::VoteCollection => Self::AgentCompetition,
            Self::AgentCompetition => Self::JudgeSelection,
            Self::JudgeSelection => Self::SceneConstruction,
            Self::SceneConstruction => Self::ScenePresentation,
            Self::ScenePresentation => Self::CleanupReset,
            Self::CleanupReset if stop_requested => Self::Idle,
            Self::CleanupReset => Self::GenreSelection,
        }
    }

    /// Whether votes are counted in this phase.
    pub fn accepts_votes(self) -> bool {
        self == Self::VoteCollection
    }

    /// Whether agent proposals are accepted in this phase.
    pub fn accepts_proposals(self) -> bool {
        matches!(self, Self::AgentCompetition | Self::JudgeSelection)
    }

    /// Whether a judge decision may arrive for the current instance.
    ///
    /// Decisions after `JudgeSelection` belong to an already decided instance
    /// and are reported as duplicates by the tracker.
    pub fn accepts_decisions(self) -> bool {
        matches!(
            self,
            Self::JudgeSelection
                | Self::SceneConstruction
                | Self::ScenePresentation
                | Self::CleanupReset
        )
    }

    /// Whether the loop is running.
    pub fn is_active(self) -> bool {
        self != Self::Idle
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::GenreSelection => write!(f, "genre_selection"),
            Self::VotingAnnouncement => write!(f, "voting_announcement"),
            Self::VoteCollection => write!(f, "vote_collection"),
            Self::AgentCompetition => write!(f, "agent_competition"),
            Self::JudgeSelection => write!(f, "judge_selection"),
            Self::SceneConstruction => write!(f, "scene_construction"),
            Self::ScenePresentation => write!(f, "scene_presentation"),
            Self::CleanupReset => write!(f, "cleanup_reset"),
        }
    }
}

/// Internal or external condition that ends a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Start,
    OptionsPublished,
    AnnouncementElapsed,
    VotingClosed,
    ProposalsClosed,
    DecisionRecorded,
    SceneReady,
    PresentationElapsed,
    SettleElapsed,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::OptionsPublished => write!(f, "options_published"),
            Self::AnnouncementElapsed => write!(f, "announcement_elapsed"),
            Self::VotingClosed => write!(f, "voting_closed"),
            Self::ProposalsClosed => write!(f, "proposals_closed"),
            Self::DecisionRecorded => write!(f, "decision_recorded"),
            Self::SceneReady => write!(f, "scene_ready"),
            Self::PresentationElapsed => write!(f, "presentation_elapsed"),
            Self::SettleElapsed => write!(f, "settle_elapsed"),
        }
    }
}

/// Input to [`PhaseMachine::advance`](super::PhaseMachine::advance).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// `start_loop` command.
    Start,
    /// `stop_loop` command: forces `Idle` from any running phase.
    Stop,
    /// Explicit "move to phase X" command.
    MoveTo(Phase),
    /// Internal trigger. `epoch` is set when the trigger was scheduled ahead
    /// of time (timers) and must still match the current epoch.
    Trigger {
        trigger: Trigger,
        epoch: Option<Epoch>,
    },
}

impl Signal {
    /// Trigger issued synchronously by the engine in the current epoch.
    pub fn now(trigger: Trigger) -> Self {
        Self::Trigger {
            trigger,
            epoch: None,
        }
    }

    /// Trigger scheduled in `epoch`.
    pub fn scheduled(trigger: Trigger, epoch: Epoch) -> Self {
        Self::Trigger {
            trigger,
            epoch: Some(epoch),
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Stop => write!(f, "stop"),
            Self::MoveTo(phase) => write!(f, "move_to({})", phase),
            Self::Trigger {
                trigger,
                epoch: Some(epoch),
            } => write!(f, "{}@{}", trigger, epoch),
            Self::Trigger {
                trigger,
                epoch: None,
            } => write!(f, "{}", trigger),
        }
    }
}
