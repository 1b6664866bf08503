//! Loop engine — routes inputs to the phase machine, tally, and tracker.
//!
//! The engine is synchronous and owns all mutable loop state. Each input
//! produces a [`Step`]: the outcome reported to the caller, the outbound
//! events to publish, and the timer commands to apply. Applying those is
//! the runtime's job, which keeps this type free of I/O and clocks.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error};

use crate::competition::{
    CompetitionTracker, Confidence, DecisionOutcome, ProposalContent, ProposalReceipt,
    StatsStore, StatsStoreError,
};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, InvalidVote};
use crate::events::{InboundEvent, OutboundEvent};
use crate::phase::{Epoch, Phase, PhaseChange, PhaseMachine, Signal, TransitionError, Trigger};
use crate::timer::TimerOwner;
use crate::voting::{parse_chat_vote, GenreOption, OptionId, VoteReceipt, VoteTally, WinnerResult};

/// Expiry payload of an engine timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub owner: TimerOwner,
    /// Epoch the timer was started in.
    pub epoch: Epoch,
}

/// Everything that enters the engine's single queue.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineInput {
    Event(InboundEvent),
    TimerExpired(TimerFired),
}

impl From<InboundEvent> for EngineInput {
    fn from(event: InboundEvent) -> Self {
        EngineInput::Event(event)
    }
}

/// Timer work requested by a step, applied in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerCommand {
    Start {
        owner: TimerOwner,
        duration: Duration,
        fired: TimerFired,
    },
    CancelAll,
}

/// What an accepted input did.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Transitioned(PhaseChange),
    StopScheduled,
    VoteRecorded(VoteReceipt),
    ProposalRecorded(ProposalReceipt),
    DecisionRecorded(DecisionOutcome),
    /// Chat line that was not a vote.
    Ignored,
    /// Timer from an earlier epoch.
    Discarded,
}

/// Result of handling one input.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub outcome: Outcome,
    pub events: Vec<OutboundEvent>,
    pub timers: Vec<TimerCommand>,
}

#[derive(Debug, Default)]
struct Effects {
    events: Vec<OutboundEvent>,
    timers: Vec<TimerCommand>,
}

impl Effects {
    fn into_step(self, outcome: Outcome) -> Step {
        Step {
            outcome,
            events: self.events,
            timers: self.timers,
        }
    }
}

/// Point-in-time view of the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub phase: Phase,
    pub epoch: Epoch,
    pub iteration: u64,
    pub stop_requested: bool,
    pub options: Vec<GenreOption>,
    pub counts: BTreeMap<OptionId, u32>,
    pub total_votes: u32,
    pub instance_id: Option<String>,
    pub decided: bool,
}

/// Single-writer owner of phase, tally, and competition state.
#[derive(Debug)]
pub struct LoopEngine {
    config: EngineConfig,
    machine: PhaseMachine,
    tally: VoteTally,
    tracker: CompetitionTracker,
    /// Genres published for the current iteration.
    options: Vec<GenreOption>,
    /// Result of the current iteration's vote window.
    last_vote: Option<WinnerResult>,
}

impl LoopEngine {
    /// Create an idle engine, loading agent statistics from `store`.
    pub fn new(config: EngineConfig, store: Box<dyn StatsStore>) -> Result<Self, StatsStoreError> {
        Ok(Self {
            machine: PhaseMachine::new(config.transition_log_capacity),
            tally: VoteTally::new(),
            tracker: CompetitionTracker::new(store)?,
            options: Vec::new(),
            last_vote: None,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.machine.phase()
    }

    pub fn machine(&self) -> &PhaseMachine {
        &self.machine
    }

    pub fn tally(&self) -> &VoteTally {
        &self.tally
    }

    pub fn tracker(&self) -> &CompetitionTracker {
        &self.tracker
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            phase: self.machine.phase(),
            epoch: self.machine.epoch(),
            iteration: self.machine.iteration(),
            stop_requested: self.machine.stop_requested(),
            options: self.options.clone(),
            counts: self.tally.counts(),
            total_votes: self.tally.total_votes(),
            instance_id: self.tracker.instance_id().map(str::to_string),
            decided: self.tracker.is_decided(),
        }
    }

    /// Handle one input. Rejections leave the engine unchanged.
    pub fn handle(&mut self, input: EngineInput) -> EngineResult<Step> {
        let mut fx = Effects::default();
        let outcome = match input {
            EngineInput::Event(event) => {
                event.validate()?;
                self.on_event(event, &mut fx)?
            }
            EngineInput::TimerExpired(fired) => self.on_timer(fired, &mut fx)?,
        };
        Ok(fx.into_step(outcome))
    }

    fn on_event(&mut self, event: InboundEvent, fx: &mut Effects) -> EngineResult<Outcome> {
        let phase = self.machine.phase();
        let event_type = event.event_type();

        match event {
            InboundEvent::StartLoop => self.transition(Signal::Start, fx),
            InboundEvent::StopLoop => self.transition(Signal::Stop, fx),
            InboundEvent::StopAfterIteration => {
                if self.machine.request_stop_after_iteration() {
                    Ok(Outcome::StopScheduled)
                } else {
                    Err(TransitionError::NotRunning.into())
                }
            }
            InboundEvent::AdvancePhase { to } => self.transition(Signal::MoveTo(to), fx),
            InboundEvent::CloseVoting => self.transition(Signal::now(Trigger::VotingClosed), fx),
            InboundEvent::GenreSetPublished { options } => {
                if phase != Phase::GenreSelection {
                    return Err(EngineError::NotAccepted { event_type, phase });
                }
                self.options = options;
                self.transition(Signal::now(Trigger::OptionsPublished), fx)
            }
            InboundEvent::VoteCast {
                voter_id,
                option_id,
                cast_at,
            } => self.cast_vote(&voter_id, option_id, cast_at, fx),
            InboundEvent::ChatMessage {
                author_id,
                text,
                sent_at,
            } => {
                if !phase.accepts_votes() {
                    return Ok(Outcome::Ignored);
                }
                match parse_chat_vote(&text, self.tally.options()) {
                    Some(option_id) => self.cast_vote(&author_id, option_id, sent_at, fx),
                    None => {
                        debug!(author_id, "Chat line is not a vote");
                        Ok(Outcome::Ignored)
                    }
                }
            }
            InboundEvent::ProposalSubmitted {
                agent_id,
                content,
                submitted_at,
            } => self.submit_proposal(&agent_id, content, submitted_at, fx),
            InboundEvent::JudgeDecision {
                winning_agent_id,
                confidence,
                rationale,
                decided_at,
            } => self.record_decision(&winning_agent_id, confidence, &rationale, decided_at, fx),
        }
    }

    fn on_timer(&mut self, fired: TimerFired, fx: &mut Effects) -> EngineResult<Outcome> {
        let trigger = match fired.owner {
            TimerOwner::VoteWindow => Trigger::VotingClosed,
            TimerOwner::Phase => self.machine.phase().exit_trigger(),
        };
        match self.transition(Signal::scheduled(trigger, fired.epoch), fx) {
            Err(EngineError::RejectedTransition(e)) if e.is_stale() => Ok(Outcome::Discarded),
            other => other,
        }
    }

    fn cast_vote(
        &mut self,
        voter_id: &str,
        option_id: OptionId,
        cast_at: DateTime<Utc>,
        fx: &mut Effects,
    ) -> EngineResult<Outcome> {
        let phase = self.machine.phase();
        if !phase.accepts_votes() {
            debug!(voter_id, option_id, %phase, "Vote outside window");
            return Err(EngineError::InvalidVote(InvalidVote::WindowClosed { phase }));
        }

        let receipt = self.tally.cast_vote(voter_id, option_id, cast_at)?;
        if receipt.changed {
            fx.events.push(OutboundEvent::VoteTallyUpdated {
                counts: receipt.counts.clone(),
                total_votes: receipt.total_votes,
            });
        }
        if receipt.first_vote {
            fx.timers.push(TimerCommand::Start {
                owner: TimerOwner::VoteWindow,
                duration: self.config.vote_window(),
                fired: TimerFired {
                    owner: TimerOwner::VoteWindow,
                    epoch: self.machine.epoch(),
                },
            });
        }
        Ok(Outcome::VoteRecorded(receipt))
    }

    fn submit_proposal(
        &mut self,
        agent_id: &str,
        content: ProposalContent,
        submitted_at: DateTime<Utc>,
        fx: &mut Effects,
    ) -> EngineResult<Outcome> {
        let phase = self.machine.phase();
        if !phase.accepts_proposals() {
            return Err(EngineError::NotAccepted {
                event_type: "proposal_submitted",
                phase,
            });
        }

        let receipt = self
            .tracker
            .submit_proposal(agent_id, content, submitted_at)
            .map_err(|e| EngineError::from_competition(e, "proposal_submitted", phase))?;
        if receipt.first_submission {
            fx.events.push(OutboundEvent::stats(&receipt.stats));
        }
        Ok(Outcome::ProposalRecorded(receipt))
    }

    fn record_decision(
        &mut self,
        winning_agent_id: &str,
        confidence: Confidence,
        rationale: &str,
        decided_at: DateTime<Utc>,
        fx: &mut Effects,
    ) -> EngineResult<Outcome> {
        let phase = self.machine.phase();
        if !phase.accepts_decisions() {
            return Err(EngineError::NotAccepted {
                event_type: "judge_decision",
                phase,
            });
        }

        let outcome = self
            .tracker
            .record_decision(winning_agent_id, confidence, rationale, decided_at)
            .map_err(|e| EngineError::from_competition(e, "judge_decision", phase))?;

        fx.events
            .extend(outcome.updated.iter().map(OutboundEvent::stats));
        if outcome.anomalous {
            fx.events.push(OutboundEvent::DecisionAnomaly {
                instance_id: outcome.instance_id.clone(),
                agent_id: winning_agent_id.to_string(),
            });
        }

        if phase == Phase::JudgeSelection {
            self.transition(Signal::now(Trigger::DecisionRecorded), fx)?;
        }
        Ok(Outcome::DecisionRecorded(outcome))
    }

    fn transition(&mut self, signal: Signal, fx: &mut Effects) -> EngineResult<Outcome> {
        let change = self.machine.advance(signal)?;

        fx.timers.push(TimerCommand::CancelAll);
        self.on_exit(&change, fx);
        fx.events.push(OutboundEvent::PhaseChanged {
            from: change.from,
            to: change.to,
            iteration: change.iteration,
        });
        self.on_enter(&change, fx);

        Ok(Outcome::Transitioned(change))
    }

    fn on_exit(&mut self, change: &PhaseChange, fx: &mut Effects) {
        if change.to == Phase::Idle {
            // Stopping drops in-flight work without reporting it.
            self.tally.discard();
            self.tracker.reset();
            self.options.clear();
            self.last_vote = None;
            return;
        }

        if change.from == Phase::VoteCollection {
            match self.tally.close() {
                Ok(result) => {
                    fx.events.push(OutboundEvent::VotingClosed {
                        winner: result.winner,
                        counts: result.counts.clone(),
                    });
                    self.last_vote = Some(result);
                }
                Err(e) => error!(error = %e, "Vote window missing when leaving vote collection"),
            }
        }
    }

    fn on_enter(&mut self, change: &PhaseChange, fx: &mut Effects) {
        match change.to {
            Phase::GenreSelection => {
                self.options.clear();
                self.last_vote = None;
                self.tracker.reset();
            }
            Phase::VoteCollection => self.tally.open(self.options.clone()),
            Phase::AgentCompetition => {
                self.tracker.open_instance();
            }
            Phase::CleanupReset => fx.events.push(OutboundEvent::IterationSummary {
                iteration: change.iteration,
                voting_result: self.last_vote.clone(),
                competition_result: self.tracker.result(),
            }),
            _ => {}
        }

        if let Some(duration) = self.config.phase_timer(change.to) {
            fx.timers.push(TimerCommand::Start {
                owner: TimerOwner::Phase,
                duration,
                fired: TimerFired {
                    owner: TimerOwner::Phase,
                    epoch: change.epoch,
                },
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::competition::InMemoryStatsStore;

    fn engine() -> LoopEngine {
        LoopEngine::new(EngineConfig::default(), Box::new(InMemoryStatsStore::new())).unwrap()
    }

    fn send(engine: &mut LoopEngine, event: InboundEvent) -> EngineResult<Step> {
        engine.handle(EngineInput::Event(event))
    }

    fn publish_genres(engine: &mut LoopEngine) {
        send(
            engine,
            InboundEvent::GenreSetPublished {
                options: vec![
                    GenreOption::new(1, "Noir", ""),
                    GenreOption::new(2, "Fantasy", ""),
                ],
            },
        )
        .unwrap();
    }

    fn started_timer(step: &Step) -> TimerFired {
        step.timers
            .iter()
            .find_map(|cmd| match cmd {
                TimerCommand::Start { fired, .. } => Some(*fired),
                TimerCommand::CancelAll => None,
            })
            .expect("step should start a timer")
    }

    fn vote(voter: &str, option_id: OptionId) -> InboundEvent {
        InboundEvent::VoteCast {
            voter_id: voter.to_string(),
            option_id,
            cast_at: Utc::now(),
        }
    }

    #[test]
    fn test_start_emits_phase_changed() {
        let mut engine = engine();
        let step = send(&mut engine, InboundEvent::StartLoop).unwrap();
        assert_eq!(
            step.events,
            vec![OutboundEvent::PhaseChanged {
                from: Phase::Idle,
                to: Phase::GenreSelection,
                iteration: 1,
            }]
        );
        assert_eq!(step.timers, vec![TimerCommand::CancelAll]);
    }

    #[test]
    fn test_publish_moves_to_announcement() {
        let mut engine = engine();
        send(&mut engine, InboundEvent::StartLoop).unwrap();
        publish_genres(&mut engine);
        assert_eq!(engine.phase(), Phase::VotingAnnouncement);
        assert_eq!(engine.status().options.len(), 2);
    }

    #[test]
    fn test_publish_outside_genre_selection_rejected() {
        let mut engine = engine();
        let err = send(
            &mut engine,
            InboundEvent::GenreSetPublished {
                options: vec![GenreOption::new(1, "Noir", "")],
            },
        )
        .unwrap_err();
        assert_eq!(
            err,
            EngineError::NotAccepted {
                event_type: "genre_set_published",
                phase: Phase::Idle
            }
        );
    }

    #[test]
    fn test_first_vote_starts_window_timer_once() {
        let mut engine = engine();
        send(&mut engine, InboundEvent::StartLoop).unwrap();
        publish_genres(&mut engine);
        send(&mut engine, InboundEvent::AdvancePhase { to: Phase::VoteCollection }).unwrap();

        let first = send(&mut engine, vote("a", 1)).unwrap();
        assert_eq!(
            first.timers,
            vec![TimerCommand::Start {
                owner: TimerOwner::VoteWindow,
                duration: Duration::from_millis(30_000),
                fired: TimerFired {
                    owner: TimerOwner::VoteWindow,
                    epoch: engine.machine().epoch(),
                },
            }]
        );
        let second = send(&mut engine, vote("b", 2)).unwrap();
        assert!(second.timers.is_empty());
    }

    #[test]
    fn test_vote_outside_window_rejected() {
        let mut engine = engine();
        send(&mut engine, InboundEvent::StartLoop).unwrap();
        let err = send(&mut engine, vote("a", 1)).unwrap_err();
        assert_eq!(
            err,
            EngineError::InvalidVote(InvalidVote::WindowClosed {
                phase: Phase::GenreSelection
            })
        );
    }

    #[test]
    fn test_window_timer_closes_voting() {
        let mut engine = engine();
        send(&mut engine, InboundEvent::StartLoop).unwrap();
        publish_genres(&mut engine);
        send(&mut engine, InboundEvent::AdvancePhase { to: Phase::VoteCollection }).unwrap();
        let step = send(&mut engine, vote("a", 2)).unwrap();
        let fired = started_timer(&step);

        let step = engine.handle(EngineInput::TimerExpired(fired)).unwrap();
        assert_eq!(engine.phase(), Phase::AgentCompetition);
        assert!(step.events.contains(&OutboundEvent::VotingClosed {
            winner: Some(2),
            counts: BTreeMap::from([(1, 0), (2, 1)]),
        }));
    }

    #[test]
    fn test_stale_timer_discarded() {
        let mut engine = engine();
        send(&mut engine, InboundEvent::StartLoop).unwrap();
        publish_genres(&mut engine);
        let stale = TimerFired {
            owner: TimerOwner::Phase,
            epoch: engine.machine().epoch(),
        };
        send(&mut engine, InboundEvent::StopLoop).unwrap();

        let step = engine.handle(EngineInput::TimerExpired(stale)).unwrap();
        assert_eq!(step.outcome, Outcome::Discarded);
        assert!(step.events.is_empty());
        assert_eq!(engine.phase(), Phase::Idle);
    }

    #[test]
    fn test_chat_vote_counts() {
        let mut engine = engine();
        send(&mut engine, InboundEvent::StartLoop).unwrap();
        publish_genres(&mut engine);
        send(&mut engine, InboundEvent::AdvancePhase { to: Phase::VoteCollection }).unwrap();

        let step = send(
            &mut engine,
            InboundEvent::ChatMessage {
                author_id: "viewer".into(),
                text: "!vote fantasy".into(),
                sent_at: Utc::now(),
            },
        )
        .unwrap();
        assert!(matches!(step.outcome, Outcome::VoteRecorded(_)));
        assert_eq!(engine.tally().counts()[&2], 1);

        let step = send(
            &mut engine,
            InboundEvent::ChatMessage {
                author_id: "viewer".into(),
                text: "great stream".into(),
                sent_at: Utc::now(),
            },
        )
        .unwrap();
        assert_eq!(step.outcome, Outcome::Ignored);
    }

    #[test]
    fn test_stop_after_iteration_requires_running_loop() {
        let mut engine = engine();
        let err = send(&mut engine, InboundEvent::StopAfterIteration).unwrap_err();
        assert_eq!(err.code(), "REJECTED_TRANSITION");
        send(&mut engine, InboundEvent::StartLoop).unwrap();
        let step = send(&mut engine, InboundEvent::StopAfterIteration).unwrap();
        assert_eq!(step.outcome, Outcome::StopScheduled);
        assert!(engine.status().stop_requested);
    }

    #[test]
    fn test_invalid_event_rejected_before_routing() {
        let mut engine = engine();
        send(&mut engine, InboundEvent::StartLoop).unwrap();
        let epoch = engine.machine().epoch();
        let err = send(&mut engine, InboundEvent::GenreSetPublished { options: vec![] })
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidEvent(_)));
        assert_eq!(engine.machine().epoch(), epoch);
    }
}
