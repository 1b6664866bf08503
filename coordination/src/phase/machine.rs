//! Phase state machine — guarded transitions, epochs, and the iteration counter.
//!
//! The machine only decides *whether* a signal moves the loop and where to.
//! Entering/leaving side effects (resetting the tally, opening a competition
//! instance, scheduling timers) belong to the engine that owns the machine.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::state::{Epoch, Phase, Signal, Trigger};

/// Error returned when a signal does not move the loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("loop already running (phase {phase})")]
    AlreadyRunning { phase: Phase },

    #[error("loop is not running")]
    NotRunning,

    #[error("{signal} does not advance {phase} (expects {expected})")]
    UnexpectedTrigger {
        phase: Phase,
        signal: Signal,
        expected: Trigger,
    },

    #[error("cannot move from {from} to {to}; next phase is {expected}")]
    NotSuccessor {
        from: Phase,
        to: Phase,
        expected: Phase,
    },

    #[error("stale trigger from epoch {received} (current epoch {current})")]
    StaleEpoch { current: Epoch, received: Epoch },
}

impl TransitionError {
    /// Stale triggers are dropped silently rather than reported as rejections.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleEpoch { .. })
    }
}

/// An accepted transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseChange {
    pub from: Phase,
    pub to: Phase,
    /// Iteration counter after the transition.
    pub iteration: u64,
    /// Epoch of the newly entered phase.
    pub epoch: Epoch,
}

impl PhaseChange {
    /// Whether this transition started a new iteration.
    pub fn starts_iteration(&self) -> bool {
        self.to == Phase::GenreSelection
    }
}

/// A single recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: Phase,
    pub to: Phase,
    pub iteration: u64,
    pub epoch: Epoch,
    /// Signal that caused the transition.
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Owns the current phase, its epoch, and the iteration counter.
#[derive(Debug, Clone)]
pub struct PhaseMachine {
    phase: Phase,
    epoch: Epoch,
    iteration: u64,
    stop_requested: bool,
    log: VecDeque<TransitionRecord>,
    log_capacity: usize,
}

impl PhaseMachine {
    /// Create a machine in `Idle` keeping the last `log_capacity` transitions.
    pub fn new(log_capacity: usize) -> Self {
        Self {
            phase: Phase::Idle,
            epoch: 0,
            iteration: 0,
            stop_requested: false,
            log: VecDeque::with_capacity(log_capacity.min(256)),
            log_capacity,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Whether `cleanup_reset` will settle into `idle`.
    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Recorded transitions, oldest first.
    pub fn transitions(&self) -> impl Iterator<Item = &TransitionRecord> {
        self.log.iter()
    }

    /// Ask the loop to stop once the current iteration finishes.
    ///
    /// Returns `false` when the loop is not running.
    pub fn request_stop_after_iteration(&mut self) -> bool {
        if !self.phase.is_active() {
            return false;
        }
        self.stop_requested = true;
        info!(phase = %self.phase, iteration = self.iteration, "Stop requested after iteration");
        true
    }

    /// Apply a signal. Rejections leave the machine untouched.
    pub fn advance(&mut self, signal: Signal) -> Result<PhaseChange, TransitionError> {
        match self.target_for(signal) {
            Ok(to) => Ok(self.enter(to, signal)),
            Err(err) => {
                if err.is_stale() {
                    debug!(phase = %self.phase, %signal, "Discarding stale trigger");
                } else {
                    info!(phase = %self.phase, %signal, error = %err, "Rejected transition");
                }
                Err(err)
            }
        }
    }

    fn target_for(&self, signal: Signal) -> Result<Phase, TransitionError> {
        let expected = self.phase.successor(self.stop_requested);
        match signal {
            Signal::Start if self.phase == Phase::Idle => Ok(Phase::GenreSelection),
            Signal::Start => Err(TransitionError::AlreadyRunning { phase: self.phase }),
            Signal::Stop if self.phase.is_active() => Ok(Phase::Idle),
            Signal::Stop => Err(TransitionError::NotRunning),
            // Leaving idle goes through `start` only.
            Signal::MoveTo(_) if self.phase == Phase::Idle => Err(TransitionError::NotRunning),
            Signal::MoveTo(to) if to == expected => Ok(to),
            Signal::MoveTo(to) => Err(TransitionError::NotSuccessor {
                from: self.phase,
                to,
                expected,
            }),
            Signal::Trigger { epoch: Some(received), .. } if received != self.epoch => {
                Err(TransitionError::StaleEpoch {
                    current: self.epoch,
                    received,
                })
            }
            Signal::Trigger { trigger, .. }
                if trigger == self.phase.exit_trigger() && trigger != Trigger::Start =>
            {
                Ok(expected)
            }
            Signal::Trigger { .. } => Err(TransitionError::UnexpectedTrigger {
                phase: self.phase,
                signal,
                expected: self.phase.exit_trigger(),
            }),
        }
    }

    fn enter(&mut self, to: Phase, signal: Signal) -> PhaseChange {
        let from = self.phase;
        self.phase = to;
        self.epoch += 1;

        match to {
            Phase::GenreSelection => self.iteration += 1,
            Phase::Idle => self.stop_requested = false,
            _ => {}
        }
        if signal == Signal::Start {
            self.stop_requested = false;
        }

        if self.log_capacity > 0 {
            if self.log.len() == self.log_capacity {
                self.log.pop_front();
            }
            self.log.push_back(TransitionRecord {
                from,
                to,
                iteration: self.iteration,
                epoch: self.epoch,
                reason: signal.to_string(),
                at: Utc::now(),
            });
        }

        info!(
            %from,
            %to,
            iteration = self.iteration,
            epoch = self.epoch,
            %signal,
            "Phase changed"
        );

        PhaseChange {
            from,
            to,
            iteration: self.iteration,
            epoch: self.epoch,
        }
    }
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running() -> PhaseMachine {
        let mut machine = PhaseMachine::default();
        machine.advance(Signal::Start).unwrap();
        machine
    }

    #[test]
    fn test_new_machine_is_idle() {
        let machine = PhaseMachine::default();
        assert_eq!(machine.phase(), Phase::Idle);
        assert_eq!(machine.iteration(), 0);
        assert_eq!(machine.epoch(), 0);
    }

    #[test]
    fn test_start_enters_genre_selection() {
        let machine = running();
        assert_eq!(machine.phase(), Phase::GenreSelection);
        assert_eq!(machine.iteration(), 1);
        assert_eq!(machine.epoch(), 1);
    }

    #[test]
    fn test_start_twice_rejected() {
        let mut machine = running();
        let err = machine.advance(Signal::Start).unwrap_err();
        assert_eq!(
            err,
            TransitionError::AlreadyRunning {
                phase: Phase::GenreSelection
            }
        );
    }

    #[test]
    fn test_full_cycle_increments_iteration_once() {
        let mut machine = running();
        let start_iteration = machine.iteration();
        let mut visited = vec![machine.phase()];

        loop {
            let trigger = machine.phase().exit_trigger();
            let change = machine.advance(Signal::now(trigger)).unwrap();
            visited.push(change.to);
            if change.to == Phase::GenreSelection {
                break;
            }
        }

        assert_eq!(machine.iteration(), start_iteration + 1);
        assert_eq!(visited.len(), Phase::ALL.len());
        assert_eq!(&visited[..visited.len() - 1], &Phase::ALL[1..]);
    }

    #[test]
    fn test_wrong_trigger_rejected_without_state_change() {
        let mut machine = running();
        let epoch = machine.epoch();
        let err = machine
            .advance(Signal::now(Trigger::DecisionRecorded))
            .unwrap_err();
        assert!(matches!(err, TransitionError::UnexpectedTrigger { .. }));
        assert_eq!(machine.phase(), Phase::GenreSelection);
        assert_eq!(machine.epoch(), epoch);
    }

    #[test]
    fn test_move_to_only_successor() {
        let mut machine = running();
        let err = machine
            .advance(Signal::MoveTo(Phase::VoteCollection))
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError::NotSuccessor {
                from: Phase::GenreSelection,
                to: Phase::VoteCollection,
                expected: Phase::VotingAnnouncement,
            }
        );

        let change = machine
            .advance(Signal::MoveTo(Phase::VotingAnnouncement))
            .unwrap();
        assert_eq!(change.to, Phase::VotingAnnouncement);
    }

    #[test]
    fn test_move_to_from_idle_rejected() {
        let mut machine = PhaseMachine::default();
        let err = machine
            .advance(Signal::MoveTo(Phase::GenreSelection))
            .unwrap_err();
        assert_eq!(err, TransitionError::NotRunning);
    }

    #[test]
    fn test_stale_epoch_discarded() {
        let mut machine = running();
        machine.advance(Signal::now(Trigger::OptionsPublished)).unwrap();
        let announcement_epoch = machine.epoch();

        machine
            .advance(Signal::MoveTo(Phase::VoteCollection))
            .unwrap();

        // Timer scheduled during the announcement fires late.
        let err = machine
            .advance(Signal::scheduled(
                Trigger::AnnouncementElapsed,
                announcement_epoch,
            ))
            .unwrap_err();
        assert!(err.is_stale());
        assert_eq!(machine.phase(), Phase::VoteCollection);
    }

    #[test]
    fn test_stale_timer_after_stop() {
        let mut machine = running();
        machine.advance(Signal::now(Trigger::OptionsPublished)).unwrap();
        let epoch = machine.epoch();
        machine.advance(Signal::Stop).unwrap();
        machine.advance(Signal::Start).unwrap();
        machine.advance(Signal::now(Trigger::OptionsPublished)).unwrap();

        let err = machine
            .advance(Signal::scheduled(Trigger::AnnouncementElapsed, epoch))
            .unwrap_err();
        assert!(err.is_stale());
        assert_eq!(machine.phase(), Phase::VotingAnnouncement);
    }

    #[test]
    fn test_current_epoch_trigger_accepted() {
        let mut machine = running();
        machine.advance(Signal::now(Trigger::OptionsPublished)).unwrap();
        let epoch = machine.epoch();
        let change = machine
            .advance(Signal::scheduled(Trigger::AnnouncementElapsed, epoch))
            .unwrap();
        assert_eq!(change.to, Phase::VoteCollection);
        assert_eq!(change.epoch, epoch + 1);
    }

    #[test]
    fn test_stop_forces_idle() {
        let mut machine = running();
        machine.advance(Signal::now(Trigger::OptionsPublished)).unwrap();
        let change = machine.advance(Signal::Stop).unwrap();
        assert_eq!(change.from, Phase::VotingAnnouncement);
        assert_eq!(change.to, Phase::Idle);
        assert_eq!(machine.advance(Signal::Stop).unwrap_err(), TransitionError::NotRunning);
    }

    #[test]
    fn test_stop_after_iteration_settles_idle() {
        let mut machine = running();
        assert!(machine.request_stop_after_iteration());

        while machine.phase() != Phase::CleanupReset {
            let trigger = machine.phase().exit_trigger();
            machine.advance(Signal::now(trigger)).unwrap();
        }
        let change = machine
            .advance(Signal::now(Trigger::SettleElapsed))
            .unwrap();
        assert_eq!(change.to, Phase::Idle);
        assert!(!machine.stop_requested());
        assert_eq!(machine.iteration(), 1);
    }

    #[test]
    fn test_stop_request_ignored_when_idle() {
        let mut machine = PhaseMachine::default();
        assert!(!machine.request_stop_after_iteration());
    }

    #[test]
    fn test_transition_log_is_bounded() {
        let mut machine = PhaseMachine::new(3);
        machine.advance(Signal::Start).unwrap();
        for _ in 0..4 {
            let trigger = machine.phase().exit_trigger();
            machine.advance(Signal::now(trigger)).unwrap();
        }
        let log: Vec<_> = machine.transitions().collect();
        assert_eq!(log.len(), 3);
        assert_eq!(log[2].to, Phase::JudgeSelection);
        assert_eq!(log[0].from, Phase::VotingAnnouncement);
    }
}
