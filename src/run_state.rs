//! Acquisition run state.
//!
//! A run moves through a single state machine instead of a set of loose
//! `stop`/`pause` booleans:
//!
//! ```text
//!   Idle --start--> Running <--resume/pause--> Paused
//!                      |                          |
//!                      +----------stop------------+
//!                                  v
//!                              Stopping --finish--> Stopped
//! ```
//!
//! The measurement loop also uses `finish` directly from `Running`/`Paused`
//! when it ends on its own (finite sequence or fatal instrument error).

use crate::error::{AppResult, GalileoError};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;

/// Lifecycle of one acquisition run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// Created, instruments not started yet
    Idle,
    /// Ticking
    Running,
    /// Suspended, resumable
    Paused,
    /// Stop requested, loop is draining the logger and running finish hooks
    Stopping,
    /// Permanently halted
    Stopped,
}

/// Requests that move a run between states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunTransition {
    /// Begin ticking
    Start,
    /// Suspend ticking
    Pause,
    /// Continue after a pause
    Resume,
    /// Ask the loop to shut down
    Stop,
    /// The loop has shut down
    Finish,
}

impl RunState {
    /// Applies `transition`, returning the next state or an error if the
    /// transition table forbids it.
    ///
    /// Repeating `pause` while paused or `resume` while running is accepted
    /// and leaves the state unchanged.
    pub fn apply(self, transition: RunTransition) -> AppResult<RunState> {
        use RunState::*;
        use RunTransition::*;

        let next = match (self, transition) {
            (Idle, Start) => Running,
            (Running | Paused, Pause) => Paused,
            (Running | Paused, Resume) => Running,
            (Running | Paused, Stop) => Stopping,
            (Stopping, Stop) => Stopping,
            (Idle, Stop) => Stopped,
            (Running | Paused | Stopping, Finish) => Stopped,
            (from, transition) => {
                return Err(GalileoError::InvalidTransition { from, transition });
            }
        };
        Ok(next)
    }

    /// True once the run can no longer produce samples.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Stopping | RunState::Stopped)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Paused => "paused",
            RunState::Stopping => "stopping",
            RunState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

impl fmt::Display for RunTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunTransition::Start => "start",
            RunTransition::Pause => "pause",
            RunTransition::Resume => "resume",
            RunTransition::Stop => "stop",
            RunTransition::Finish => "finish",
        };
        f.write_str(name)
    }
}

/// Shared run state. Every accepted transition is published to subscribers.
#[derive(Debug)]
pub struct RunControl {
    tx: watch::Sender<RunState>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    /// Starts in [`RunState::Idle`].
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(RunState::Idle);
        Self { tx }
    }

    /// Current state.
    pub fn get(&self) -> RunState {
        *self.tx.borrow()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.tx.subscribe()
    }

    /// Applies `transition` atomically and returns the new state.
    pub fn apply(&self, transition: RunTransition) -> AppResult<RunState> {
        let mut outcome = Ok(RunState::Idle);
        self.tx.send_if_modified(|state| match state.apply(transition) {
            Ok(next) => {
                let changed = next != *state;
                *state = next;
                outcome = Ok(next);
                changed
            }
            Err(err) => {
                outcome = Err(err);
                false
            }
        });
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::RunState::*;
    use super::RunTransition::*;
    use super::*;

    #[test]
    fn test_happy_path() {
        let state = Idle.apply(Start).unwrap();
        assert_eq!(state, Running);
        let state = state.apply(Pause).unwrap();
        assert_eq!(state, Paused);
        let state = state.apply(Resume).unwrap();
        assert_eq!(state, Running);
        let state = state.apply(Stop).unwrap();
        assert_eq!(state, Stopping);
        assert_eq!(state.apply(Finish).unwrap(), Stopped);
    }

    #[test]
    fn test_stopped_is_final() {
        for t in [Start, Pause, Resume, Stop, Finish] {
            assert!(Stopped.apply(t).is_err(), "{t} should be rejected");
        }
    }

    #[test]
    fn test_repeated_pause_and_resume_are_idempotent() {
        assert_eq!(Paused.apply(Pause).unwrap(), Paused);
        assert_eq!(Running.apply(Resume).unwrap(), Running);
    }

    #[test]
    fn test_stop_from_pause_skips_resume() {
        assert_eq!(Paused.apply(Stop).unwrap(), Stopping);
    }

    #[test]
    fn test_idle_cannot_pause() {
        let err = Idle.apply(Pause).unwrap_err();
        assert!(matches!(
            err,
            GalileoError::InvalidTransition {
                from: Idle,
                transition: Pause
            }
        ));
    }

    #[tokio::test]
    async fn test_control_publishes_changes() {
        let control = RunControl::new();
        let mut rx = control.subscribe();
        assert_eq!(control.apply(Start).unwrap(), Running);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Running);

        // Idempotent transitions do not notify.
        control.apply(Resume).unwrap();
        assert!(!rx.has_changed().unwrap());

        assert!(control.apply(Start).is_err());
        assert_eq!(control.get(), Running);
    }

    #[test]
    fn test_terminal_states() {
        assert!(Stopping.is_terminal());
        assert!(Stopped.is_terminal());
        assert!(!Paused.is_terminal());
    }
}
