use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// TaskState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Unstarted,
    Initializing,
    Active,
    Succeeded,
    TimedOut,
    FatalSetupFailure,
}

impl TaskState {
    /// Terminal states are sticky: no event moves a task out of them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::TimedOut | TaskState::FatalSetupFailure
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskState::Unstarted => "Unstarted",
            TaskState::Initializing => "Initializing",
            TaskState::Active => "Active",
            TaskState::Succeeded => "Succeeded",
            TaskState::TimedOut => "TimedOut",
            TaskState::FatalSetupFailure => "FatalSetupFailure",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// TaskEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEvent {
    BeginSetup,
    SetupComplete,
    SetupFailed,
    Validated,
    DeadlineElapsed,
}

impl fmt::Display for TaskEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskEvent::BeginSetup => "BeginSetup",
            TaskEvent::SetupComplete => "SetupComplete",
            TaskEvent::SetupFailed => "SetupFailed",
            TaskEvent::Validated => "Validated",
            TaskEvent::DeadlineElapsed => "DeadlineElapsed",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// An event was applied in a state that does not accept it.
#[derive(Debug, thiserror::Error)]
pub enum StateMachineError {
    #[error("invalid transition: cannot apply {event} in state {state}")]
    InvalidTransition { state: TaskState, event: TaskEvent },
}

// ---------------------------------------------------------------------------
// TaskStateMachine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TaskStateMachine {
    current: TaskState,
    history: Vec<(TaskState, TaskEvent, TaskState)>,
}

impl TaskStateMachine {
    /// Create a new state machine starting in `Unstarted`.
    pub fn new() -> Self {
        Self {
            current: TaskState::Unstarted,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> TaskState {
        self.current
    }

    pub fn history(&self) -> &[(TaskState, TaskEvent, TaskState)] {
        &self.history
    }

    /// Attempt a state transition driven by `event`.
    ///
    /// Valid transitions:
    /// - Unstarted    + BeginSetup      -> Initializing
    /// - Initializing + SetupComplete   -> Active
    /// - Initializing + SetupFailed     -> FatalSetupFailure
    /// - Initializing + DeadlineElapsed -> TimedOut
    /// - Unstarted    + Validated       -> Succeeded
    /// - Unstarted    + DeadlineElapsed -> TimedOut
    /// - Active       + Validated       -> Succeeded
    /// - Active       + DeadlineElapsed -> TimedOut
    ///
    /// Completion is checked from the first control cycle, which may run
    /// before setup has been kicked off; hence the Unstarted exits.
    pub fn transition(&mut self, event: TaskEvent) -> Result<TaskState, StateMachineError> {
        let next = match (self.current, event) {
            (TaskState::Unstarted, TaskEvent::BeginSetup) => TaskState::Initializing,
            (TaskState::Initializing, TaskEvent::SetupComplete) => TaskState::Active,
            (TaskState::Initializing, TaskEvent::SetupFailed) => TaskState::FatalSetupFailure,
            (TaskState::Initializing, TaskEvent::DeadlineElapsed) => TaskState::TimedOut,
            (TaskState::Unstarted, TaskEvent::Validated) => TaskState::Succeeded,
            (TaskState::Unstarted, TaskEvent::DeadlineElapsed) => TaskState::TimedOut,
            (TaskState::Active, TaskEvent::Validated) => TaskState::Succeeded,
            (TaskState::Active, TaskEvent::DeadlineElapsed) => TaskState::TimedOut,
            _ => {
                return Err(StateMachineError::InvalidTransition {
                    state: self.current,
                    event,
                });
            }
        };

        let from = self.current;
        self.current = next;
        self.history.push((from, event, next));
        tracing::debug!(from = %from, event = %event, to = %next, "task state transition");
        Ok(next)
    }

    /// Returns `true` if the given event is valid in the current state.
    pub fn can_transition(&self, event: TaskEvent) -> bool {
        matches!(
            (self.current, event),
            (TaskState::Unstarted, TaskEvent::BeginSetup)
                | (TaskState::Initializing, TaskEvent::SetupComplete)
                | (TaskState::Initializing, TaskEvent::SetupFailed)
                | (TaskState::Initializing, TaskEvent::DeadlineElapsed)
                | (TaskState::Unstarted, TaskEvent::Validated)
                | (TaskState::Unstarted, TaskEvent::DeadlineElapsed)
                | (TaskState::Active, TaskEvent::Validated)
                | (TaskState::Active, TaskEvent::DeadlineElapsed)
        )
    }
}

impl Default for TaskStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
