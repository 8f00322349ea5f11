use mf_agents::state_machine::{TaskEvent, TaskState, TaskStateMachine};

#[test]
fn unstarted_to_initializing_to_active() {
    let mut sm = TaskStateMachine::new();
    assert_eq!(sm.state(), TaskState::Unstarted);

    let s = sm.transition(TaskEvent::BeginSetup).unwrap();
    assert_eq!(s, TaskState::Initializing);

    let s = sm.transition(TaskEvent::SetupComplete).unwrap();
    assert_eq!(s, TaskState::Active);
    assert_eq!(sm.state(), TaskState::Active);
}

#[test]
fn setup_complete_before_begin_is_rejected() {
    let mut sm = TaskStateMachine::new();
    assert!(sm.transition(TaskEvent::SetupComplete).is_err());
    // State should remain Unstarted after a rejected transition.
    assert_eq!(sm.state(), TaskState::Unstarted);
}

#[test]
fn full_run_to_success() {
    let mut sm = TaskStateMachine::new();
    sm.transition(TaskEvent::BeginSetup).unwrap();
    sm.transition(TaskEvent::SetupComplete).unwrap();
    let s = sm.transition(TaskEvent::Validated).unwrap();
    assert_eq!(s, TaskState::Succeeded);
    assert_eq!(sm.history().len(), 3);
}

#[test]
fn setup_failure_is_fatal() {
    let mut sm = TaskStateMachine::new();
    sm.transition(TaskEvent::BeginSetup).unwrap();
    let s = sm.transition(TaskEvent::SetupFailed).unwrap();
    assert_eq!(s, TaskState::FatalSetupFailure);
    assert!(s.is_terminal());
}

#[test]
fn deadline_can_fire_during_setup() {
    let mut sm = TaskStateMachine::new();
    sm.transition(TaskEvent::BeginSetup).unwrap();
    assert_eq!(sm.transition(TaskEvent::DeadlineElapsed).unwrap(), TaskState::TimedOut);
}

#[test]
fn first_cycle_may_finish_before_setup() {
    let mut sm = TaskStateMachine::new();
    assert_eq!(sm.transition(TaskEvent::Validated).unwrap(), TaskState::Succeeded);

    let mut sm = TaskStateMachine::new();
    assert_eq!(sm.transition(TaskEvent::DeadlineElapsed).unwrap(), TaskState::TimedOut);
}

#[test]
fn terminal_states_are_sticky() {
    let events = [
        TaskEvent::BeginSetup,
        TaskEvent::SetupComplete,
        TaskEvent::SetupFailed,
        TaskEvent::Validated,
        TaskEvent::DeadlineElapsed,
    ];

    let mut sm = TaskStateMachine::new();
    sm.transition(TaskEvent::DeadlineElapsed).unwrap();
    for event in events {
        assert!(!sm.can_transition(event));
        assert!(sm.transition(event).is_err());
    }
    assert_eq!(sm.state(), TaskState::TimedOut);
}

#[test]
fn history_records_each_step() {
    let mut sm = TaskStateMachine::new();
    sm.transition(TaskEvent::BeginSetup).unwrap();
    sm.transition(TaskEvent::SetupComplete).unwrap();

    let history = sm.history();
    assert_eq!(
        history[0],
        (TaskState::Unstarted, TaskEvent::BeginSetup, TaskState::Initializing)
    );
    assert_eq!(
        history[1],
        (TaskState::Initializing, TaskEvent::SetupComplete, TaskState::Active)
    );
}

#[test]
fn state_display() {
    assert_eq!(TaskState::FatalSetupFailure.to_string(), "FatalSetupFailure");
    assert_eq!(TaskState::Active.to_string(), "Active");
}
