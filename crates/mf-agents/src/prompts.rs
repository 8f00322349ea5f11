//! Fixed messages handed to a worker's decision loop at startup.

use mf_core::types::TaskRecord;

/// First prompt for a single agent working a task alone.
pub const SOLO_TASK_INIT_MESSAGE: &str = "Announce your task to everyone and get started with it immediately, if cheats are enabled then feel free to use newAction commands, no need to collect or mine or gather any items";

/// First prompt for each agent of a cooperative task.
pub const TEAM_TASK_INIT_MESSAGE: &str = "Immediately start a conversation with other agents and collaborate together to complete the task. Share resources and skill sets.";

/// Replaces the init message when a crashed worker is relaunched.
pub const RESTART_INIT_MESSAGE: &str = "Agent process restarted.";

/// Pick the init message for a fleet run.
///
/// A task always decides the message; without one the operator's configured
/// message (if any) is used.
pub fn init_message_for(task: Option<&TaskRecord>, configured: Option<&str>) -> Option<String> {
    match task {
        Some(t) if t.is_multi_agent() => Some(TEAM_TASK_INIT_MESSAGE.to_string()),
        Some(_) => Some(SOLO_TASK_INIT_MESSAGE.to_string()),
        None => configured.map(str::to_string),
    }
}
