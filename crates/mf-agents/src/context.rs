use mf_core::types::Inventory;
use serde::{Deserialize, Serialize};

use crate::lifecycle::TaskLifecycle;

/// Everything the decision loop needs to know about its task, fixed at
/// worker startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskContext {
    pub agent_name: String,
    pub agent_index: usize,
    pub task_id: Option<String>,
    pub goal: Option<String>,
    pub initial_inventory: Option<Inventory>,
    /// Every agent taking part in the task, this one included.
    pub agent_names: Vec<String>,
    pub blocked_actions: Vec<String>,
    pub load_memory: bool,
    pub init_message: Option<String>,
}

impl TaskContext {
    pub fn new(lifecycle: &TaskLifecycle, load_memory: bool, init_message: Option<String>) -> Self {
        let task = lifecycle.task();
        let agent_names = match task {
            Some(t) if t.is_multi_agent() => t.agent_names.clone(),
            _ => vec![lifecycle.agent_name().to_string()],
        };
        Self {
            agent_name: lifecycle.agent_name().to_string(),
            agent_index: lifecycle.agent_index(),
            task_id: task.map(|t| t.id.clone()),
            goal: lifecycle.goal().map(str::to_string),
            initial_inventory: lifecycle.initial_inventory().cloned(),
            agent_names,
            blocked_actions: lifecycle.blocked_actions().to_vec(),
            load_memory,
            init_message,
        }
    }
}
