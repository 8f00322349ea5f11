use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::blueprint;

/// Item id -> quantity.
pub type Inventory = BTreeMap<String, u32>;

// ---------------------------------------------------------------------------
// TaskKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Construction,
    /// Any task type without special handling (`cooking`, `crafting`, ...).
    #[default]
    #[serde(other)]
    Generic,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskKind::Generic => "generic",
            TaskKind::Construction => "construction",
        };
        f.pad(label)
    }
}

// ---------------------------------------------------------------------------
// Blueprint
// ---------------------------------------------------------------------------

/// One storey of a construction plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlueprintLevel {
    pub level: i64,
    /// Origin of the level as `[x, y, z]`.
    pub coordinates: [i64; 3],
    /// Rows of cells, each cell an item id (or `"air"`).
    pub placement: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blueprint {
    pub levels: Vec<BlueprintLevel>,
}

// ---------------------------------------------------------------------------
// InitialInventory
// ---------------------------------------------------------------------------

/// Starting inventory as it appears in the task collection.
///
/// Single-agent tasks use a flat mapping; multi-agent tasks key one mapping
/// per agent index (`"0"`, `"1"`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InitialInventory {
    Flat(Inventory),
    PerAgent(BTreeMap<String, Inventory>),
}

impl InitialInventory {
    /// Select the inventory granted to `agent_index`.
    ///
    /// A per-agent mapping on a single-agent task falls back to the entry
    /// keyed `"0"`.
    pub fn for_agent(&self, agent_index: usize, multi_agent: bool) -> Option<&Inventory> {
        match (self, multi_agent) {
            (InitialInventory::Flat(items), false) => Some(items),
            (InitialInventory::Flat(_), true) => None,
            (InitialInventory::PerAgent(by_index), true) => by_index.get(&agent_index.to_string()),
            (InitialInventory::PerAgent(by_index), false) => by_index.get("0"),
        }
    }
}

// ---------------------------------------------------------------------------
// TaskRecord
// ---------------------------------------------------------------------------

/// A task definition as stored in the task collection file.
///
/// Field names follow the on-disk JSON layout; the record is immutable once
/// loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Filled in from the collection key at load time.
    #[serde(skip)]
    pub id: String,
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: TaskKind,
    #[serde(default)]
    pub blueprint: Option<Blueprint>,
    #[serde(default, rename = "target")]
    pub target_item: Option<String>,
    #[serde(default, rename = "number_of_target")]
    pub target_count: Option<u32>,
    #[serde(default, rename = "timeout")]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub initial_inventory: Option<InitialInventory>,
    #[serde(default = "default_agent_count")]
    pub agent_count: usize,
    #[serde(default)]
    pub agent_names: Vec<String>,
    #[serde(default, rename = "conversation")]
    pub conversation_seed: Option<String>,
    #[serde(default)]
    pub blocked_actions: Vec<String>,
}

fn default_agent_count() -> usize {
    1
}

impl TaskRecord {
    /// The goal as shown to an agent. Construction tasks get their blueprint
    /// rendered after the goal text.
    pub fn rendered_goal(&self) -> Option<String> {
        match (&self.kind, &self.blueprint) {
            (TaskKind::Construction, Some(bp)) => {
                Some(blueprint::goal_with_blueprint(self.goal.as_deref(), bp))
            }
            _ => self.goal.clone(),
        }
    }

    /// Returns `true` when more than one cooperating agent is required.
    pub fn is_multi_agent(&self) -> bool {
        self.agent_count > 1
    }

    /// Structural checks that serde cannot express.
    pub fn check(&self) -> Result<(), String> {
        if self.is_multi_agent() {
            if self.agent_names.len() != self.agent_count {
                return Err(format!(
                    "agent_count is {} but {} agent_names are listed",
                    self.agent_count,
                    self.agent_names.len()
                ));
            }
            if matches!(self.initial_inventory, Some(InitialInventory::Flat(ref items)) if !items.is_empty())
            {
                return Err(
                    "multi-agent tasks must key initial_inventory by agent index".to_string(),
                );
            }
        }
        if self.target_item.is_some() != self.target_count.is_some() {
            return Err("target and number_of_target must be given together".to_string());
        }
        if self.timeout_secs == Some(0) {
            return Err("timeout must be greater than zero".to_string());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ExitOutcome
// ---------------------------------------------------------------------------

/// What a worker process tells its supervisor through its exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitOutcome {
    Clean,
    TaskSucceeded,
    TaskTimedOut,
    FatalSetup,
    /// Any other code. `None` means the process was killed by a signal.
    Crashed(Option<i32>),
}

impl ExitOutcome {
    pub const CLEAN_CODE: i32 = 0;
    pub const SUCCESS_CODE: i32 = 2;
    pub const TIMEOUT_CODE: i32 = 3;
    pub const FATAL_SETUP_CODE: i32 = 4;
    /// Used for crashes and configuration errors alike.
    pub const FAILURE_CODE: i32 = 1;

    pub fn from_code(code: Option<i32>) -> Self {
        match code {
            Some(Self::CLEAN_CODE) => ExitOutcome::Clean,
            Some(Self::SUCCESS_CODE) => ExitOutcome::TaskSucceeded,
            Some(Self::TIMEOUT_CODE) => ExitOutcome::TaskTimedOut,
            Some(Self::FATAL_SETUP_CODE) => ExitOutcome::FatalSetup,
            other => ExitOutcome::Crashed(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            ExitOutcome::Clean => Self::CLEAN_CODE,
            ExitOutcome::TaskSucceeded => Self::SUCCESS_CODE,
            ExitOutcome::TaskTimedOut => Self::TIMEOUT_CODE,
            ExitOutcome::FatalSetup => Self::FATAL_SETUP_CODE,
            ExitOutcome::Crashed(code) => code.unwrap_or(Self::FAILURE_CODE),
        }
    }

    /// Outcomes that end the whole fleet as soon as one worker reports them.
    pub fn ends_fleet(&self) -> bool {
        matches!(
            self,
            ExitOutcome::Clean | ExitOutcome::TaskSucceeded | ExitOutcome::TaskTimedOut
        )
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Clean => write!(f, "clean shutdown"),
            ExitOutcome::TaskSucceeded => write!(f, "task succeeded"),
            ExitOutcome::TaskTimedOut => write!(f, "task timed out"),
            ExitOutcome::FatalSetup => write!(f, "fatal setup failure"),
            ExitOutcome::Crashed(Some(code)) => write!(f, "crashed with code {}", code),
            ExitOutcome::Crashed(None) => write!(f, "killed by signal"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
