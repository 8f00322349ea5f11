use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::types::TaskRecord;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Configuration errors raised while resolving a task definition.
///
/// None of these are recoverable at runtime: they mean the operator pointed
/// the fleet at a missing file, an unknown id or a malformed record.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("failed to read task file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse task file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("task {0} not found")]
    NotFound(String),

    #[error("task {id} is malformed: {reason}")]
    Malformed { id: String, reason: String },
}

pub type Result<T> = std::result::Result<T, TaskError>;

// ---------------------------------------------------------------------------
// TaskRef
// ---------------------------------------------------------------------------

/// Pointer to a task: the collection file plus the id inside it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TaskRef {
    pub path: PathBuf,
    pub id: String,
}

impl TaskRef {
    pub fn new(path: impl Into<PathBuf>, id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            id: id.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// TaskStore
// ---------------------------------------------------------------------------

/// Read-only task collection, loaded once per process.
#[derive(Debug, Clone, Default)]
pub struct TaskStore {
    tasks: BTreeMap<String, TaskRecord>,
}

impl TaskStore {
    /// Load and check every record in the collection at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| TaskError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let store = Self::from_json(&text).map_err(|err| match err {
            TaskError::Parse { source, .. } => TaskError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        tracing::debug!(path = %path.display(), tasks = store.len(), "task collection loaded");
        Ok(store)
    }

    /// Parse a collection from its JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        let mut tasks: BTreeMap<String, TaskRecord> =
            serde_json::from_str(text).map_err(|source| TaskError::Parse {
                path: PathBuf::new(),
                source,
            })?;
        for (id, record) in tasks.iter_mut() {
            record.id = id.clone();
            record.check().map_err(|reason| TaskError::Malformed {
                id: id.clone(),
                reason,
            })?;
        }
        Ok(Self { tasks })
    }

    pub fn get(&self, id: &str) -> Result<&TaskRecord> {
        self.tasks
            .get(id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))
    }

    /// Resolve the task bound to `agent_index`.
    ///
    /// Single-agent tasks belong to agent 0 only; every other index gets
    /// `None`.
    pub fn resolve(&self, id: &str, agent_index: usize) -> Result<Option<TaskRecord>> {
        let record = self.get(id)?;
        if !record.is_multi_agent() && agent_index > 0 {
            tracing::info!(task = id, agent_index, "single-agent task not bound to this agent");
            return Ok(None);
        }
        Ok(Some(record.clone()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    pub fn records(&self) -> impl Iterator<Item = &TaskRecord> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
