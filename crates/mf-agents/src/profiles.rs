use std::path::{Path, PathBuf};

use mf_core::types::TaskRecord;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("failed to read profile {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse profile {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write profile {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ProfileError>;

// ---------------------------------------------------------------------------
// AgentProfile
// ---------------------------------------------------------------------------

/// Configuration artifact read by a worker at startup.
///
/// Only the identity (`name`), the model and the behaviour template
/// (`conversing`) are interpreted here; every other field is carried through
/// untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub name: String,
    /// Either a model name or a provider-specific object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversing: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AgentProfile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ProfileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ProfileError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let write_err = |source| ProfileError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(write_err)?;
            }
        }
        let text = serde_json::to_string_pretty(self).map_err(|source| ProfileError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, text).map_err(write_err)
    }
}

// ---------------------------------------------------------------------------
// ProfileProvisioner
// ---------------------------------------------------------------------------

/// Produces the ordered list of profiles a fleet is launched with.
#[derive(Debug, Clone)]
pub struct ProfileProvisioner {
    defaults: Vec<PathBuf>,
    template: PathBuf,
    out_dir: PathBuf,
    model_override: Option<String>,
}

impl ProfileProvisioner {
    pub fn new(defaults: Vec<PathBuf>, template: impl Into<PathBuf>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            defaults,
            template: template.into(),
            out_dir: out_dir.into(),
            model_override: None,
        }
    }

    /// Launch every profile with `model` instead of its own.
    pub fn with_model_override(mut self, model: Option<String>) -> Self {
        self.model_override = model;
        self
    }

    /// Resolve the profiles for a run, index 0 first.
    ///
    /// Multi-agent tasks get one fresh copy of the template per agent name,
    /// in `agent_names` order. Everything else uses the default profile set;
    /// with a model override those are copied too, so the operator's files
    /// are never rewritten.
    pub fn materialize(&self, task: Option<&TaskRecord>) -> Result<Vec<PathBuf>> {
        match task {
            Some(t) if t.is_multi_agent() => {
                let template = AgentProfile::load(&self.template)?;
                t.agent_names
                    .iter()
                    .map(|name| {
                        let mut profile = template.clone();
                        profile.name = name.clone();
                        self.write_copy(profile, &format!("task_{name}"))
                    })
                    .collect()
            }
            _ if self.model_override.is_some() => self
                .defaults
                .iter()
                .map(|path| {
                    let profile = AgentProfile::load(path)?;
                    let stem = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .unwrap_or("profile")
                        .to_string();
                    self.write_copy(profile, &stem)
                })
                .collect(),
            _ => Ok(self.defaults.clone()),
        }
    }

    fn write_copy(&self, mut profile: AgentProfile, stem: &str) -> Result<PathBuf> {
        if let Some(model) = &self.model_override {
            profile.model = Some(Value::String(model.clone()));
        }
        let suffix = Uuid::new_v4().simple().to_string();
        let path = self.out_dir.join(format!("{stem}_{}.json", &suffix[..8]));
        profile.save(&path)?;
        tracing::debug!(name = %profile.name, path = %path.display(), "profile materialized");
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
