use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use mf_agents::profiles::ProfileProvisioner;
use mf_agents::prompts;
use mf_agents::supervisor::{FleetPlan, FleetSupervisor, ProcessLauncher};
use mf_core::config::Config;
use mf_core::task_store::{TaskRef, TaskStore};
use mf_core::types::TaskRecord;
use tracing::{error, info};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub profiles: Vec<PathBuf>,
    pub task_path: Option<PathBuf>,
    pub task_id: Option<String>,
    pub model: Option<String>,
    pub load_memory: bool,
    pub init_message: Option<String>,
    /// Forwarded to every worker so they read the same settings.
    pub config_path: Option<PathBuf>,
    pub json_logs: bool,
}

/// Resolve the task up front so a bad path or id fails before anything is
/// launched.
fn resolve_task(opts: &RunOptions) -> anyhow::Result<Option<(TaskRef, TaskRecord)>> {
    let (Some(path), Some(id)) = (&opts.task_path, &opts.task_id) else {
        return Ok(None);
    };
    let store = TaskStore::load(path)?;
    let record = store
        .get(id)
        .with_context(|| format!("in task collection {}", path.display()))?
        .clone();
    Ok(Some((TaskRef::new(path, id), record)))
}

/// Build the fleet plan: profiles, init message and memory flag.
pub fn plan(opts: &RunOptions, config: &Config) -> anyhow::Result<FleetPlan> {
    let task = resolve_task(opts)?;
    let record = task.as_ref().map(|(_, record)| record);

    let defaults = if opts.profiles.is_empty() {
        config.fleet.profiles.clone()
    } else {
        opts.profiles.clone()
    };
    let profiles = ProfileProvisioner::new(
        defaults,
        &config.fleet.multiagent_template,
        &config.fleet.profile_dir,
    )
    .with_model_override(opts.model.clone())
    .materialize(record)
    .context("failed to prepare agent profiles")?;

    let configured = opts
        .init_message
        .as_deref()
        .or(config.fleet.init_message.as_deref());

    Ok(FleetPlan {
        profiles,
        load_memory: opts.load_memory || config.fleet.load_memory,
        init_message: prompts::init_message_for(record, configured),
        task: task.map(|(task_ref, _)| task_ref),
    })
}

/// Arguments that put a re-invoked `mf` into worker mode.
pub fn worker_base_args(opts: &RunOptions) -> Vec<OsString> {
    let mut args = Vec::new();
    if let Some(path) = &opts.config_path {
        args.push("--config".into());
        args.push(path.clone().into_os_string());
    }
    if opts.json_logs {
        args.push("--json-logs".into());
    }
    args.push("worker".into());
    args
}

/// Run the `run` subcommand; returns the fleet's exit code.
pub async fn run(opts: RunOptions, config: &Config) -> anyhow::Result<i32> {
    let plan = plan(&opts, config)?;
    info!(
        agents = plan.profiles.len(),
        task = ?plan.task.as_ref().map(|t| t.id.as_str()),
        "starting fleet"
    );

    let launcher = ProcessLauncher::current_exe(worker_base_args(&opts))
        .context("cannot locate the mf binary")?;
    let supervisor = FleetSupervisor::from_config(Arc::new(launcher), &config.fleet);

    // Wire ctrl-c to stop the fleet.
    let stop = supervisor.stop_handle();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, stopping fleet");
        stop.stop();
    });

    let outcome = supervisor.launch(plan).await?;
    if let Ok(summary) = serde_json::to_string(&outcome) {
        info!(%summary, "fleet outcome");
    }
    Ok(outcome.exit_code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mf_agents::prompts::{SOLO_TASK_INIT_MESSAGE, TEAM_TASK_INIT_MESSAGE};

    const TASKS: &str = r#"{
        "solo": {"goal": "Collect wood"},
        "pair": {"goal": "Collect iron", "agent_count": 2, "agent_names": ["Ann", "Bob"]}
    }"#;

    fn setup() -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tasks.json"), TASKS).unwrap();
        std::fs::write(
            dir.path().join("template.json"),
            r#"{"name": "template", "model": "gpt-4o"}"#,
        )
        .unwrap();
        let mut config = Config::default();
        config.fleet.profiles = vec![dir.path().join("andy.json")];
        config.fleet.multiagent_template = dir.path().join("template.json");
        config.fleet.profile_dir = dir.path().join("profiles");
        (dir, config)
    }

    #[test]
    fn unknown_task_fails_before_launch() {
        let (dir, config) = setup();
        let opts = RunOptions {
            task_path: Some(dir.path().join("tasks.json")),
            task_id: Some("missing".into()),
            ..Default::default()
        };
        assert!(plan(&opts, &config).is_err());
    }

    #[test]
    fn solo_task_uses_default_profiles() {
        let (dir, config) = setup();
        let opts = RunOptions {
            task_path: Some(dir.path().join("tasks.json")),
            task_id: Some("solo".into()),
            ..Default::default()
        };
        let plan = plan(&opts, &config).unwrap();
        assert_eq!(plan.profiles, config.fleet.profiles);
        assert_eq!(plan.init_message.as_deref(), Some(SOLO_TASK_INIT_MESSAGE));
        assert_eq!(plan.task.unwrap().id, "solo");
    }

    #[test]
    fn team_task_materializes_one_profile_per_agent() {
        let (dir, config) = setup();
        let opts = RunOptions {
            task_path: Some(dir.path().join("tasks.json")),
            task_id: Some("pair".into()),
            ..Default::default()
        };
        let plan = plan(&opts, &config).unwrap();
        assert_eq!(plan.profiles.len(), 2);
        assert_eq!(plan.init_message.as_deref(), Some(TEAM_TASK_INIT_MESSAGE));
    }

    #[test]
    fn no_task_keeps_operator_message() {
        let (_dir, config) = setup();
        let opts = RunOptions {
            init_message: Some("hello".into()),
            load_memory: true,
            ..Default::default()
        };
        let plan = plan(&opts, &config).unwrap();
        assert_eq!(plan.init_message.as_deref(), Some("hello"));
        assert!(plan.load_memory);
        assert!(plan.task.is_none());
    }

    #[test]
    fn worker_args_forward_config() {
        let opts = RunOptions {
            config_path: Some(PathBuf::from("/etc/mf.toml")),
            json_logs: true,
            ..Default::default()
        };
        let args: Vec<String> = worker_base_args(&opts)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, vec!["--config", "/etc/mf.toml", "--json-logs", "worker"]);
    }
}
