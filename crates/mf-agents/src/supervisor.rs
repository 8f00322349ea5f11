use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mf_core::config::FleetConfig;
use mf_core::task_store::TaskRef;
use mf_core::types::ExitOutcome;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::prompts::RESTART_INIT_MESSAGE;
use crate::shutdown::FleetStop;

/// Exit code used when the operator interrupts the fleet.
pub const INTERRUPTED_CODE: i32 = 130;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("no profiles to launch")]
    EmptyFleet,

    #[error("failed to launch worker for {profile}: {source}")]
    Launch {
        profile: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("worker i/o error: {0}")]
    Worker(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SupervisorError>;

// ---------------------------------------------------------------------------
// LaunchSpec
// ---------------------------------------------------------------------------

/// Everything a worker is started with. Restarts keep `profile`,
/// `agent_index` and `task`; only the memory flag and init message change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub profile: PathBuf,
    pub load_memory: bool,
    pub init_message: Option<String>,
    pub agent_index: usize,
    pub task: Option<TaskRef>,
}

impl LaunchSpec {
    /// The spec used to relaunch this worker after a crash.
    pub fn for_restart(&self) -> Self {
        Self {
            load_memory: true,
            init_message: Some(RESTART_INIT_MESSAGE.to_string()),
            ..self.clone()
        }
    }
}

/// The whole fleet to launch, in agent-index order.
#[derive(Debug, Clone)]
pub struct FleetPlan {
    pub profiles: Vec<PathBuf>,
    pub load_memory: bool,
    pub init_message: Option<String>,
    pub task: Option<TaskRef>,
}

impl FleetPlan {
    pub fn launch_specs(&self) -> Vec<LaunchSpec> {
        self.profiles
            .iter()
            .enumerate()
            .map(|(agent_index, profile)| LaunchSpec {
                profile: profile.clone(),
                load_memory: self.load_memory,
                init_message: self.init_message.clone(),
                agent_index,
                task: self.task.clone(),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Worker / WorkerLauncher traits
// ---------------------------------------------------------------------------

/// A running worker as seen by the supervisor.
#[async_trait]
pub trait Worker: Send {
    /// Wait for the worker to exit. `None` means it died from a signal.
    async fn wait(&mut self) -> std::io::Result<Option<i32>>;

    /// Stop the worker and reap it.
    async fn kill(&mut self) -> std::io::Result<()>;
}

/// Starts workers. The process-backed implementation is
/// [`ProcessLauncher`]; tests substitute in-memory workers.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn Worker>>;
}

// ---------------------------------------------------------------------------
// ProcessLauncher
// ---------------------------------------------------------------------------

/// Launches each worker as a child process of `program`.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    base_args: Vec<OsString>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, base_args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            base_args,
        }
    }

    /// Re-invoke the running binary, e.g. with `["worker"]` as base args.
    pub fn current_exe(base_args: Vec<OsString>) -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, base_args))
    }

    pub fn args_for(&self, spec: &LaunchSpec) -> Vec<OsString> {
        let mut args = self.base_args.clone();
        args.push("--profile".into());
        args.push(spec.profile.clone().into_os_string());
        args.push("--agent-index".into());
        args.push(spec.agent_index.to_string().into());
        if spec.load_memory {
            args.push("--load-memory".into());
        }
        if let Some(message) = &spec.init_message {
            args.push("--init-message".into());
            args.push(message.into());
        }
        if let Some(task) = &spec.task {
            args.push("--task-path".into());
            args.push(task.path.clone().into_os_string());
            args.push("--task-id".into());
            args.push(task.id.clone().into());
        }
        args
    }
}

struct ChildWorker {
    child: tokio::process::Child,
}

#[async_trait]
impl Worker for ChildWorker {
    async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        Ok(self.child.wait().await?.code())
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill().await
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn Worker>> {
        let child = tokio::process::Command::new(&self.program)
            .args(self.args_for(spec))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SupervisorError::Launch {
                profile: spec.profile.clone(),
                source,
            })?;
        debug!(pid = ?child.id(), profile = %spec.profile.display(), "worker process spawned");
        Ok(Box::new(ChildWorker { child }))
    }
}

// ---------------------------------------------------------------------------
// RestartPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    Restart,
    /// Crashed too soon after (re)starting; treat as a crash loop.
    Retire,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub min_uptime: Duration,
}

impl RestartPolicy {
    pub fn new(min_uptime: Duration) -> Self {
        Self { min_uptime }
    }

    pub fn decide(&self, uptime: Duration) -> RestartDecision {
        if uptime < self.min_uptime {
            RestartDecision::Retire
        } else {
            RestartDecision::Restart
        }
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

// ---------------------------------------------------------------------------
// FleetOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FleetEnd {
    /// A worker reported clean shutdown, task success or task timeout.
    Completed { outcome: ExitOutcome },
    /// Every worker was retired (crash loop or fatal setup failure).
    AllRetired { fatal_setup: bool },
    /// The operator stopped the fleet.
    Interrupted,
}

impl FleetEnd {
    /// The supervisor's own exit code.
    pub fn exit_code(&self) -> i32 {
        match self {
            FleetEnd::Completed { outcome } => outcome.code(),
            FleetEnd::AllRetired { fatal_setup: true } => ExitOutcome::FATAL_SETUP_CODE,
            FleetEnd::AllRetired { fatal_setup: false } => ExitOutcome::FAILURE_CODE,
            FleetEnd::Interrupted => INTERRUPTED_CODE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetOutcome {
    pub end: FleetEnd,
    pub exit_code: i32,
    pub restarts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ProcessHandle: per-worker bookkeeping
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ProcessHandle {
    spec: LaunchSpec,
    last_restart: Instant,
    alive: bool,
    /// Bumped on every relaunch so exits from replaced workers are ignored.
    generation: u64,
}

#[derive(Debug)]
struct ExitEvent {
    slot: usize,
    generation: u64,
    code: Option<i32>,
}

// ---------------------------------------------------------------------------
// FleetSupervisor
// ---------------------------------------------------------------------------

/// Launches one worker per profile, restarts crashed workers, and ends the
/// whole fleet as soon as any worker reports a fleet-wide outcome.
///
/// Exit events are consumed from a single channel one at a time, so the
/// bookkeeping below is never touched concurrently.
pub struct FleetSupervisor {
    launcher: Arc<dyn WorkerLauncher>,
    policy: RestartPolicy,
    stagger: Duration,
    stop_timeout: Duration,
    stop: FleetStop,
}

impl FleetSupervisor {
    pub fn new(launcher: Arc<dyn WorkerLauncher>) -> Self {
        Self {
            launcher,
            policy: RestartPolicy::default(),
            stagger: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(10),
            stop: FleetStop::new(),
        }
    }

    pub fn from_config(launcher: Arc<dyn WorkerLauncher>, cfg: &FleetConfig) -> Self {
        Self::new(launcher)
            .with_policy(RestartPolicy::new(cfg.min_uptime()))
            .with_stagger(cfg.launch_stagger())
    }

    pub fn with_policy(mut self, policy: RestartPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_stagger(mut self, stagger: Duration) -> Self {
        self.stagger = stagger;
        self
    }

    /// Stopping through this handle ends the fleet with [`FleetEnd::Interrupted`].
    pub fn stop_handle(&self) -> FleetStop {
        self.stop.clone()
    }

    /// Run the fleet to its end.
    pub async fn launch(&self, plan: FleetPlan) -> Result<FleetOutcome> {
        let specs = plan.launch_specs();
        if specs.is_empty() {
            return Err(SupervisorError::EmptyFleet);
        }
        let started_at = Utc::now();
        info!(workers = specs.len(), task = ?plan.task.as_ref().map(|t| &t.id), "launching fleet");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut fleet = FleetState {
            handles: Vec::with_capacity(specs.len()),
            live: 0,
            spawned: 0,
            restarts: 0,
            fatal_setup: false,
            tx,
        };
        let mut pending: VecDeque<LaunchSpec> = specs.into();
        let mut next_launch = Instant::now();

        let end = loop {
            if pending.is_empty() && fleet.live == 0 {
                error!("all agent processes have ended");
                break FleetEnd::AllRetired {
                    fatal_setup: fleet.fatal_setup,
                };
            }
            tokio::select! {
                biased;
                _ = self.stop.stopped() => {
                    warn!("fleet interrupted");
                    break FleetEnd::Interrupted;
                }
                Some(event) = rx.recv() => {
                    if let Some(end) = self.on_exit(&mut fleet, event).await {
                        break end;
                    }
                }
                _ = sleep_until(next_launch), if !pending.is_empty() => {
                    if let Some(spec) = pending.pop_front() {
                        self.launch_new(&mut fleet, spec).await;
                    }
                    next_launch = Instant::now() + self.stagger;
                }
            }
        };

        self.stop.stop();
        let released = self.stop.wait_released(fleet.spawned, self.stop_timeout).await;
        if !released.is_complete() {
            warn!(?released, "some workers did not stop in time");
        }

        let exit_code = end.exit_code();
        info!(?end, exit_code, restarts = fleet.restarts, "fleet finished");
        Ok(FleetOutcome {
            end,
            exit_code,
            restarts: fleet.restarts,
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn launch_new(&self, fleet: &mut FleetState, spec: LaunchSpec) {
        let slot = fleet.handles.len();
        fleet.handles.push(ProcessHandle {
            spec,
            last_restart: Instant::now(),
            alive: false,
            generation: 0,
        });
        match self.spawn(fleet, slot).await {
            Ok(()) => {
                fleet.handles[slot].alive = true;
                fleet.live += 1;
            }
            Err(err) => error!(error = %err, slot, "failed to start agent process"),
        }
    }

    async fn spawn(&self, fleet: &mut FleetState, slot: usize) -> Result<()> {
        let handle = &fleet.handles[slot];
        let worker = self.launcher.launch(&handle.spec).await?;
        info!(
            agent_index = handle.spec.agent_index,
            profile = %handle.spec.profile.display(),
            load_memory = handle.spec.load_memory,
            generation = handle.generation,
            "agent process started"
        );
        fleet.spawned += 1;
        tokio::spawn(watch_worker(
            worker,
            slot,
            handle.generation,
            self.stop.clone(),
            fleet.tx.clone(),
        ));
        Ok(())
    }

    /// Apply the exit taxonomy to one worker exit.
    async fn on_exit(&self, fleet: &mut FleetState, event: ExitEvent) -> Option<FleetEnd> {
        let handle = &fleet.handles[event.slot];
        if !handle.alive || handle.generation != event.generation {
            debug!(slot = event.slot, "ignoring exit of replaced worker");
            return None;
        }
        let outcome = ExitOutcome::from_code(event.code);
        let uptime = handle.last_restart.elapsed();
        info!(
            agent_index = handle.spec.agent_index,
            code = ?event.code,
            %outcome,
            uptime_secs = uptime.as_secs(),
            "agent process exited"
        );

        match outcome {
            ExitOutcome::Clean | ExitOutcome::TaskSucceeded | ExitOutcome::TaskTimedOut => {
                Some(FleetEnd::Completed { outcome })
            }
            ExitOutcome::FatalSetup => {
                warn!(agent_index = handle.spec.agent_index, "fatal setup failure, not restarting");
                fleet.retire(event.slot);
                fleet.fatal_setup = true;
                None
            }
            ExitOutcome::Crashed(_) => {
                match self.policy.decide(uptime) {
                    RestartDecision::Retire => {
                        error!(
                            profile = %handle.spec.profile.display(),
                            "agent process exited too quickly and will not be restarted"
                        );
                        fleet.retire(event.slot);
                    }
                    RestartDecision::Restart => {
                        info!(agent_index = handle.spec.agent_index, "restarting agent");
                        let handle = &mut fleet.handles[event.slot];
                        handle.spec = handle.spec.for_restart();
                        handle.generation += 1;
                        handle.last_restart = Instant::now();
                        fleet.restarts += 1;
                        if let Err(err) = self.spawn(fleet, event.slot).await {
                            error!(error = %err, "restart failed, retiring agent");
                            fleet.retire(event.slot);
                        }
                    }
                }
                None
            }
        }
    }
}

struct FleetState {
    handles: Vec<ProcessHandle>,
    live: usize,
    /// Worker incarnations started, each of which releases its hold when it ends.
    spawned: usize,
    restarts: u32,
    fatal_setup: bool,
    tx: mpsc::UnboundedSender<ExitEvent>,
}

impl FleetState {
    fn retire(&mut self, slot: usize) {
        if std::mem::replace(&mut self.handles[slot].alive, false) {
            self.live -= 1;
        }
    }
}

/// Own one worker until it exits or the fleet stops.
async fn watch_worker(
    mut worker: Box<dyn Worker>,
    slot: usize,
    generation: u64,
    stop: FleetStop,
    tx: mpsc::UnboundedSender<ExitEvent>,
) {
    let _hold = stop.hold();

    tokio::select! {
        biased;
        _ = stop.stopped() => {}
        result = worker.wait() => {
            let code = result.unwrap_or_else(|err| {
                warn!(error = %err, slot, "failed to wait on worker");
                None
            });
            let _ = tx.send(ExitEvent { slot, generation, code });
            return;
        }
    }

    if let Err(err) = worker.kill().await {
        warn!(error = %err, slot, "failed to stop worker");
    }
    debug!(slot, "worker stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_spec_keeps_identity() {
        let spec = LaunchSpec {
            profile: PathBuf::from("profiles/ann.json"),
            load_memory: false,
            init_message: Some("go".into()),
            agent_index: 1,
            task: Some(TaskRef::new("tasks.json", "iron")),
        };
        let restarted = spec.for_restart();
        assert_eq!(restarted.profile, spec.profile);
        assert_eq!(restarted.agent_index, 1);
        assert_eq!(restarted.task, spec.task);
        assert!(restarted.load_memory);
        assert_eq!(restarted.init_message.as_deref(), Some(RESTART_INIT_MESSAGE));
    }

    #[test]
    fn policy_retires_below_min_uptime() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.decide(Duration::from_secs(2)), RestartDecision::Retire);
        assert_eq!(policy.decide(Duration::from_secs(15)), RestartDecision::Restart);
        assert_eq!(policy.decide(Duration::from_secs(10)), RestartDecision::Restart);
    }

    #[test]
    fn worker_args_carry_launch_parameters() {
        let launcher = ProcessLauncher::new("/usr/bin/mf", vec!["worker".into()]);
        let spec = LaunchSpec {
            profile: PathBuf::from("andy.json"),
            load_memory: true,
            init_message: Some("hello".into()),
            agent_index: 2,
            task: Some(TaskRef::new("tasks.json", "iron")),
        };
        let args: Vec<String> = launcher
            .args_for(&spec)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "worker", "--profile", "andy.json", "--agent-index", "2", "--load-memory",
                "--init-message", "hello", "--task-path", "tasks.json", "--task-id", "iron",
            ]
        );
    }

    #[test]
    fn fleet_end_exit_codes() {
        assert_eq!(
            FleetEnd::Completed { outcome: ExitOutcome::TaskSucceeded }.exit_code(),
            2
        );
        assert_eq!(FleetEnd::AllRetired { fatal_setup: false }.exit_code(), 1);
        assert_eq!(FleetEnd::AllRetired { fatal_setup: true }.exit_code(), 4);
        assert_eq!(FleetEnd::Interrupted.exit_code(), 130);
    }
}
