//! One agent process: binds the task, hosts the decision-loop runtime and
//! reports how the run ended through its exit code.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use mf_core::config::Config;
use mf_core::task_store::TaskRef;
use mf_core::types::ExitOutcome;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::bridge::{BridgeError, RuntimeBridge};
use crate::context::TaskContext;
use crate::lifecycle::{LifecycleError, LifecycleSettings, TaskLifecycle};
use crate::profiles::{AgentProfile, ProfileError};
use crate::relay::{AgentRegistration, RelayClient};
use crate::world::WorldCapabilities;

const RUNTIME_STOP_GRACE: Duration = Duration::from_secs(2);

/// Errors that keep a worker from hosting its task. The worker exits 1 on
/// any of them.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Task(#[from] LifecycleError),

    #[error(transparent)]
    Runtime(#[from] BridgeError),

    #[error("failed to reap runtime: {0}")]
    Reap(#[from] std::io::Error),
}

/// Launch parameters handed down by the supervisor.
#[derive(Debug, Clone)]
pub struct WorkerArgs {
    pub profile: PathBuf,
    pub agent_index: usize,
    pub load_memory: bool,
    pub init_message: Option<String>,
    pub task: Option<TaskRef>,
}

/// How hosting a task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEnd {
    /// The task reached a terminal status.
    Terminal(ExitOutcome),
    /// The runtime went away first.
    RuntimeExited,
}

/// Run setup, then poll for a terminal status every `poll` until one is
/// reached or `runtime_closed` resolves.
pub async fn host_task<F>(
    lifecycle: &mut TaskLifecycle,
    world: &dyn WorldCapabilities,
    poll: Duration,
    runtime_closed: F,
) -> HostEnd
where
    F: Future<Output = ()>,
{
    tokio::pin!(runtime_closed);

    let setup = tokio::select! {
        result = lifecycle.initialize(world) => result,
        _ = &mut runtime_closed => return HostEnd::RuntimeExited,
    };
    if let Err(err) = setup {
        error!(agent = %lifecycle.agent_name(), error = %err, "task setup failed");
        return HostEnd::Terminal(err.exit_outcome());
    }

    let mut ticker = interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = &mut runtime_closed => return HostEnd::RuntimeExited,
            _ = ticker.tick() => {
                if let Some(outcome) = lifecycle.is_done(world).await.exit_outcome() {
                    return HostEnd::Terminal(outcome);
                }
            }
        }
    }
}

/// Map the runtime's own exit status to the worker's outcome.
pub fn runtime_exit_outcome(code: Option<i32>) -> ExitOutcome {
    match code {
        Some(0) => ExitOutcome::Clean,
        _ => ExitOutcome::Crashed(Some(1)),
    }
}

/// Full worker run. `Err` means the worker could not start its task.
pub async fn run_worker(args: WorkerArgs, config: &Config) -> Result<ExitOutcome, WorkerError> {
    let profile = AgentProfile::load(&args.profile)?;
    let settings = LifecycleSettings::from(&config.task);

    let mut lifecycle = match &args.task {
        Some(task) => TaskLifecycle::from_task_ref(task, args.agent_index, &profile.name, settings)?,
        None => TaskLifecycle::new(None, args.agent_index, &profile.name, settings),
    };
    let context = TaskContext::new(&lifecycle, args.load_memory, args.init_message.clone());
    info!(
        agent = %profile.name,
        index = args.agent_index,
        task = ?context.task_id,
        load_memory = args.load_memory,
        "worker starting"
    );

    if let Some(url) = &config.relay.url {
        RelayClient::new(url)
            .register(&AgentRegistration::new(&profile.name, args.agent_index))
            .await;
    }

    let bridge = RuntimeBridge::spawn(&config.runtime.command, &args.profile, &context).await?;
    let poll = Duration::from_millis(config.task.poll_interval_ms);

    match host_task(&mut lifecycle, &bridge, poll, bridge.closed()).await {
        HostEnd::Terminal(outcome) => {
            info!(agent = %profile.name, %outcome, "task finished");
            bridge.stop(outcome.code(), RUNTIME_STOP_GRACE).await;
            Ok(outcome)
        }
        HostEnd::RuntimeExited => {
            let code = bridge.reap().await?;
            let outcome = runtime_exit_outcome(code);
            if outcome != ExitOutcome::Clean {
                warn!(agent = %profile.name, ?code, "runtime exited abnormally");
            }
            Ok(outcome)
        }
    }
}
