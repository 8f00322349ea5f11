use std::collections::BTreeSet;
use std::time::Duration;

use mf_core::config::TaskConfig;
use mf_core::task_store::{TaskError, TaskRef, TaskStore};
use mf_core::types::{ExitOutcome, Inventory, TaskKind, TaskRecord};
use mf_core::validator::{InventorySnapshot, TaskValidator};
use rand::Rng;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::state_machine::{StateMachineError, TaskEvent, TaskState, TaskStateMachine};
use crate::world::{WorldCapabilities, WorldError};

/// Blocked while a goal is set, so the agent cannot drop its objective.
pub const END_GOAL_ACTION: &str = "!endGoal";
/// Blocked while a conversation seed is set.
pub const END_CONVERSATION_ACTION: &str = "!endConversation";

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Errors raised while binding a task or preparing the agent for it.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// The task could not be resolved. Always an operator configuration
    /// error.
    #[error(transparent)]
    Task(#[from] TaskError),

    /// A world capability failed mid-setup.
    #[error("world error during {step}: {source}")]
    World {
        step: &'static str,
        #[source]
        source: WorldError,
    },

    /// The readiness barrier expired without every co-agent present.
    #[error("not all required agents joined the world: missing {missing:?} of {expected}")]
    MissingAgents {
        missing: Vec<String>,
        expected: usize,
    },

    #[error("state machine error: {0}")]
    StateMachine(#[from] StateMachineError),
}

impl LifecycleError {
    fn world(step: &'static str, source: WorldError) -> Self {
        LifecycleError::World { step, source }
    }

    /// How a worker should exit when setup fails with this error.
    pub fn exit_outcome(&self) -> ExitOutcome {
        match self {
            LifecycleError::MissingAgents { .. } => ExitOutcome::FatalSetup,
            _ => ExitOutcome::Crashed(Some(ExitOutcome::FAILURE_CODE)),
        }
    }
}

pub type Result<T> = std::result::Result<T, LifecycleError>;

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Succeeded,
    TimedOut,
    SetupFailed,
}

impl TaskStatus {
    /// The exit outcome that reports this status, if it is terminal.
    pub fn exit_outcome(&self) -> Option<ExitOutcome> {
        match self {
            TaskStatus::Running => None,
            TaskStatus::Succeeded => Some(ExitOutcome::TaskSucceeded),
            TaskStatus::TimedOut => Some(ExitOutcome::TaskTimedOut),
            TaskStatus::SetupFailed => Some(ExitOutcome::FatalSetup),
        }
    }
}

// ---------------------------------------------------------------------------
// LifecycleSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub default_timeout: Duration,
    pub readiness_window: Duration,
    pub readiness_poll: Duration,
    pub settle_timeout: Duration,
    pub settle_poll: Duration,
    pub move_settle: Duration,
    pub spread_radius: i32,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self::from(&TaskConfig::default())
    }
}

impl From<&TaskConfig> for LifecycleSettings {
    fn from(cfg: &TaskConfig) -> Self {
        Self {
            default_timeout: Duration::from_secs(cfg.default_timeout_secs),
            readiness_window: Duration::from_secs(cfg.readiness_window_secs),
            readiness_poll: Duration::from_millis(cfg.readiness_poll_ms),
            settle_timeout: Duration::from_millis(cfg.settle_timeout_ms),
            settle_poll: Duration::from_millis(cfg.settle_poll_ms),
            move_settle: Duration::from_millis(cfg.move_settle_ms),
            spread_radius: cfg.spread_radius,
        }
    }
}

// ---------------------------------------------------------------------------
// TaskLifecycle
// ---------------------------------------------------------------------------

/// Per-agent task runtime: owns the bound task record, prepares the agent
/// for it once at startup and answers "is the task over?" every control
/// cycle.
#[derive(Debug)]
pub struct TaskLifecycle {
    agent_index: usize,
    agent_name: String,
    data: Option<TaskRecord>,
    goal: Option<String>,
    blocked_actions: Vec<String>,
    timeout: Duration,
    started_at: Instant,
    validator: Option<TaskValidator>,
    sm: TaskStateMachine,
    settings: LifecycleSettings,
}

impl TaskLifecycle {
    /// Bind `record` to the agent at `agent_index`.
    ///
    /// Single-agent tasks belong to agent 0; any other index ends up with no
    /// task at all.
    pub fn new(
        record: Option<TaskRecord>,
        agent_index: usize,
        agent_name: impl Into<String>,
        settings: LifecycleSettings,
    ) -> Self {
        let data = record.filter(|r| r.is_multi_agent() || agent_index == 0);

        let goal = data.as_ref().and_then(TaskRecord::rendered_goal);

        let mut blocked_actions = data
            .as_ref()
            .map(|task| task.blocked_actions.clone())
            .unwrap_or_default();
        if goal.is_some() {
            blocked_actions.push(END_GOAL_ACTION.to_string());
        }
        if data.as_ref().is_some_and(|t| t.conversation_seed.is_some()) {
            blocked_actions.push(END_CONVERSATION_ACTION.to_string());
        }

        let timeout = data
            .as_ref()
            .and_then(|task| task.timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(settings.default_timeout);
        let validator = data.as_ref().and_then(TaskValidator::for_task);

        if let Some(task) = &data {
            info!(
                task = %task.id,
                kind = %task.kind,
                agent_index,
                timeout_secs = timeout.as_secs(),
                "task bound"
            );
        }

        Self {
            agent_index,
            agent_name: agent_name.into(),
            data,
            goal,
            blocked_actions,
            timeout,
            started_at: Instant::now(),
            validator,
            sm: TaskStateMachine::new(),
            settings,
        }
    }

    /// Resolve `task` from its collection file and bind it.
    pub fn from_task_ref(
        task: &TaskRef,
        agent_index: usize,
        agent_name: impl Into<String>,
        settings: LifecycleSettings,
    ) -> Result<Self> {
        let store = TaskStore::load(&task.path)?;
        let record = store.resolve(&task.id, agent_index)?;
        Ok(Self::new(record, agent_index, agent_name, settings))
    }

    /// A controller with no task; never reports a terminal status.
    pub fn unbound(agent_index: usize, agent_name: impl Into<String>) -> Self {
        Self::new(None, agent_index, agent_name, LifecycleSettings::default())
    }

    pub fn task(&self) -> Option<&TaskRecord> {
        self.data.as_ref()
    }

    pub fn agent_index(&self) -> usize {
        self.agent_index
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// Goal as shown to the agent, blueprint included.
    pub fn goal(&self) -> Option<&str> {
        self.goal.as_deref()
    }

    pub fn blocked_actions(&self) -> &[String] {
        &self.blocked_actions
    }

    pub fn is_blocked(&self, action: &str) -> bool {
        self.blocked_actions.iter().any(|a| a == action)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn state(&self) -> TaskState {
        self.sm.state()
    }

    /// Inventory this agent is granted during setup.
    pub fn initial_inventory(&self) -> Option<&Inventory> {
        let task = self.data.as_ref()?;
        task.initial_inventory
            .as_ref()?
            .for_agent(self.agent_index, task.is_multi_agent())
    }

    // -----------------------------------------------------------------------
    // Terminal status
    // -----------------------------------------------------------------------

    /// Poll for a terminal status.
    ///
    /// Success is checked before the deadline. Once terminal, the same
    /// status is returned forever. Never issues world commands.
    pub async fn is_done(&mut self, world: &dyn WorldCapabilities) -> TaskStatus {
        if self.data.is_none() {
            return TaskStatus::Running;
        }
        match self.sm.state() {
            TaskState::Succeeded => return TaskStatus::Succeeded,
            TaskState::TimedOut => return TaskStatus::TimedOut,
            TaskState::FatalSetupFailure => return TaskStatus::SetupFailed,
            // Setup may still be running, or may have been abandoned; the
            // inventory is not meaningful yet but the deadline still holds.
            TaskState::Initializing => return self.check_deadline(),
            TaskState::Unstarted | TaskState::Active => {}
        }

        if let Some(validator) = &self.validator {
            match world.read_inventory().await {
                Ok(snapshot) if validator.validate(&snapshot) => {
                    info!(agent = %self.agent_name, "task successful");
                    self.apply(TaskEvent::Validated);
                    return TaskStatus::Succeeded;
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "inventory unavailable, skipping validation"),
            }
        }

        self.check_deadline()
    }

    fn check_deadline(&mut self) -> TaskStatus {
        if self.started_at.elapsed() < self.timeout {
            return TaskStatus::Running;
        }
        info!(
            agent = %self.agent_name,
            timeout_secs = self.timeout.as_secs(),
            "task timeout reached, task unsuccessful"
        );
        self.apply(TaskEvent::DeadlineElapsed);
        TaskStatus::TimedOut
    }

    fn apply(&mut self, event: TaskEvent) {
        if let Err(err) = self.sm.transition(event) {
            warn!(error = %err, "ignored task event");
        }
    }

    // -----------------------------------------------------------------------
    // Setup pipeline
    // -----------------------------------------------------------------------

    /// Prepare the agent for its task. Runs once; a no-op without a task.
    ///
    /// Steps run strictly in order. World commands are fire-and-forget: a
    /// rejected command is logged and setup carries on. Only a lost world
    /// session or a failed readiness barrier abort setup, and the latter
    /// moves the task to `FatalSetupFailure`.
    pub async fn initialize(&mut self, world: &dyn WorldCapabilities) -> Result<()> {
        let Some(task) = self.data.clone() else {
            return Ok(());
        };
        self.sm.transition(TaskEvent::BeginSetup)?;

        match self.run_setup(&task, world).await {
            Ok(()) => {
                self.sm.transition(TaskEvent::SetupComplete)?;
                info!(agent = %self.agent_name, task = %task.id, "agent state initialised");
                Ok(())
            }
            Err(err) => {
                if matches!(err, LifecycleError::MissingAgents { .. }) {
                    self.sm.transition(TaskEvent::SetupFailed)?;
                }
                Err(err)
            }
        }
    }

    async fn run_setup(&self, task: &TaskRecord, world: &dyn WorldCapabilities) -> Result<()> {
        let name = self.agent_name.as_str();

        self.command(world, "clear inventory", &format!("/clear {name}"))
            .await?;
        self.wait_for_inventory(world, "clear inventory", InventorySnapshot::is_empty)
            .await?;
        debug!(agent = name, "inventory cleared");

        self.grant_initial_inventory(task, world).await?;

        let participants = tolerate("list participants", world.list_participants().await)?
            .unwrap_or_default();
        if let Some(host) = self.find_non_agent(task, &participants) {
            info!(agent = name, host = %host, "moving to non-agent participant");
            self.command(world, "move to participant", &format!("/tp {name} {host}"))
                .await?;
            sleep(self.settings.move_settle).await;
        }

        // Construction tasks keep the exact reference point.
        if task.kind != TaskKind::Construction && self.settings.spread_radius > 0 {
            let radius = self.settings.spread_radius;
            let (dx, dz) = {
                let mut rng = rand::thread_rng();
                (rng.gen_range(-radius..=radius), rng.gen_range(-radius..=radius))
            };
            self.command(world, "spread out", &format!("/tp {name} ~{dx} ~ ~{dz}"))
                .await?;
            sleep(self.settings.move_settle).await;
        }

        if task.is_multi_agent() {
            self.await_co_agents(task, world).await?;
        }

        if let Some(goal) = &self.goal {
            info!(agent = name, "setting goal");
            world
                .inject_goal(goal)
                .await
                .map_err(|source| LifecycleError::world("inject goal", source))?;
        }

        if let Some(seed) = &task.conversation_seed {
            if self.agent_index == 0 {
                match task.agent_names.iter().find(|n| n.as_str() != name) {
                    Some(peer) => {
                        info!(agent = name, peer = %peer, "starting conversation");
                        tolerate("start conversation", world.start_conversation(peer, seed).await)?;
                    }
                    None => warn!(agent = name, "conversation seed set but no co-agent to talk to"),
                }
            }
        }

        Ok(())
    }

    async fn grant_initial_inventory(
        &self,
        task: &TaskRecord,
        world: &dyn WorldCapabilities,
    ) -> Result<()> {
        let Some(items) = self.initial_inventory() else {
            if task.initial_inventory.is_some() {
                warn!(agent_index = self.agent_index, "no initial inventory for this agent");
            }
            return Ok(());
        };
        for (item, count) in items {
            debug!(item = %item, count, "giving item");
            self.command(
                world,
                "grant inventory",
                &format!("/give {} {} {}", self.agent_name, item, count),
            )
            .await?;
        }
        self.wait_for_inventory(world, "grant inventory", |snapshot| {
            items
                .iter()
                .all(|(item, count)| snapshot.count_of(item) >= u64::from(*count))
        })
        .await?;
        info!(agent = %self.agent_name, items = items.len(), "initial inventory granted");
        Ok(())
    }

    /// First participant that is neither this agent nor a named co-agent.
    fn find_non_agent(&self, task: &TaskRecord, participants: &[String]) -> Option<String> {
        let agents: BTreeSet<&str> = task
            .agent_names
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.agent_name.as_str()))
            .collect();
        participants
            .iter()
            .find(|p| !agents.contains(p.as_str()))
            .cloned()
    }

    /// Readiness barrier: poll until every named agent is present or the
    /// window closes.
    async fn await_co_agents(&self, task: &TaskRecord, world: &dyn WorldCapabilities) -> Result<()> {
        let deadline = Instant::now() + self.settings.readiness_window;
        loop {
            let participants = world
                .list_participants()
                .await
                .map_err(|source| LifecycleError::world("readiness barrier", source))?;
            let missing: Vec<String> = task
                .agent_names
                .iter()
                .filter(|n| !participants.contains(n))
                .cloned()
                .collect();
            let present = task.agent_names.len() - missing.len();
            if present >= task.agent_count {
                info!(agents = present, "all co-agents present");
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!(missing = ?missing, "co-agents never joined");
                return Err(LifecycleError::MissingAgents {
                    missing,
                    expected: task.agent_count,
                });
            }
            sleep(self.settings.readiness_poll).await;
        }
    }

    async fn command(&self, world: &dyn WorldCapabilities, step: &'static str, text: &str) -> Result<()> {
        tolerate(step, world.send_world_command(text).await).map(drop)
    }

    /// Poll the inventory until `visible` holds, giving up with a warning
    /// after the settle timeout.
    async fn wait_for_inventory(
        &self,
        world: &dyn WorldCapabilities,
        step: &'static str,
        visible: impl Fn(&InventorySnapshot) -> bool,
    ) -> Result<()> {
        let deadline = Instant::now() + self.settings.settle_timeout;
        loop {
            let snapshot = tolerate(step, world.read_inventory().await)?;
            if snapshot.as_ref().is_some_and(&visible) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!(step, "effect not visible before settle timeout, continuing");
                return Ok(());
            }
            sleep(self.settings.settle_poll).await;
        }
    }
}

/// Keep going past a failed world call unless the session itself is gone.
fn tolerate<T>(step: &'static str, result: std::result::Result<T, WorldError>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(WorldError::Disconnected) => Err(LifecycleError::world(step, WorldError::Disconnected)),
        Err(err) => {
            warn!(step, error = %err, "world call failed, continuing setup");
            Ok(None)
        }
    }
}
