use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use mf_agents::lifecycle::{
    LifecycleError, LifecycleSettings, TaskLifecycle, TaskStatus, END_CONVERSATION_ACTION,
    END_GOAL_ACTION,
};
use mf_agents::state_machine::TaskState;
use mf_agents::world::{self, WorldCapabilities, WorldError};
use mf_core::task_store::{TaskError, TaskRef, TaskStore};
use mf_core::types::{ExitOutcome, TaskRecord};
use mf_core::validator::{InventorySlot, InventorySnapshot};

const TASKS: &str = r#"{
    "solo_iron": {
        "goal": "Collect iron ingots",
        "target": "iron_ingot",
        "number_of_target": 4,
        "timeout": 1,
        "initial_inventory": {"iron_pickaxe": 1, "oak_log": 2},
        "blocked_actions": ["!craftRecipe"]
    },
    "house": {
        "type": "construction",
        "goal": "Build the house",
        "blueprint": {
            "levels": [
                {"level": 0, "coordinates": [1, -60, 2], "placement": [["stone", "air"]]}
            ]
        }
    },
    "pair_iron": {
        "goal": "Collect iron together",
        "agent_count": 2,
        "agent_names": ["Ann", "Bob"],
        "conversation": "Let's gather iron",
        "initial_inventory": {"0": {"iron_pickaxe": 1}, "1": {"furnace": 1}}
    }
}"#;

fn record(id: &str) -> TaskRecord {
    TaskStore::from_json(TASKS).unwrap().get(id).unwrap().clone()
}

fn lifecycle(id: &str, index: usize, name: &str) -> TaskLifecycle {
    TaskLifecycle::new(Some(record(id)), index, name, LifecycleSettings::default())
}

// ---------------------------------------------------------------------------
// FakeWorld
// ---------------------------------------------------------------------------

/// In-memory world that applies `/clear` and `/give` to a single inventory.
///
/// Commands starting with `rejected` are refused; once `disconnect` is
/// called every capability fails as a lost session.
struct FakeWorld {
    rejected: Option<&'static str>,
    disconnected: AtomicBool,
    commands: Mutex<Vec<String>>,
    inventory: Mutex<Vec<InventorySlot>>,
    participants: Vec<String>,
    goals: Mutex<Vec<String>>,
    conversations: Mutex<Vec<(String, String)>>,
}

impl FakeWorld {
    fn new(participants: &[&str]) -> Self {
        Self {
            rejected: None,
            disconnected: AtomicBool::new(false),
            commands: Mutex::new(Vec::new()),
            inventory: Mutex::new(vec![InventorySlot::new("dirt", 64)]),
            participants: participants.iter().map(|p| p.to_string()).collect(),
            goals: Mutex::new(Vec::new()),
            conversations: Mutex::new(Vec::new()),
        }
    }

    fn with_inventory(self, slots: Vec<InventorySlot>) -> Self {
        *self.inventory.lock().unwrap() = slots;
        self
    }

    fn rejecting(mut self, prefix: &'static str) -> Self {
        self.rejected = Some(prefix);
        self
    }

    fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> world::Result<()> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(WorldError::Disconnected);
        }
        Ok(())
    }

    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorldCapabilities for FakeWorld {
    async fn send_world_command(&self, text: &str) -> world::Result<()> {
        self.check()?;
        self.commands.lock().unwrap().push(text.to_string());
        if self.rejected.is_some_and(|prefix| text.starts_with(prefix)) {
            return Err(WorldError::Rejected {
                op: "world_command".into(),
                message: "no such player".into(),
            });
        }
        let parts: Vec<&str> = text.split_whitespace().collect();
        match parts.as_slice() {
            ["/clear", _] => self.inventory.lock().unwrap().clear(),
            ["/give", _, item, count] => {
                let count = count.parse().unwrap();
                self.inventory
                    .lock()
                    .unwrap()
                    .push(InventorySlot::new(*item, count));
            }
            _ => {}
        }
        Ok(())
    }

    async fn read_inventory(&self) -> world::Result<InventorySnapshot> {
        self.check()?;
        Ok(InventorySnapshot::new(self.inventory.lock().unwrap().clone()))
    }

    async fn list_participants(&self) -> world::Result<Vec<String>> {
        self.check()?;
        Ok(self.participants.clone())
    }

    async fn inject_goal(&self, goal: &str) -> world::Result<()> {
        self.check()?;
        self.goals.lock().unwrap().push(goal.to_string());
        Ok(())
    }

    async fn start_conversation(&self, peer: &str, seed: &str) -> world::Result<()> {
        self.conversations
            .lock()
            .unwrap()
            .push((peer.to_string(), seed.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Binding
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn single_agent_task_binds_only_index_zero() {
    let mut second = lifecycle("solo_iron", 1, "Bob");
    assert!(second.task().is_none());
    assert!(second.goal().is_none());
    assert!(second.blocked_actions().is_empty());

    let world = FakeWorld::new(&["Bob"]);
    second.initialize(&world).await.unwrap();
    assert!(world.commands().is_empty());

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(second.is_done(&world).await, TaskStatus::Running);
}

#[test]
fn goal_and_conversation_block_their_end_actions() {
    let solo = lifecycle("solo_iron", 0, "Ann");
    assert!(solo.is_blocked("!craftRecipe"));
    assert!(solo.is_blocked(END_GOAL_ACTION));
    assert!(!solo.is_blocked(END_CONVERSATION_ACTION));

    let pair = lifecycle("pair_iron", 1, "Bob");
    assert!(pair.is_blocked(END_GOAL_ACTION));
    assert!(pair.is_blocked(END_CONVERSATION_ACTION));
}

#[test]
fn construction_goal_includes_blueprint() {
    let house = lifecycle("house", 0, "Ann");
    assert_eq!(
        house.goal(),
        Some("Build the house \nLevel 0: Start at coordinates X: 1, Y: -60, Z: 2\n[\n[stone, air],\n]\n")
    );
}

#[test]
fn timeout_falls_back_to_default() {
    assert_eq!(lifecycle("solo_iron", 0, "Ann").timeout(), Duration::from_secs(1));
    assert_eq!(lifecycle("house", 0, "Ann").timeout(), Duration::from_secs(300));
}

#[test]
fn per_agent_inventory_follows_index() {
    let bob = lifecycle("pair_iron", 1, "Bob");
    let inv = bob.initial_inventory().unwrap();
    assert_eq!(inv.get("furnace"), Some(&1));
    assert!(inv.get("iron_pickaxe").is_none());
}

#[test]
fn unknown_task_id_is_a_task_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.json");
    std::fs::write(&path, TASKS).unwrap();

    let err = TaskLifecycle::from_task_ref(
        &TaskRef::new(&path, "missing"),
        0,
        "Ann",
        LifecycleSettings::default(),
    )
    .unwrap_err();
    assert!(matches!(err, LifecycleError::Task(TaskError::NotFound(_))));
    assert_eq!(err.exit_outcome(), ExitOutcome::Crashed(Some(1)));

    let bound = TaskLifecycle::from_task_ref(
        &TaskRef::new(&path, "house"),
        0,
        "Ann",
        LifecycleSettings::default(),
    )
    .unwrap();
    assert_eq!(bound.task().map(|t| t.id.as_str()), Some("house"));
}

// ---------------------------------------------------------------------------
// Terminal status
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn deadline_yields_timed_out_and_sticks() {
    let mut task = lifecycle("solo_iron", 0, "Ann");
    let world = FakeWorld::new(&["Ann"]);
    assert_eq!(task.is_done(&world).await, TaskStatus::Running);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(task.is_done(&world).await, TaskStatus::TimedOut);
    assert_eq!(task.state(), TaskState::TimedOut);

    // Later success does not change the verdict.
    let rich = FakeWorld::new(&["Ann"]).with_inventory(vec![InventorySlot::new("iron_ingot", 9)]);
    assert_eq!(task.is_done(&rich).await, TaskStatus::TimedOut);
}

#[tokio::test(start_paused = true)]
async fn target_spread_over_slots_succeeds() {
    let mut task = lifecycle("solo_iron", 0, "Ann");
    let world = FakeWorld::new(&["Ann"]).with_inventory(vec![
        InventorySlot::new("iron_ingot", 3),
        InventorySlot::new("stick", 1),
        InventorySlot::new("iron_ingot", 3),
    ]);
    // Success is checked before the deadline.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(task.is_done(&world).await, TaskStatus::Succeeded);
    assert_eq!(task.is_done(&world).await.exit_outcome(), Some(ExitOutcome::TaskSucceeded));
}

#[tokio::test(start_paused = true)]
async fn task_without_target_only_times_out() {
    let mut house = lifecycle("house", 0, "Ann");
    let world = FakeWorld::new(&["Ann"]);
    tokio::time::sleep(Duration::from_secs(299)).await;
    assert_eq!(house.is_done(&world).await, TaskStatus::Running);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(house.is_done(&world).await, TaskStatus::TimedOut);
}

#[tokio::test(start_paused = true)]
async fn unbound_controller_never_finishes() {
    let mut idle = TaskLifecycle::unbound(0, "Ann");
    let world = FakeWorld::new(&["Ann"]);
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(idle.is_done(&world).await, TaskStatus::Running);
}

// ---------------------------------------------------------------------------
// Setup pipeline
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn setup_runs_steps_in_order() {
    let mut task = lifecycle("solo_iron", 0, "Ann");
    let world = FakeWorld::new(&["Ann", "steve"]);
    task.initialize(&world).await.unwrap();
    assert_eq!(task.state(), TaskState::Active);

    let commands = world.commands();
    assert_eq!(commands.len(), 5, "{commands:?}");
    assert_eq!(commands[0], "/clear Ann");
    assert_eq!(commands[1], "/give Ann iron_pickaxe 1");
    assert_eq!(commands[2], "/give Ann oak_log 2");
    assert_eq!(commands[3], "/tp Ann steve");

    let spread: Vec<&str> = commands[4].split_whitespace().collect();
    assert_eq!(spread[..2], ["/tp", "Ann"]);
    assert_eq!(spread[3], "~");
    for offset in [spread[2], spread[4]] {
        let value: i32 = offset.trim_start_matches('~').parse().unwrap();
        assert!((-5..=5).contains(&value), "offset {offset} out of range");
    }

    assert_eq!(world.goals.lock().unwrap().as_slice(), ["Collect iron ingots"]);
    assert!(world.conversations.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn construction_skips_random_spread() {
    let mut house = lifecycle("house", 0, "Ann");
    let world = FakeWorld::new(&["Ann"]);
    house.initialize(&world).await.unwrap();
    // No non-agent participant and no spread: only the clear.
    assert_eq!(world.commands(), vec!["/clear Ann"]);
}

#[tokio::test(start_paused = true)]
async fn missing_co_agent_is_fatal() {
    let mut ann = lifecycle("pair_iron", 0, "Ann");
    let world = FakeWorld::new(&["Ann"]);

    let started = tokio::time::Instant::now();
    let err = ann.initialize(&world).await.unwrap_err();
    assert!(started.elapsed() >= Duration::from_secs(10));

    match &err {
        LifecycleError::MissingAgents { missing, expected } => {
            assert_eq!(missing, &vec!["Bob".to_string()]);
            assert_eq!(*expected, 2);
        }
        other => panic!("expected missing agents, got {other:?}"),
    }
    assert_eq!(err.exit_outcome(), ExitOutcome::FatalSetup);
    assert_eq!(ann.state(), TaskState::FatalSetupFailure);
    assert_eq!(ann.is_done(&world).await, TaskStatus::SetupFailed);
    assert!(world.goals.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn barrier_passes_early_when_everyone_is_present() {
    let mut ann = lifecycle("pair_iron", 0, "Ann");
    let world = FakeWorld::new(&["Ann", "Bob"]);

    let started = tokio::time::Instant::now();
    ann.initialize(&world).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));

    assert_eq!(
        world.conversations.lock().unwrap().as_slice(),
        [("Bob".to_string(), "Let's gather iron".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn only_first_agent_opens_the_conversation() {
    let mut bob = lifecycle("pair_iron", 1, "Bob");
    let world = FakeWorld::new(&["Ann", "Bob"]);
    bob.initialize(&world).await.unwrap();
    assert!(world.conversations.lock().unwrap().is_empty());
    assert_eq!(world.goals.lock().unwrap().len(), 1);
    assert_eq!(world.commands()[1], "/give Bob furnace 1");
}

#[tokio::test(start_paused = true)]
async fn rejected_teleport_does_not_abort_setup() {
    let mut task = lifecycle("solo_iron", 0, "Ann");
    let world = FakeWorld::new(&["Ann", "steve"]).rejecting("/tp");
    task.initialize(&world).await.unwrap();

    assert_eq!(task.state(), TaskState::Active);
    let commands = world.commands();
    assert_eq!(commands[3], "/tp Ann steve");
    assert!(commands[4].starts_with("/tp Ann ~"));
    assert_eq!(world.goals.lock().unwrap().as_slice(), ["Collect iron ingots"]);
}

#[tokio::test(start_paused = true)]
async fn rejected_give_waits_out_settle_and_continues() {
    let mut task = lifecycle("solo_iron", 0, "Ann");
    let world = FakeWorld::new(&["Ann"]).rejecting("/give");

    let started = tokio::time::Instant::now();
    task.initialize(&world).await.unwrap();
    assert!(started.elapsed() >= LifecycleSettings::default().settle_timeout);

    assert_eq!(task.state(), TaskState::Active);
    assert_eq!(world.goals.lock().unwrap().len(), 1);
    // Neither grant took effect, but validation is left to the control loop.
    let snapshot = world.read_inventory().await.unwrap();
    assert!(snapshot.is_empty());
}

#[tokio::test(start_paused = true)]
async fn lost_session_aborts_setup_as_a_crash() {
    let mut task = lifecycle("solo_iron", 0, "Ann");
    let world = FakeWorld::new(&["Ann"]);
    world.disconnect();

    let err = task.initialize(&world).await.unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::World {
            source: WorldError::Disconnected,
            ..
        }
    ));
    assert_eq!(err.exit_outcome(), ExitOutcome::Crashed(Some(1)));
    assert_eq!(task.state(), TaskState::Initializing);
    assert!(world.goals.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn deadline_still_reported_after_aborted_setup() {
    let mut task = lifecycle("solo_iron", 0, "Ann");
    let world = FakeWorld::new(&["Ann"]);
    world.disconnect();
    assert!(task.initialize(&world).await.is_err());

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(task.is_done(&world).await, TaskStatus::TimedOut);
    assert_eq!(task.state(), TaskState::TimedOut);
}
