//! Newline-delimited JSON bridge between a worker and the decision-loop
//! runtime it hosts.
//!
//! The worker writes [`HostMessage`]s to the runtime's stdin and reads
//! [`RuntimeMessage`]s from its stdout. The first message is always the
//! [`TaskContext`]; after that the worker issues capability calls and the
//! runtime answers each one with a reply carrying the same id.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mf_core::validator::InventorySnapshot;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch, Mutex};
use tracing::{debug, info, warn};

use crate::context::TaskContext;
use crate::world::{self, WorldCapabilities, WorldError};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("runtime command is empty")]
    EmptyCommand,

    #[error("failed to start runtime {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("runtime stdio unavailable")]
    NoStdio,

    #[error("bridge i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bridge encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// How long a capability call may wait for the runtime's reply.
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Wire messages
// ---------------------------------------------------------------------------

/// A capability invocation, tagged by `op`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Capability {
    WorldCommand { text: String },
    ReadInventory,
    ListParticipants,
    InjectGoal { goal: String },
    StartConversation { peer: String, seed: String },
}

impl Capability {
    fn name(&self) -> &'static str {
        match self {
            Capability::WorldCommand { .. } => "world_command",
            Capability::ReadInventory => "read_inventory",
            Capability::ListParticipants => "list_participants",
            Capability::InjectGoal { .. } => "inject_goal",
            Capability::StartConversation { .. } => "start_conversation",
        }
    }
}

/// Worker -> runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    Context(TaskContext),
    Call {
        id: u64,
        #[serde(flatten)]
        call: Capability,
    },
    /// The task is over; the runtime should exit.
    Shutdown { code: i32 },
}

/// Runtime -> worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeMessage {
    Reply {
        id: u64,
        ok: bool,
        #[serde(default)]
        result: Value,
        #[serde(default)]
        error: Option<String>,
    },
    Log { message: String },
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<RuntimeMessage>>>>;

// ---------------------------------------------------------------------------
// RuntimeBridge
// ---------------------------------------------------------------------------

/// [`WorldCapabilities`] served by the hosted runtime.
pub struct RuntimeBridge {
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: Pending,
    next_id: AtomicU64,
    closed: watch::Receiver<bool>,
    child: Mutex<Option<Child>>,
}

impl RuntimeBridge {
    /// Start `command` (program then args) with `--profile <profile>`
    /// appended, and hand it `context`.
    pub async fn spawn(
        command: &[String],
        profile: &Path,
        context: &TaskContext,
    ) -> Result<Self> {
        let (program, args) = command.split_first().ok_or(BridgeError::EmptyCommand)?;
        let mut child = Command::new(program)
            .args(args)
            .arg("--profile")
            .arg(profile)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BridgeError::Spawn {
                program: program.clone(),
                source,
            })?;
        let stdin = child.stdin.take().ok_or(BridgeError::NoStdio)?;
        let stdout = child.stdout.take().ok_or(BridgeError::NoStdio)?;
        info!(program = %program, pid = ?child.id(), "runtime started");

        let mut bridge = Self::connect(stdout, stdin);
        bridge.child = Mutex::new(Some(child));
        bridge.send(&HostMessage::Context(context.clone())).await?;
        Ok(bridge)
    }

    /// Wrap an already-connected runtime stream.
    pub fn connect<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (closed_tx, closed_rx) = watch::channel(false);
        tokio::spawn(read_replies(reader, pending.clone(), closed_tx));
        Self {
            writer: Mutex::new(Box::new(writer)),
            pending,
            next_id: AtomicU64::new(1),
            closed: closed_rx,
            child: Mutex::new(None),
        }
    }

    pub async fn send(&self, message: &HostMessage) -> Result<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Resolves once the runtime's output stream has ended.
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|done| *done).await;
    }

    /// Reap the runtime after it closed its output. `None` for a signal
    /// death or when there is no child process.
    pub async fn reap(&self) -> std::io::Result<Option<i32>> {
        match self.child.lock().await.as_mut() {
            Some(child) => Ok(child.wait().await?.code()),
            None => Ok(None),
        }
    }

    /// Ask the runtime to exit, killing it after `grace`.
    pub async fn stop(&self, code: i32, grace: Duration) {
        if let Err(err) = self.send(&HostMessage::Shutdown { code }).await {
            debug!(error = %err, "runtime already gone");
        }
        let mut guard = self.child.lock().await;
        let Some(child) = guard.as_mut() else {
            return;
        };
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(_) => debug!("runtime exited"),
            Err(_) => {
                warn!("runtime ignored shutdown, killing");
                if let Err(err) = child.kill().await {
                    warn!(error = %err, "failed to kill runtime");
                }
            }
        }
    }

    async fn call(&self, call: Capability) -> world::Result<Value> {
        if *self.closed.borrow() {
            return Err(WorldError::Disconnected);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let op = call.name();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(err) = self.send(&HostMessage::Call { id, call }).await {
            self.pending.lock().await.remove(&id);
            debug!(error = %err, op, "runtime write failed");
            return Err(WorldError::Disconnected);
        }

        let reply = match tokio::time::timeout(CALL_TIMEOUT, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(WorldError::Disconnected),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(WorldError::Protocol(format!("{op} timed out")));
            }
        };
        match reply {
            RuntimeMessage::Reply { ok: true, result, .. } => Ok(result),
            RuntimeMessage::Reply { error, .. } => Err(WorldError::Rejected {
                op: op.to_string(),
                message: error.unwrap_or_else(|| "unknown error".to_string()),
            }),
            RuntimeMessage::Log { .. } => Err(WorldError::Protocol(format!("unexpected reply to {op}"))),
        }
    }
}

#[async_trait]
impl WorldCapabilities for RuntimeBridge {
    async fn send_world_command(&self, text: &str) -> world::Result<()> {
        self.call(Capability::WorldCommand {
            text: text.to_string(),
        })
        .await
        .map(|_| ())
    }

    async fn read_inventory(&self) -> world::Result<InventorySnapshot> {
        let raw = self.call(Capability::ReadInventory).await?;
        Ok(InventorySnapshot::from_value(&raw))
    }

    async fn list_participants(&self) -> world::Result<Vec<String>> {
        let raw = self.call(Capability::ListParticipants).await?;
        serde_json::from_value(raw).map_err(|e| WorldError::Protocol(e.to_string()))
    }

    async fn inject_goal(&self, goal: &str) -> world::Result<()> {
        self.call(Capability::InjectGoal {
            goal: goal.to_string(),
        })
        .await
        .map(|_| ())
    }

    async fn start_conversation(&self, peer: &str, seed: &str) -> world::Result<()> {
        self.call(Capability::StartConversation {
            peer: peer.to_string(),
            seed: seed.to_string(),
        })
        .await
        .map(|_| ())
    }
}

/// Route replies to their callers until the runtime's output ends.
async fn read_replies<R>(reader: R, pending: Pending, closed: watch::Sender<bool>)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<RuntimeMessage>(&line) {
                    Ok(RuntimeMessage::Log { message }) => info!(target: "runtime", "{message}"),
                    Ok(reply @ RuntimeMessage::Reply { .. }) => {
                        let RuntimeMessage::Reply { id, .. } = &reply else {
                            continue;
                        };
                        match pending.lock().await.remove(id) {
                            Some(tx) => {
                                let _ = tx.send(reply);
                            }
                            None => warn!(id, "reply for unknown call"),
                        }
                    }
                    Err(err) => warn!(error = %err, "unparseable runtime line"),
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "runtime read failed");
                break;
            }
        }
    }
    // Dropping the senders fails every in-flight call.
    pending.lock().await.clear();
    let _ = closed.send(true);
    debug!("runtime output closed");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
