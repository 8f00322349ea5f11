use async_trait::async_trait;
use mf_core::validator::InventorySnapshot;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    /// The world session (or the runtime fronting it) is gone.
    #[error("world session disconnected")]
    Disconnected,

    /// The session answered, but with an error.
    #[error("world rejected {op}: {message}")]
    Rejected { op: String, message: String },

    #[error("world protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, WorldError>;

// ---------------------------------------------------------------------------
// WorldCapabilities
// ---------------------------------------------------------------------------

/// What the task lifecycle may ask of the world session and of the agent's
/// decision loop.
///
/// The lifecycle controller only consumes this interface. Implementations
/// own the transport.
#[async_trait]
pub trait WorldCapabilities: Send + Sync {
    /// Issue a raw world command (e.g. `/give Ann stick 2`).
    async fn send_world_command(&self, text: &str) -> Result<()>;

    /// Fresh snapshot of this agent's inventory.
    async fn read_inventory(&self) -> Result<InventorySnapshot>;

    /// Names of everyone currently present in the shared world.
    async fn list_participants(&self) -> Result<Vec<String>>;

    /// Install `goal` as the decision loop's standing objective.
    async fn inject_goal(&self, goal: &str) -> Result<()>;

    /// Open a dialogue with `peer`, starting from `seed`.
    async fn start_conversation(&self, peer: &str, seed: &str) -> Result<()>;
}
