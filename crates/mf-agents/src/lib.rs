//! Fleet supervision and per-agent task lifecycle.
//!
//! [`supervisor`] launches and restarts worker processes; each worker runs
//! [`worker::run_worker`], which binds a task through [`lifecycle`] and hosts
//! the decision-loop runtime behind [`bridge`].

pub mod bridge;
pub mod context;
pub mod lifecycle;
pub mod profiles;
pub mod prompts;
pub mod relay;
pub mod shutdown;
pub mod state_machine;
pub mod supervisor;
pub mod worker;
pub mod world;
