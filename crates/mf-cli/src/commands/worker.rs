use mf_agents::worker::{run_worker, WorkerArgs};
use mf_core::config::Config;
use mf_core::types::ExitOutcome;
use tracing::error;

/// Run the hidden `worker` subcommand; returns the exit code the
/// supervisor interprets.
pub async fn run(args: WorkerArgs, config: &Config) -> i32 {
    match run_worker(args, config).await {
        Ok(outcome) => outcome.code(),
        Err(e) => {
            error!(error = %e, "worker could not start its task");
            ExitOutcome::FAILURE_CODE
        }
    }
}
