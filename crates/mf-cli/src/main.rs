mod commands;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use mf_core::config::Config;

/// mindfleet -- launch and supervise a fleet of game-playing agents.
#[derive(Parser)]
#[command(name = "mf", version, about)]
struct Cli {
    /// Config file (defaults to ~/.mindfleet/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch one agent per profile and supervise them until the task ends.
    Run {
        /// Agent profiles, agent 0 first. Defaults to `fleet.profiles`.
        #[arg(long, value_delimiter = ',')]
        profiles: Vec<PathBuf>,
        /// Task collection file.
        #[arg(long, requires = "task_id")]
        task_path: Option<PathBuf>,
        /// Task id inside the collection.
        #[arg(long, requires = "task_path")]
        task_id: Option<String>,
        /// Run every agent with this model instead of its own.
        #[arg(long)]
        model: Option<String>,
        /// Start agents from their saved memory.
        #[arg(long)]
        load_memory: bool,
        /// First message for agents without a task.
        #[arg(long)]
        init_message: Option<String>,
    },

    /// List the tasks in a collection, or show one.
    Tasks {
        #[arg(long)]
        task_path: PathBuf,
        /// Show a single task in full.
        #[arg(long)]
        id: Option<String>,
    },

    /// Run a single agent. Started by `run`; not meant for direct use.
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        profile: PathBuf,
        #[arg(long, default_value_t = 0)]
        agent_index: usize,
        #[arg(long)]
        load_memory: bool,
        #[arg(long)]
        init_message: Option<String>,
        #[arg(long, requires = "task_id")]
        task_path: Option<PathBuf>,
        #[arg(long, requires = "task_path")]
        task_id: Option<String>,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => {
            Config::load_from(path).with_context(|| format!("invalid config {}", path.display()))
        }
        None => Config::load().context("invalid config"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let json_logs = cli.json_logs || config.general.log_json;

    let code = match cli.command {
        Commands::Run {
            profiles,
            task_path,
            task_id,
            model,
            load_memory,
            init_message,
        } => {
            mf_telemetry::logging::init("mf", &config.general.log_level, json_logs);
            let opts = commands::run::RunOptions {
                profiles,
                task_path,
                task_id,
                model,
                load_memory,
                init_message,
                config_path: cli.config.clone(),
                json_logs: cli.json_logs,
            };
            commands::run::run(opts, &config).await?
        }
        Commands::Tasks { task_path, id } => {
            commands::tasks::run(&task_path, id.as_deref())?;
            0
        }
        Commands::Worker {
            profile,
            agent_index,
            load_memory,
            init_message,
            task_path,
            task_id,
        } => {
            mf_telemetry::logging::init("mf-worker", &config.general.log_level, json_logs);
            let task = task_path
                .zip(task_id)
                .map(|(path, id)| mf_core::task_store::TaskRef::new(path, id));
            let args = mf_agents::worker::WorkerArgs {
                profile,
                agent_index,
                load_memory,
                init_message,
                task,
            };
            commands::worker::run(args, &config).await
        }
    };

    Ok(commands::exit_code(code))
}
