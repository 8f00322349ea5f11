use std::path::Path;

use mf_core::task_store::TaskStore;
use mf_core::types::TaskRecord;

/// One-line summary of a task for the listing.
pub fn summary_line(task: &TaskRecord) -> String {
    let mut line = format!("{:<32} {:<12} agents={}", task.id, task.kind, task.agent_count);
    if let (Some(item), Some(count)) = (&task.target_item, task.target_count) {
        line.push_str(&format!(" target={count}x{item}"));
    }
    if let Some(timeout) = task.timeout_secs {
        line.push_str(&format!(" timeout={timeout}s"));
    }
    line
}

/// Run the `tasks` subcommand.
pub fn run(path: &Path, id: Option<&str>) -> anyhow::Result<()> {
    let store = TaskStore::load(path)?;

    let Some(id) = id else {
        println!("{} task(s) in {}", store.len(), path.display());
        for task in store.records() {
            println!("  {}", summary_line(task));
        }
        return Ok(());
    };

    let task = store.get(id)?;
    println!("{}", serde_json::to_string_pretty(task)?);
    if let Some(goal) = task.rendered_goal() {
        println!("\nGoal:\n{goal}");
    }
    Ok(())
}
