//! Human-readable rendering of construction blueprints.
//!
//! The rendered text is appended to a construction task's goal so the agent
//! sees the plan in its objective. Rendering is a pure function of the
//! blueprint.

use std::fmt::Write;

use crate::types::{Blueprint, BlueprintLevel};

/// Render every level of `blueprint`, in order.
pub fn explain(blueprint: &Blueprint) -> String {
    let mut out = String::new();
    for level in &blueprint.levels {
        explain_level(&mut out, level);
    }
    out
}

/// Join a raw goal with the rendered blueprint.
pub fn goal_with_blueprint(goal: Option<&str>, blueprint: &Blueprint) -> String {
    format!("{} \n{}", goal.unwrap_or_default(), explain(blueprint))
}

fn explain_level(out: &mut String, level: &BlueprintLevel) {
    let [x, y, z] = level.coordinates;
    // Writing into a String cannot fail.
    let _ = write!(
        out,
        "Level {}: Start at coordinates X: {}, Y: {}, Z: {}",
        level.level, x, y, z
    );
    out.push('\n');
    out.push_str(&placement_grid(&level.placement));
    out.push('\n');
}

fn placement_grid(placement: &[Vec<String>]) -> String {
    let mut grid = String::from("[\n");
    for row in placement {
        grid.push('[');
        grid.push_str(&row.join(", "));
        grid.push_str("],\n");
    }
    grid.push(']');
    grid
}
