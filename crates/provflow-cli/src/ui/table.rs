//! Table rendering for CLI output using comfy-table.
//!
//! | Command | Table Function |
//! |---------|----------------|
//! | `provflow update --dry-run` | `render_steps_table()` |
//! | `provflow log` | `render_log_table()` |
//! | `provflow workflow ls` | `render_plans_table()` |

use comfy_table::presets::NOTHING;
use comfy_table::{Cell, CellAlignment, ColumnConstraint, Table, Width};

use provflow_core::{LogEntry, Plan, PlannedStep};

use super::color::terminal_width;
use super::format::{format_relative_time, path_list, truncate_str};

/// Width left for the free-text last column after the fixed ones.
fn tail_width(fixed: usize) -> usize {
    terminal_width().saturating_sub(fixed).max(20)
}

/// Render the execution plan of a dry run.
///
/// # Example Output
///
/// ```text
/// #  WORKFLOW  OUTPUTS  REASON
/// 1  r1        b.txt    input a.txt modified
/// 2  r3        c.txt    input a.txt modified
/// ```
pub fn render_steps_table(steps: &[PlannedStep]) -> String {
    if steps.is_empty() {
        return String::new();
    }

    let mut table = Table::new();
    table.load_preset(NOTHING);

    table.set_header(vec![
        Cell::new("#").set_alignment(CellAlignment::Right),
        Cell::new("WORKFLOW"),
        Cell::new("OUTPUTS"),
        Cell::new("REASON"),
    ]);

    table.set_constraints(vec![
        ColumnConstraint::LowerBoundary(Width::Fixed(2)),  // #
        ColumnConstraint::LowerBoundary(Width::Fixed(10)), // WORKFLOW
        ColumnConstraint::LowerBoundary(Width::Fixed(10)), // OUTPUTS
    ]);

    let reason_width = tail_width(50);
    for step in steps {
        let reason = step
            .reasons
            .first()
            .map(|r| {
                let text = r.to_string();
                if step.reasons.len() > 1 {
                    format!("{} (+{})", text, step.reasons.len() - 1)
                } else {
                    text
                }
            })
            .unwrap_or_else(|| "-".to_string());

        table.add_row(vec![
            Cell::new(step.batch + 1).set_alignment(CellAlignment::Right),
            Cell::new(truncate_str(&step.plan_name, 24)),
            Cell::new(path_list(&step.outputs, 2)),
            Cell::new(truncate_str(&reason, reason_width)),
        ]);
    }

    table.trim_fmt().to_string()
}

/// Render activities for `provflow log`.
///
/// # Example Output
///
/// ```text
/// ACTIVITY  WORKFLOW  DATE      AGENT  OUTPUTS
/// 3f2a91c0  r2        2h ago    jane   c.txt
/// ```
pub fn render_log_table(entries: &[LogEntry]) -> String {
    if entries.is_empty() {
        return String::new();
    }

    let mut table = Table::new();
    table.load_preset(NOTHING);

    table.set_header(vec![
        Cell::new("ACTIVITY"),
        Cell::new("WORKFLOW"),
        Cell::new("DATE"),
        Cell::new("AGENT"),
        Cell::new("OUTPUTS"),
    ]);

    table.set_constraints(vec![
        ColumnConstraint::LowerBoundary(Width::Fixed(8)),  // ACTIVITY
        ColumnConstraint::LowerBoundary(Width::Fixed(10)), // WORKFLOW
        ColumnConstraint::LowerBoundary(Width::Fixed(10)), // DATE
    ]);

    let outputs_width = tail_width(50);
    for entry in entries {
        let mut id = entry.activity_id.short().to_string();
        if !entry.current {
            id.push('*');
        }
        table.add_row(vec![
            Cell::new(id),
            Cell::new(truncate_str(&entry.plan_name, 24)),
            Cell::new(format_relative_time(entry.ended_at)),
            Cell::new(truncate_str(&entry.agent, 12)),
            Cell::new(truncate_str(&path_list(&entry.outputs, 3), outputs_width)),
        ]);
    }

    table.trim_fmt().to_string()
}

/// Render plans for `provflow workflow ls`.
///
/// # Example Output
///
/// ```text
/// NAME  COMMAND  IN  OUT  CREATED
/// r1    cp        1    1  just now
/// ```
pub fn render_plans_table(plans: &[Plan]) -> String {
    if plans.is_empty() {
        return String::new();
    }

    let mut table = Table::new();
    table.load_preset(NOTHING);

    table.set_header(vec![
        Cell::new("NAME"),
        Cell::new("COMMAND"),
        Cell::new("IN").set_alignment(CellAlignment::Right),
        Cell::new("OUT").set_alignment(CellAlignment::Right),
        Cell::new("CREATED"),
    ]);

    for plan in plans {
        let mut name = truncate_str(&plan.name, 24);
        if !plan.is_current() {
            name.push_str(" (old)");
        }
        table.add_row(vec![
            Cell::new(name),
            Cell::new(truncate_str(&plan.command, 24)),
            Cell::new(plan.inputs.len()).set_alignment(CellAlignment::Right),
            Cell::new(plan.outputs.len()).set_alignment(CellAlignment::Right),
            Cell::new(format_relative_time(plan.created_date)),
        ]);
    }

    table.trim_fmt().to_string()
}
