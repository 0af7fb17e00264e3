//! Option and result types used by the engine API and the CLI.

use std::path::PathBuf;

use serde::Serialize;

use crate::activity::ActivityId;
use crate::history::RevisionId;
use crate::plan::PlanId;
use crate::report::DryRunReport;
use crate::staleness::Targets;

// ============================================================================
// Command Options
// ============================================================================

/// A command to execute and record with `run`.
#[derive(Debug, Default, Clone)]
pub struct RunRequest {
    /// Plan name. Generated from the program name when absent.
    pub name: Option<String>,
    /// Description stored on a new plan.
    pub description: Option<String>,
    /// Full argument vector, program first.
    pub argv: Vec<String>,
    /// Declared input paths (project-relative).
    pub inputs: Vec<String>,
    /// Declared output paths (project-relative).
    pub outputs: Vec<String>,
    /// File redirected to stdin.
    pub stdin: Option<String>,
    /// File receiving stdout.
    pub stdout: Option<String>,
    /// File receiving stderr.
    pub stderr: Option<String>,
    /// Executor override.
    pub provider: Option<String>,
    /// Directory relative paths are resolved against (project root if absent).
    pub cwd: Option<PathBuf>,
}

/// Options for `update`.
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Paths to bring up to date, or all.
    pub targets: Targets,
    /// Report without executing.
    pub dry_run: bool,
    /// Override the configured ignore-deleted policy.
    pub ignore_deleted: Option<bool>,
    /// Executor override.
    pub provider: Option<String>,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            targets: Targets::All,
            dry_run: false,
            ignore_deleted: None,
            provider: None,
        }
    }
}

/// Options for `rerun`.
#[derive(Debug, Clone, Default)]
pub struct RerunOptions {
    /// Paths to regenerate.
    pub paths: Vec<String>,
    /// Limit to activities depending on these inputs.
    pub sources: Vec<String>,
    /// Report without executing.
    pub dry_run: bool,
    /// Execute and commit files without recording activities.
    pub skip_metadata_update: bool,
    /// Executor override.
    pub provider: Option<String>,
}

/// Changes for `workflow edit`.
#[derive(Debug, Clone, Default)]
pub struct PlanEdit {
    /// Rename the plan.
    pub new_name: Option<String>,
    /// Replace the description.
    pub description: Option<String>,
    /// Replace the keywords.
    pub keywords: Option<Vec<String>>,
}

impl PlanEdit {
    /// Whether the edit changes anything.
    pub fn is_empty(&self) -> bool {
        self.new_name.is_none() && self.description.is_none() && self.keywords.is_none()
    }
}

// ============================================================================
// Results
// ============================================================================

/// Result of `init`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitResult {
    /// The initial revision.
    pub revision: RevisionId,
    /// Number of project files captured in it.
    pub tracked_files: usize,
}

/// Result of `run`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    /// The plan executed.
    pub plan_id: PlanId,
    /// The plan's name.
    pub plan_name: String,
    /// Whether a new plan was created (or derived).
    pub new_plan: bool,
    /// The recorded activity.
    pub activity_id: ActivityId,
    /// The commit recording it.
    pub revision: Option<RevisionId>,
    /// Outputs produced.
    pub outputs: Vec<String>,
}

/// One re-executed step.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutedStep {
    /// Plan name.
    pub plan_name: String,
    /// The activity that was re-executed.
    pub source_activity: ActivityId,
    /// The new activity, unless metadata recording was skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_activity: Option<ActivityId>,
    /// Paths written.
    pub outputs: Vec<String>,
}

/// Result of an executed `update` or `rerun`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    /// Steps in execution order.
    pub steps: Vec<ExecutedStep>,
    /// The commit recording them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<RevisionId>,
    /// Deleted outputs that were skipped.
    pub skipped: Vec<String>,
}

impl ExecutionSummary {
    /// Whether nothing ran.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Every path written, deduplicated and sorted.
    pub fn touched_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.steps.iter().flat_map(|s| s.outputs.clone()).collect();
        paths.sort();
        paths.dedup();
        paths
    }
}

/// One line of `log`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Activity id.
    pub activity_id: ActivityId,
    /// Executed plan name (`?` when unknown).
    pub plan_name: String,
    /// When it ended.
    pub ended_at: chrono::DateTime<chrono::Utc>,
    /// Who ran it.
    pub agent: String,
    /// Inputs.
    pub inputs: Vec<String>,
    /// Outputs.
    pub outputs: Vec<String>,
    /// Whether it still takes part in provenance queries.
    pub current: bool,
}

/// Result of `save`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveResult {
    /// The commit, if anything was saved.
    pub revision: Option<RevisionId>,
    /// Paths captured.
    pub paths: Vec<String>,
}

/// What `update` or `rerun` did.
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    /// `--dry-run`: what would run.
    DryRun(DryRunReport),
    /// Steps were executed (possibly none).
    Executed(ExecutionSummary),
}
