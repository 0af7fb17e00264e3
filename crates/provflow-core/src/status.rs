//! Provenance status: which outputs are out of date and why.
//!
//! Status never takes the project lock. It reads a snapshot under the shared
//! metadata lock and analyzes it like `update --all --dry-run` would.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::Serialize;

use crate::graph::ProvenanceGraph;
use crate::history::RevisionId;
use crate::plan::PlanArena;
use crate::staleness::{StaleReason, StaleSet};

/// An output that `update` would regenerate.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaleOutput {
    /// The output path.
    pub path: String,
    /// Plan of the producing activity.
    pub plan_name: String,
    /// Why its producer is stale.
    pub reasons: Vec<StaleReason>,
}

/// A missing input nothing regenerates.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingInput {
    /// The input path.
    pub path: String,
    /// Plan of the blocked activity.
    pub plan_name: String,
}

/// Complete status of a project.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Absolute project root.
    pub project_root: PathBuf,
    /// Latest revision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<RevisionId>,
    /// Number of current activities.
    pub activity_count: usize,
    /// Number of current plans.
    pub plan_count: usize,
    /// Outputs that would be regenerated, sorted by path.
    pub stale_outputs: Vec<StaleOutput>,
    /// Inputs whose content changed.
    pub modified_inputs: BTreeSet<String>,
    /// Generated files that no longer exist.
    pub deleted_outputs: BTreeSet<String>,
    /// Missing inputs that block an update.
    pub missing_inputs: Vec<MissingInput>,
}

impl StatusReport {
    /// Assemble a report from an `update --all` analysis.
    pub fn from_analysis(
        project_root: PathBuf,
        head: Option<RevisionId>,
        graph: &ProvenanceGraph,
        plans: &PlanArena,
        stale: &StaleSet,
    ) -> Self {
        let plan_name = |node| {
            plans
                .get(graph.activity(node).plan_id())
                .map(|p| p.name.clone())
                .unwrap_or_else(|| "?".to_string())
        };

        let mut stale_outputs: Vec<StaleOutput> = stale
            .ordered()
            .into_iter()
            .flat_map(|node| {
                let name = plan_name(node);
                let reasons = stale.reasons_for(node).to_vec();
                graph
                    .activity(node)
                    .generation_paths()
                    .map(move |path| StaleOutput {
                        path: path.to_string(),
                        plan_name: name.clone(),
                        reasons: reasons.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        stale_outputs.sort_by(|a, b| a.path.cmp(&b.path));

        let missing_inputs = stale
            .blocked
            .iter()
            .map(|b| MissingInput {
                path: b.path.clone(),
                plan_name: plan_name(b.node),
            })
            .collect();

        Self {
            project_root,
            head,
            activity_count: graph.len(),
            plan_count: plans.current().count(),
            stale_outputs,
            modified_inputs: stale.modified.clone(),
            deleted_outputs: stale.deleted.clone(),
            missing_inputs,
        }
    }

    /// Whether everything is up to date.
    pub fn is_clean(&self) -> bool {
        self.stale_outputs.is_empty() && self.missing_inputs.is_empty()
    }
}
