//! Dry-run reports for `update` and `rerun`.
//!
//! A report lists, in execution order, every step that would run with the
//! rendered command, affected paths and every reason it was selected.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::activity::ActivityId;
use crate::errors::ProvflowError;
use crate::execute::applied_plan_for;
use crate::graph::{NodeIndex, ProvenanceGraph};
use crate::plan::PlanArena;
use crate::staleness::{StaleReason, StaleSet};

/// One step that would run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedStep {
    /// Batch index (steps in one batch are independent).
    pub batch: usize,
    /// Plan that would be executed.
    pub plan_name: String,
    /// The activity being re-executed.
    pub activity_id: ActivityId,
    /// Rendered command line.
    pub command: String,
    /// Inputs.
    pub inputs: Vec<String>,
    /// Outputs that would be regenerated.
    pub outputs: Vec<String>,
    /// Why the step is selected.
    pub reasons: Vec<StaleReason>,
}

/// A step left out by the ignore-deleted policy.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedStep {
    /// Plan name.
    pub plan_name: String,
    /// The skipped activity.
    pub activity_id: ActivityId,
    /// Its deleted outputs.
    pub outputs: Vec<String>,
}

/// A missing input that prevents execution.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedStep {
    /// Plan name.
    pub plan_name: String,
    /// The blocked activity.
    pub activity_id: ActivityId,
    /// The missing input.
    pub path: String,
}

/// Everything `--dry-run` prints.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunReport {
    /// Steps in execution order.
    pub steps: Vec<PlannedStep>,
    /// Inputs whose content changed.
    pub modified: BTreeSet<String>,
    /// Deleted outputs.
    pub deleted: BTreeSet<String>,
    /// Steps skipped because their outputs were deleted.
    pub skipped: Vec<SkippedStep>,
    /// Missing inputs blocking execution.
    pub blocked: Vec<BlockedStep>,
}

impl DryRunReport {
    /// Build the report for a stale set.
    pub fn build(
        graph: &ProvenanceGraph,
        stale: &StaleSet,
        plans: &PlanArena,
    ) -> Result<Self, ProvflowError> {
        let plan_name = |node: NodeIndex| -> String {
            plans
                .get(graph.activity(node).plan_id())
                .map(|p| p.name.clone())
                .unwrap_or_else(|| "?".to_string())
        };

        let mut steps = Vec::new();
        for (batch, nodes) in stale.schedule.batches.iter().enumerate() {
            for &node in nodes {
                let activity = graph.activity(node);
                let applied = applied_plan_for(activity, plans)?;
                steps.push(PlannedStep {
                    batch,
                    plan_name: applied.plan_name.clone(),
                    activity_id: activity.id.clone(),
                    command: applied.display_command(),
                    inputs: applied.input_paths().into_iter().map(str::to_string).collect(),
                    outputs: applied.output_paths().into_iter().map(str::to_string).collect(),
                    reasons: stale.reasons_for(node).to_vec(),
                });
            }
        }

        let skipped = stale
            .skipped
            .iter()
            .map(|&node| SkippedStep {
                plan_name: plan_name(node),
                activity_id: graph.activity(node).id.clone(),
                outputs: graph
                    .activity(node)
                    .generation_paths()
                    .map(str::to_string)
                    .collect(),
            })
            .collect();

        let blocked = stale
            .blocked
            .iter()
            .map(|b| BlockedStep {
                plan_name: plan_name(b.node),
                activity_id: graph.activity(b.node).id.clone(),
                path: b.path.clone(),
            })
            .collect();

        Ok(Self {
            steps,
            modified: stale.modified.clone(),
            deleted: stale.deleted.clone(),
            skipped,
            blocked,
        })
    }

    /// Whether nothing would run.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Whether a missing input prevents execution.
    pub fn is_blocked(&self) -> bool {
        !self.blocked.is_empty()
    }

    /// Plan names in execution order.
    pub fn plan_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.plan_name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::{recorded, FakeRepo};
    use crate::graph::GraphBuilder;
    use crate::plan::{CommandArgument, Plan, PlanId};
    use crate::staleness::{AnalysisOptions, StalenessAnalyzer, Targets};

    fn plan_for(seq: u64, name: &str) -> Plan {
        let mut plan = Plan::new(name, "cp")
            .with_input(CommandArgument::new("input-1", "in").at(1))
            .with_output(CommandArgument::new("output-1", "out").at(2));
        plan.id = PlanId::new(format!("plan-{}", seq));
        plan
    }

    fn report(repo: &FakeRepo, graph: &ProvenanceGraph, plans: &PlanArena, ignore_deleted: bool) -> DryRunReport {
        let stale = StalenessAnalyzer::new(graph, repo)
            .compute_stale(&Targets::All, &AnalysisOptions::update(ignore_deleted))
            .unwrap();
        DryRunReport::build(graph, &stale, plans).unwrap()
    }

    #[test]
    fn test_steps_carry_batches_and_commands() {
        // r1: a -> b ; r2: a -> c ; r3: b -> d
        let repo = FakeRepo::default();
        repo.write("a", "1");
        repo.write("b", "1");
        repo.write("c", "1");
        repo.commit_paths("c1", &["a", "b", "c"]);
        let r1 = recorded(&repo, 1, "c1", &["a"], &["b"]);
        let r2 = recorded(&repo, 2, "c1", &["a"], &["c"]);
        repo.write("d", "1");
        repo.commit_paths("c2", &["b", "d"]);
        let r3 = recorded(&repo, 3, "c2", &["b"], &["d"]);
        let graph = GraphBuilder::new(&repo).build(&[r1, r2, r3]).unwrap();
        let plans = PlanArena::from_records(vec![plan_for(1, "r1"), plan_for(2, "r2"), plan_for(3, "r3")]);
        repo.write("a", "2");

        let report = report(&repo, &graph, &plans, false);
        let batches: Vec<(&str, usize)> = report
            .steps
            .iter()
            .map(|s| (s.plan_name.as_str(), s.batch))
            .collect();
        assert_eq!(batches.len(), 3);
        assert!(batches.contains(&("r1", 0)));
        assert!(batches.contains(&("r2", 0)));
        assert_eq!(batches[2], ("r3", 1));

        let r3 = &report.steps[2];
        assert_eq!(r3.command, "cp b d");
        assert_eq!(r3.inputs, vec!["b".to_string()]);
        assert_eq!(r3.outputs, vec!["d".to_string()]);
        assert!(matches!(r3.reasons[0], StaleReason::UpstreamStale { .. }));
        assert!(report.modified.contains("a"));
        assert!(!report.is_blocked());
    }

    #[test]
    fn test_ignore_deleted_lists_skipped_steps() {
        // source -> keep -> kept ; source -> drop -> deleted
        let repo = FakeRepo::default();
        repo.write("source", "1");
        repo.write("kept", "1");
        repo.write("deleted", "1");
        repo.commit_paths("c1", &["source", "kept", "deleted"]);
        let keep = recorded(&repo, 1, "c1", &["source"], &["kept"]);
        let dropped = recorded(&repo, 2, "c1", &["source"], &["deleted"]);
        let graph = GraphBuilder::new(&repo).build(&[keep, dropped]).unwrap();
        let plans = PlanArena::from_records(vec![plan_for(1, "keep"), plan_for(2, "drop")]);
        repo.write("source", "2");
        repo.delete("deleted");

        let report = report(&repo, &graph, &plans, true);
        assert_eq!(report.plan_names(), vec!["keep"]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].plan_name, "drop");
        assert_eq!(report.skipped[0].activity_id, graph.activity(1).id);
        assert_eq!(report.skipped[0].outputs, vec!["deleted".to_string()]);
        assert!(report.deleted.contains("deleted"));
    }

    #[test]
    fn test_missing_source_is_listed_as_blocked() {
        let repo = FakeRepo::default();
        repo.write("source", "1");
        repo.write("out", "1");
        repo.commit_paths("c1", &["source", "out"]);
        let step = recorded(&repo, 1, "c1", &["source"], &["out"]);
        let graph = GraphBuilder::new(&repo).build(&[step]).unwrap();
        let plans = PlanArena::from_records(vec![plan_for(1, "make")]);
        repo.delete("source");

        let report = report(&repo, &graph, &plans, false);
        assert!(report.is_blocked());
        assert_eq!(report.blocked.len(), 1);
        assert_eq!(report.blocked[0].plan_name, "make");
        assert_eq!(report.blocked[0].path, "source");
        assert_eq!(report.blocked[0].activity_id, graph.activity(0).id);
    }
}
