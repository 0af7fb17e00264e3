//! Consistency checks over the metadata store and history.
//!
//! Unlike graph construction, which stops at the first inconsistency, the
//! doctor collects every problem it can find.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::graph::GraphBuilder;
use crate::repository::Repository;
use crate::scheduler::plan_batches;
use crate::store::MetadataSnapshot;

/// Category of a problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProblemKind {
    /// An entity references a revision that never captured its path.
    MissingRevision,
    /// An activity references a plan that does not exist.
    UnknownPlan,
    /// A usage/generation/parameter role is not declared on the plan.
    UnknownRole,
    /// A plan derivation chain is broken or loops.
    BrokenDerivation,
    /// The activity graph contains a dependency cycle.
    Cycle,
}

impl std::fmt::Display for ProblemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::MissingRevision => "missing-revision",
            Self::UnknownPlan => "unknown-plan",
            Self::UnknownRole => "unknown-role",
            Self::BrokenDerivation => "broken-derivation",
            Self::Cycle => "cycle",
        };
        write!(f, "{}", s)
    }
}

/// One problem found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Problem {
    /// Category.
    pub kind: ProblemKind,
    /// Details.
    pub message: String,
}

/// Every problem found, in check order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DoctorReport {
    /// The problems.
    pub problems: Vec<Problem>,
}

impl DoctorReport {
    /// Whether nothing is wrong.
    pub fn is_healthy(&self) -> bool {
        self.problems.is_empty()
    }

    fn push(&mut self, kind: ProblemKind, message: String) {
        self.problems.push(Problem { kind, message });
    }
}

/// Run every check.
pub fn diagnose(snapshot: &MetadataSnapshot, repo: &dyn Repository) -> DoctorReport {
    let mut report = DoctorReport::default();
    let mut builder = GraphBuilder::new(repo);
    let mut revisions_ok = true;

    for activity in snapshot.current_activities() {
        let entities = activity
            .usages
            .iter()
            .map(|u| ("usage", &u.entity))
            .chain(activity.generations.iter().map(|g| ("generation", &g.entity)));
        for (what, entity) in entities {
            match builder.revision_position(entity) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    revisions_ok = false;
                    report.push(
                        ProblemKind::MissingRevision,
                        format!(
                            "{} of `{}` by activity {} references unknown revision {}",
                            what,
                            entity.path,
                            activity.id.short(),
                            entity.revision.short()
                        ),
                    );
                }
                Err(e) => {
                    revisions_ok = false;
                    report.push(
                        ProblemKind::MissingRevision,
                        format!("could not read history of `{}`: {}", entity.path, e),
                    );
                }
            }
        }

        match snapshot.plans.get(activity.plan_id()) {
            None => report.push(
                ProblemKind::UnknownPlan,
                format!(
                    "activity {} references unknown plan {}",
                    activity.id.short(),
                    activity.plan_id()
                ),
            ),
            Some(plan) => {
                if let Err(e) = activity.check_roles(plan) {
                    report.push(
                        ProblemKind::UnknownRole,
                        format!("activity {}: {}", activity.id.short(), e),
                    );
                }
            }
        }
    }

    let mut reported_chains = BTreeSet::new();
    for plan in snapshot.plans.all() {
        if let Err(e) = snapshot.plans.derivation_chain(&plan.id) {
            let message = e.to_string();
            if reported_chains.insert(message.clone()) {
                report.push(
                    ProblemKind::BrokenDerivation,
                    format!("plan `{}`: {}", plan.name, message),
                );
            }
        }
    }

    if revisions_ok {
        let activities: Vec<_> = snapshot.current_activities().cloned().collect();
        if let Ok(graph) = GraphBuilder::new(repo).build(&activities) {
            let all: BTreeSet<usize> = (0..graph.len()).collect();
            if let Err(e) = plan_batches(&graph, &all) {
                report.push(ProblemKind::Cycle, e.to_string());
            }
        }
    }

    tracing::debug!("Doctor found {} problem(s)", report.problems.len());
    report
}

// ============================================================================
// Tests
// ============================================================================
