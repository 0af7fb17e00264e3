//! Executing a schedule and recording the results.
//!
//! Batches run in order. Within a batch, input checksums are captured first,
//! members are dispatched (sequentially, or concurrently with `rayon`), and
//! new activities are then recorded one at a time in batch order, so the
//! staged store only ever sees serial appends.
//!
//! The first failing step stops the run. Successful steps of the failing
//! batch are still recorded.

use chrono::{DateTime, Utc};
use rayon::prelude::*;

use crate::activity::{Activity, ActivityId, Agent};
use crate::context::Transaction;
use crate::entity::{Checksum, Entity};
use crate::errors::ProvflowError;
use crate::executor::{ExecutionOutcome, WorkflowExecutor};
use crate::graph::{NodeIndex, ProvenanceGraph};
use crate::plan::{AppliedPlan, PlanArena};
use crate::repository::Repository;
use crate::scheduler::Schedule;
use crate::store::MetadataStore;
use crate::types::{ExecutedStep, ExecutionSummary};

/// Bind an activity's recorded values to the newest compatible version of
/// its plan.
///
/// # Errors
///
/// Returns [`ProvflowError::PlanNotFound`] when the plan is unknown and
/// [`ProvflowError::InvalidBinding`] when a recorded role is not declared.
pub fn applied_plan_for(activity: &Activity, plans: &PlanArena) -> Result<AppliedPlan, ProvflowError> {
    let plan = plans.latest_compatible(activity.plan_id())?;
    plan.apply(&activity.bindings())
}

/// How a schedule is executed.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionSettings {
    /// Dispatch batch members concurrently.
    pub parallel: bool,
    /// Record new activities (false for `--skip-metadata-update`).
    pub record: bool,
}

/// What happened while executing a schedule.
#[derive(Debug, Default)]
pub struct ExecutionRun {
    /// Completed steps.
    pub summary: ExecutionSummary,
    /// Ids of the new activities.
    pub new_activities: Vec<ActivityId>,
    /// The error that stopped the run, if any.
    pub failure: Option<ProvflowError>,
}

struct Prepared {
    node: NodeIndex,
    applied: AppliedPlan,
    inputs: Vec<CapturedInput>,
}

struct Dispatched {
    prepared: Prepared,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    outcome: Result<ExecutionOutcome, ProvflowError>,
}

/// Run every batch of `schedule` inside `tx`.
///
/// Errors that happen before anything could run (unknown plan, invalid
/// binding) are returned directly; executor failures are reported through
/// [`ExecutionRun::failure`] together with the steps that completed.
pub fn execute_schedule(
    tx: &mut Transaction<'_>,
    graph: &ProvenanceGraph,
    schedule: &Schedule,
    plans: &PlanArena,
    executor: &dyn WorkflowExecutor,
    settings: ExecutionSettings,
) -> Result<ExecutionRun, ProvflowError> {
    let ctx = tx.context();
    let repo = ctx.repository();
    let workdir = ctx.workspace().root().to_path_buf();
    let agent = ctx.agent();

    // Bind everything up front so a broken plan fails before any execution.
    let mut bound = Vec::with_capacity(schedule.batches.len());
    for batch in &schedule.batches {
        let mut applied = Vec::with_capacity(batch.len());
        for &node in batch {
            applied.push((node, applied_plan_for(graph.activity(node), plans)?));
        }
        bound.push(applied);
    }

    let mut run = ExecutionRun::default();
    for (index, batch) in bound.into_iter().enumerate() {
        tracing::debug!("Dispatching batch {} ({} step(s))", index, batch.len());

        let mut prepared = Vec::with_capacity(batch.len());
        for (node, applied) in batch {
            match capture_inputs(repo, &applied)? {
                Ok(inputs) => prepared.push(Prepared {
                    node,
                    applied,
                    inputs,
                }),
                Err(path) => {
                    run.failure = Some(ProvflowError::DeletedDependency {
                        path,
                        activity: graph.activity(node).id.to_string(),
                    });
                    return Ok(run);
                }
            }
        }

        let dispatch = |p: Prepared| -> Dispatched {
            let started_at = Utc::now();
            let outcome = executor.execute(&p.applied, &workdir);
            Dispatched {
                prepared: p,
                started_at,
                ended_at: Utc::now(),
                outcome,
            }
        };
        let dispatched: Vec<Dispatched> = if settings.parallel && prepared.len() > 1 {
            prepared.into_par_iter().map(dispatch).collect()
        } else {
            prepared.into_iter().map(dispatch).collect()
        };

        for step in dispatched {
            let Dispatched {
                prepared,
                started_at,
                ended_at,
                outcome,
            } = step;
            let source = graph.activity(prepared.node);

            let reason = match outcome {
                Ok(outcome) if outcome.success => None,
                Ok(outcome) => Some(outcome.error.unwrap_or_else(|| "unknown failure".to_string())),
                Err(e) => Some(e.to_string()),
            };
            if let Some(reason) = reason {
                tracing::warn!("Step `{}` failed: {}", prepared.applied.plan_name, reason);
                if run.failure.is_none() {
                    run.failure = Some(ProvflowError::ExecutorFailure {
                        plan: prepared.applied.plan_name.clone(),
                        activity: source.id.to_string(),
                        reason,
                        completed: 0,
                    });
                }
                continue;
            }

            let outputs: Vec<String> = prepared
                .applied
                .output_paths()
                .into_iter()
                .map(str::to_string)
                .collect();
            let new_activity = if settings.record {
                let recorded = record_activity(
                    tx,
                    &prepared.applied,
                    &prepared.inputs,
                    &agent,
                    started_at,
                    ended_at,
                )?;
                match recorded {
                    Ok(id) => Some(id),
                    Err(missing) => {
                        if run.failure.is_none() {
                            run.failure = Some(ProvflowError::ExecutorFailure {
                                plan: prepared.applied.plan_name.clone(),
                                activity: source.id.to_string(),
                                reason: format!("output '{}' was not created", missing),
                                completed: 0,
                            });
                        }
                        continue;
                    }
                }
            } else {
                None
            };

            for path in &outputs {
                tx.touch(path.clone());
            }
            run.new_activities.extend(new_activity.clone());
            run.summary.steps.push(ExecutedStep {
                plan_name: prepared.applied.plan_name.clone(),
                source_activity: source.id.clone(),
                new_activity,
                outputs,
            });
        }

        if let Some(ProvflowError::ExecutorFailure { completed, .. }) = run.failure.as_mut() {
            *completed = run.summary.steps.len();
        }
        if run.failure.is_some() {
            break;
        }
    }
    Ok(run)
}

/// Input role, path and checksum captured before dispatch.
pub(crate) type CapturedInput = (String, String, Checksum);

/// Checksum every bound input. The inner `Err` carries a missing path.
pub(crate) fn capture_inputs(
    repo: &dyn Repository,
    applied: &AppliedPlan,
) -> Result<Result<Vec<CapturedInput>, String>, ProvflowError> {
    let mut inputs = Vec::with_capacity(applied.inputs.len());
    for input in &applied.inputs {
        let path = &input.actual_value;
        match repo.current_checksum(path)? {
            Some(checksum) => inputs.push((input.name.clone(), path.clone(), checksum)),
            None => return Ok(Err(path.clone())),
        }
    }
    Ok(Ok(inputs))
}

/// Stage the activity for a finished execution of `applied`.
///
/// Usages and generations reference the transaction's pending revision and
/// their paths join its commit. The inner `Err` carries an output path that
/// does not exist.
pub(crate) fn record_activity(
    tx: &mut Transaction<'_>,
    applied: &AppliedPlan,
    inputs: &[CapturedInput],
    agent: &Agent,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
) -> Result<Result<ActivityId, String>, ProvflowError> {
    let revision = tx.revision().clone();
    let repo = tx.context().repository();

    let mut activity = Activity::new(applied.plan_id.clone(), agent.clone(), started_at, ended_at);
    activity.order_index = tx.store().next_order_index()?;

    for (role, path, checksum) in inputs {
        activity = activity.with_usage(
            role.clone(),
            Entity::new(path.clone(), checksum.clone(), revision.clone()),
        );
    }
    for output in &applied.outputs {
        let path = &output.actual_value;
        let Some(checksum) = repo.current_checksum(path)? else {
            return Ok(Err(path.clone()));
        };
        activity = activity.with_generation(
            output.name.clone(),
            Entity::new(path.clone(), checksum, revision.clone()),
        );
    }
    for parameter in &applied.parameters {
        activity = activity.with_parameter(parameter.name.clone(), parameter.actual_value.clone());
    }

    for path in activity.usage_paths().chain(activity.generation_paths()) {
        tx.touch(path);
    }
    let id = activity.id.clone();
    tx.store_mut().append(activity)?;
    Ok(Ok(id))
}

// ============================================================================
// Tests
// ============================================================================
