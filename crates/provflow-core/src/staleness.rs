//! Staleness analysis for `update` and `rerun`.
//!
//! Given a provenance graph and a target selection, decide which activities
//! must be re-executed and why:
//!
//! 1. Resolve targets to candidate producers. `update` considers every
//!    producer of a target path; `rerun` only the most recent one.
//! 2. The scope is the candidates plus everything upstream of them.
//! 3. `update` marks activities whose inputs changed (content differs, file
//!    deleted, or regenerated by a newer producer) or whose outputs were
//!    deleted, then propagates downstream within the scope. `rerun` marks the
//!    whole scope, optionally narrowed to what depends on `--from` sources.
//! 4. Activities whose every output has a newer producer are dropped.
//! 5. With `ignore_deleted`, activities whose outputs are all deleted and
//!    consumed by nobody are skipped.
//! 6. The result is ordered by the scheduler.
//!
//! Staleness is decided per activity, so every output of a selected activity
//! (its siblings) is regenerated together.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use serde::Serialize;

use crate::activity::ActivityId;
use crate::entity::{path_is_within, Checksum};
use crate::errors::ProvflowError;
use crate::graph::{NodeIndex, ProvenanceGraph};
use crate::repository::Repository;
use crate::scheduler::{plan_batches, Schedule};

// ============================================================================
// Options
// ============================================================================

/// Which outputs the caller wants brought up to date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Targets {
    /// Every activity in the project.
    All,
    /// Project-relative paths (files or directories).
    Paths(Vec<String>),
}

/// Update versus rerun semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisMode {
    /// Re-execute only what is out of date.
    Update,
    /// Re-execute everything leading to the targets.
    Rerun {
        /// Limit to activities downstream of these inputs (`--from`).
        sources: Vec<String>,
    },
}

/// Options for [`StalenessAnalyzer::compute_stale`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisOptions {
    /// Update or rerun.
    pub mode: AnalysisMode,
    /// Skip activities whose outputs were all deleted and are unused.
    pub ignore_deleted: bool,
}

impl AnalysisOptions {
    /// Update semantics.
    pub fn update(ignore_deleted: bool) -> Self {
        Self {
            mode: AnalysisMode::Update,
            ignore_deleted,
        }
    }

    /// Rerun semantics.
    pub fn rerun(sources: Vec<String>, ignore_deleted: bool) -> Self {
        Self {
            mode: AnalysisMode::Rerun { sources },
            ignore_deleted,
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Why an activity is selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StaleReason {
    /// An input's content differs from what was used.
    InputModified {
        /// The input path.
        path: String,
    },
    /// An input no longer exists.
    InputDeleted {
        /// The input path.
        path: String,
    },
    /// An input was regenerated by a newer activity.
    InputRegenerated {
        /// The input path.
        path: String,
        /// The newer producer.
        by: ActivityId,
    },
    /// An upstream activity is stale.
    #[serde(rename_all = "camelCase")]
    UpstreamStale {
        /// The stale upstream activity.
        upstream: ActivityId,
        /// Paths linking the two.
        paths: Vec<String>,
    },
    /// An output no longer exists.
    OutputDeleted {
        /// The output path.
        path: String,
    },
    /// Selected by `rerun`.
    Requested,
}

impl std::fmt::Display for StaleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InputModified { path } => write!(f, "input '{}' modified", path),
            Self::InputDeleted { path } => write!(f, "input '{}' deleted", path),
            Self::InputRegenerated { path, by } => {
                write!(f, "input '{}' regenerated by {}", path, by.short())
            }
            Self::UpstreamStale { upstream, paths } => write!(
                f,
                "upstream {} is stale ({})",
                upstream.short(),
                paths.join(", ")
            ),
            Self::OutputDeleted { path } => write!(f, "output '{}' deleted", path),
            Self::Requested => write!(f, "requested"),
        }
    }
}

/// A kept activity's missing input that nothing in the run recreates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedInput {
    /// The blocked activity.
    pub node: NodeIndex,
    /// The missing input path.
    pub path: String,
}

/// Outcome of an analysis.
#[derive(Debug, Clone, Default)]
pub struct StaleSet {
    /// Selected activities in batches, dependency order.
    pub schedule: Schedule,
    /// Every reason per selected activity.
    pub reasons: BTreeMap<NodeIndex, Vec<StaleReason>>,
    /// Deleted outputs of selected or skipped activities.
    pub deleted: BTreeSet<String>,
    /// Inputs whose content changed.
    pub modified: BTreeSet<String>,
    /// Activities skipped by the ignore-deleted policy.
    pub skipped: Vec<NodeIndex>,
    /// Activities dropped because newer producers cover all their outputs.
    pub overridden: Vec<NodeIndex>,
    /// Missing inputs that block execution.
    pub blocked: Vec<BlockedInput>,
}

impl StaleSet {
    /// Selected activities in execution order.
    pub fn ordered(&self) -> Vec<NodeIndex> {
        self.schedule.ordered()
    }

    /// Whether nothing needs to run.
    pub fn is_empty(&self) -> bool {
        self.schedule.is_empty()
    }

    /// Whether `node` was selected.
    pub fn contains(&self, node: NodeIndex) -> bool {
        self.schedule.batch_of(node).is_some()
    }

    /// Reasons recorded for `node`.
    pub fn reasons_for(&self, node: NodeIndex) -> &[StaleReason] {
        self.reasons.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }
}

// ============================================================================
// StalenessAnalyzer
// ============================================================================

/// Computes stale sets against the current working tree.
///
/// Current checksums are memoized, so one analyzer reflects one consistent
/// view of the working tree.
pub struct StalenessAnalyzer<'a> {
    graph: &'a ProvenanceGraph,
    repo: &'a dyn Repository,
    current: HashMap<String, Option<Checksum>>,
}

impl<'a> StalenessAnalyzer<'a> {
    /// Create an analyzer.
    pub fn new(graph: &'a ProvenanceGraph, repo: &'a dyn Repository) -> Self {
        Self {
            graph,
            repo,
            current: HashMap::new(),
        }
    }

    fn current(&mut self, path: &str) -> Result<Option<Checksum>, ProvflowError> {
        if let Some(cached) = self.current.get(path) {
            return Ok(cached.clone());
        }
        let checksum = self.repo.current_checksum(path)?;
        self.current.insert(path.to_string(), checksum.clone());
        Ok(checksum)
    }

    fn exists(&mut self, path: &str) -> Result<bool, ProvflowError> {
        Ok(self.current(path)?.is_some())
    }

    /// Compute the stale set for `targets`.
    ///
    /// # Errors
    ///
    /// - [`ProvflowError::PathNotGenerated`] if a target has no producer.
    /// - [`ProvflowError::InvalidArgument`] if `--from` sources select nothing.
    /// - [`ProvflowError::GraphCorruption`] if the selection cannot be ordered.
    pub fn compute_stale(
        &mut self,
        targets: &Targets,
        options: &AnalysisOptions,
    ) -> Result<StaleSet, ProvflowError> {
        let graph = self.graph;
        let candidates = self.resolve_targets(targets, &options.mode)?;
        let scope = graph.upstream_closure(candidates);

        let mut result = StaleSet::default();
        for &node in &scope {
            let reasons = self.direct_reasons(node, &mut result.modified)?;
            if !reasons.is_empty() {
                result.reasons.insert(node, reasons);
            }
        }

        let mut selected = match &options.mode {
            AnalysisMode::Update => {
                let seeds: Vec<NodeIndex> = result
                    .reasons
                    .keys()
                    .copied()
                    .filter(|&n| !graph.is_overridden(n))
                    .collect();
                self.propagate(seeds, &scope, &mut result.reasons)
            }
            AnalysisMode::Rerun { sources } => {
                let selected = if sources.is_empty() {
                    scope.clone()
                } else {
                    let seeds: Vec<NodeIndex> = scope
                        .iter()
                        .copied()
                        .filter(|&n| {
                            graph
                                .activity(n)
                                .usage_paths()
                                .any(|p| sources.iter().any(|s| path_is_within(p, s)))
                        })
                        .collect();
                    if seeds.is_empty() {
                        return Err(ProvflowError::InvalidArgument(format!(
                            "None of the selected workflows uses {}",
                            sources
                                .iter()
                                .map(|s| format!("'{}'", s))
                                .collect::<Vec<_>>()
                                .join(", ")
                        )));
                    }
                    graph
                        .downstream_closure(seeds)
                        .intersection(&scope)
                        .copied()
                        .collect()
                };
                for &node in &selected {
                    result.reasons.entry(node).or_default().insert(0, StaleReason::Requested);
                }
                selected
            }
        };

        // Override rule.
        for &node in &scope {
            if graph.is_overridden(node) {
                tracing::debug!(
                    "Skipping activity {}: every output has a newer producer",
                    graph.activity(node).id.short()
                );
                result.overridden.push(node);
                selected.remove(&node);
            }
        }

        // Deleted outputs.
        let mut removable = Vec::new();
        for &node in &selected {
            let activity = graph.activity(node);
            let mut all_deleted = !activity.generations.is_empty();
            for path in activity.generation_paths() {
                if self.exists(path)? {
                    all_deleted = false;
                } else {
                    result.deleted.insert(path.to_string());
                }
            }
            if options.ignore_deleted && all_deleted && !self.has_live_consumer(node) {
                removable.push(node);
            }
        }
        for node in removable {
            tracing::debug!(
                "Ignoring activity {}: all outputs deleted and unused",
                graph.activity(node).id.short()
            );
            selected.remove(&node);
            result.skipped.push(node);
        }

        // Missing inputs not recreated by the selection.
        let regenerated: BTreeSet<&str> = selected
            .iter()
            .flat_map(|&n| graph.activity(n).generation_paths())
            .collect();
        for &node in &selected {
            for path in graph.activity(node).usage_paths() {
                if !self.exists(path)? && !regenerated.contains(path) {
                    result.blocked.push(BlockedInput {
                        node,
                        path: path.to_string(),
                    });
                }
            }
        }

        result.reasons.retain(|node, _| selected.contains(node));
        result.schedule = plan_batches(graph, &selected)?;
        Ok(result)
    }

    /// Candidate producers for the targets.
    fn resolve_targets(
        &self,
        targets: &Targets,
        mode: &AnalysisMode,
    ) -> Result<BTreeSet<NodeIndex>, ProvflowError> {
        let graph = self.graph;
        let latest_only = matches!(mode, AnalysisMode::Rerun { .. });

        match targets {
            Targets::All => Ok((0..graph.len())
                .filter(|&n| !latest_only || !graph.is_overridden(n))
                .collect()),
            Targets::Paths(paths) => {
                let mut candidates = BTreeSet::new();
                for target in paths {
                    let generated = graph.generated_within(target);
                    if generated.is_empty() {
                        return Err(ProvflowError::PathNotGenerated {
                            path: target.clone(),
                        });
                    }
                    for (_, producers) in generated {
                        if latest_only {
                            candidates.extend(producers.last().copied());
                        } else {
                            candidates.extend(producers.iter().copied());
                        }
                    }
                }
                Ok(candidates)
            }
        }
    }

    /// Reasons that make `node` stale on its own.
    fn direct_reasons(
        &mut self,
        node: NodeIndex,
        modified: &mut BTreeSet<String>,
    ) -> Result<Vec<StaleReason>, ProvflowError> {
        let graph = self.graph;
        let activity = graph.activity(node);
        let mut reasons = Vec::new();

        for usage in &activity.usages {
            let path = &usage.entity.path;
            match self.current(path)? {
                None => reasons.push(StaleReason::InputDeleted { path: path.clone() }),
                Some(checksum) if checksum != usage.entity.checksum => {
                    modified.insert(path.clone());
                    reasons.push(StaleReason::InputModified { path: path.clone() });
                }
                Some(_) => {}
            }

            if let Some(latest) = graph.latest_producer(path) {
                if latest != node && Some(latest) != graph.usage_source(node, path) {
                    reasons.push(StaleReason::InputRegenerated {
                        path: path.clone(),
                        by: graph.activity(latest).id.clone(),
                    });
                }
            }
        }

        for path in activity.generation_paths() {
            if !self.exists(path)? {
                reasons.push(StaleReason::OutputDeleted {
                    path: path.to_string(),
                });
            }
        }

        Ok(reasons)
    }

    /// Seeds plus everything downstream of them inside `scope`, recording an
    /// `UpstreamStale` reason per traversed edge.
    fn propagate(
        &self,
        seeds: Vec<NodeIndex>,
        scope: &BTreeSet<NodeIndex>,
        reasons: &mut BTreeMap<NodeIndex, Vec<StaleReason>>,
    ) -> BTreeSet<NodeIndex> {
        let graph = self.graph;
        let mut stale = BTreeSet::new();
        let mut queue: VecDeque<NodeIndex> = seeds.into_iter().collect();

        while let Some(node) = queue.pop_front() {
            if !stale.insert(node) {
                continue;
            }
            for &succ in graph.successors(node) {
                if !scope.contains(&succ) || graph.is_overridden(succ) {
                    continue;
                }
                reasons.entry(succ).or_default().push(StaleReason::UpstreamStale {
                    upstream: graph.activity(node).id.clone(),
                    paths: graph
                        .edge_paths(node, succ)
                        .into_iter()
                        .map(str::to_string)
                        .collect(),
                });
                queue.push_back(succ);
            }
        }
        stale
    }

    /// Whether a non-overridden activity consumes one of `node`'s outputs.
    fn has_live_consumer(&self, node: NodeIndex) -> bool {
        let graph = self.graph;
        graph.activity(node).generation_paths().any(|path| {
            graph
                .consumers_of(node, path)
                .into_iter()
                .any(|c| !graph.is_overridden(c))
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
