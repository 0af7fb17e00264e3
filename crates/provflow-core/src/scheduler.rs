//! Execution planning: Kahn batches over the stale subgraph.
//!
//! Ordering constraints between selected activities:
//! - data edges from the provenance graph;
//! - write-after-write: two selected producers of the same path run in
//!   recency order, so the newest producer's content wins;
//! - write-after-read: a selected reader of a path runs before a newer
//!   selected producer that overwrites it.
//!
//! Each batch holds activities with no constraint among them. Within a batch
//! activities are ordered by start time, then order index.

use std::collections::{BTreeMap, BTreeSet};

use crate::errors::ProvflowError;
use crate::graph::{NodeIndex, ProvenanceGraph};

/// Ordered batches of activities to execute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    /// Batches in dependency order.
    pub batches: Vec<Vec<NodeIndex>>,
}

impl Schedule {
    /// Every scheduled activity in execution order.
    pub fn ordered(&self) -> Vec<NodeIndex> {
        self.batches.iter().flatten().copied().collect()
    }

    /// Total number of scheduled activities.
    pub fn len(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    /// Whether nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// The batch index of `node`, if scheduled.
    pub fn batch_of(&self, node: NodeIndex) -> Option<usize> {
        self.batches.iter().position(|b| b.contains(&node))
    }
}

/// Ordering constraints among `selected`, without self-loops.
fn ordering_edges(
    graph: &ProvenanceGraph,
    selected: &BTreeSet<NodeIndex>,
) -> BTreeSet<(NodeIndex, NodeIndex)> {
    let mut edges = BTreeSet::new();

    for &a in selected {
        for &b in graph.successors(a) {
            if selected.contains(&b) {
                edges.insert((a, b));
            }
        }
    }

    let mut writers: BTreeMap<&str, Vec<NodeIndex>> = BTreeMap::new();
    for &node in selected {
        for path in graph.activity(node).generation_paths() {
            writers.entry(path).or_default().push(node);
        }
    }
    for nodes in writers.values() {
        for pair in nodes.windows(2) {
            edges.insert((pair[0], pair[1]));
        }
    }

    for &reader in selected {
        for path in graph.activity(reader).usage_paths() {
            let source = graph.usage_source(reader, path);
            for &writer in writers.get(path).into_iter().flatten() {
                if writer > reader && Some(writer) != source {
                    edges.insert((reader, writer));
                }
            }
        }
    }

    edges.retain(|(a, b)| a != b);
    edges
}

/// Split `selected` into dependency-ordered batches.
///
/// # Errors
///
/// Returns [`ProvflowError::GraphCorruption`] if the constraints contain a
/// cycle; the message names the activities left unscheduled.
pub fn plan_batches(
    graph: &ProvenanceGraph,
    selected: &BTreeSet<NodeIndex>,
) -> Result<Schedule, ProvflowError> {
    let edges = ordering_edges(graph, selected);

    let mut indegree: BTreeMap<NodeIndex, usize> = selected.iter().map(|&n| (n, 0)).collect();
    let mut successors: BTreeMap<NodeIndex, Vec<NodeIndex>> = BTreeMap::new();
    for &(a, b) in &edges {
        *indegree.entry(b).or_default() += 1;
        successors.entry(a).or_default().push(b);
    }

    let start_key = |n: &NodeIndex| {
        let activity = graph.activity(*n);
        (activity.started_at, activity.order_index)
    };

    let mut batches = Vec::new();
    let mut remaining = selected.len();
    let mut ready: Vec<NodeIndex> = indegree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&n, _)| n)
        .collect();

    while !ready.is_empty() {
        ready.sort_by_key(start_key);
        let mut next = Vec::new();
        for &node in &ready {
            for &succ in successors.get(&node).into_iter().flatten() {
                if let Some(d) = indegree.get_mut(&succ) {
                    *d -= 1;
                    if *d == 0 {
                        next.push(succ);
                    }
                }
            }
        }
        remaining -= ready.len();
        batches.push(std::mem::take(&mut ready));
        ready = next;
    }

    if remaining > 0 {
        let scheduled: BTreeSet<NodeIndex> = batches.iter().flatten().copied().collect();
        let stuck: Vec<String> = selected
            .iter()
            .filter(|n| !scheduled.contains(n))
            .map(|&n| graph.activity(n).id.short().to_string())
            .collect();
        return Err(ProvflowError::GraphCorruption {
            reason: format!("dependency cycle among activities {}", stuck.join(", ")),
        });
    }

    Ok(Schedule { batches })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::{recorded, FakeRepo};
    use crate::graph::GraphBuilder;
    use crate::history::RevisionId;

    fn all(graph: &ProvenanceGraph) -> BTreeSet<NodeIndex> {
        (0..graph.len()).collect()
    }

    fn assert_topological(graph: &ProvenanceGraph, schedule: &Schedule) {
        for (a, b) in graph.edges() {
            if let (Some(ba), Some(bb)) = (schedule.batch_of(a), schedule.batch_of(b)) {
                assert!(ba < bb, "edge {}->{} violates batch order", a, b);
            }
        }
    }

    #[test]
    fn test_chain_is_one_per_batch() {
        let repo = FakeRepo::default();
        repo.commit_paths("c1", &["src", "mid", "out"]);
        let a = recorded(&repo, 1, "c1", &["src"], &["mid"]);
        let b = recorded(&repo, 2, "c1", &["mid"], &["out"]);
        let graph = GraphBuilder::new(&repo).build(&[b, a]).unwrap();

        let schedule = plan_batches(&graph, &all(&graph)).unwrap();
        assert_eq!(schedule.batches, vec![vec![0], vec![1]]);
        assert_eq!(schedule.ordered(), vec![0, 1]);
        assert_topological(&graph, &schedule);
    }

    #[test]
    fn test_independent_activities_share_a_batch() {
        let repo = FakeRepo::default();
        repo.commit_paths("c1", &["a", "b", "c", "d", "e"]);
        let r1 = recorded(&repo, 1, "c1", &["a"], &["b"]);
        let r2 = recorded(&repo, 2, "c1", &["a"], &["c"]);
        let r3 = recorded(&repo, 3, "c1", &["b", "c"], &["d"]);
        let graph = GraphBuilder::new(&repo).build(&[r1, r2, r3]).unwrap();

        let schedule = plan_batches(&graph, &all(&graph)).unwrap();
        assert_eq!(schedule.batches, vec![vec![0, 1], vec![2]]);
        assert_topological(&graph, &schedule);
    }

    #[test]
    fn test_write_after_write_orders_producers() {
        let repo = FakeRepo::default();
        repo.commit_paths("c1", &["a", "b", "c"]);
        repo.commit_paths("c2", &["a", "c"]);
        let older = recorded(&repo, 1, "c1", &["b"], &["c"]);
        let newer = recorded(&repo, 2, "c2", &["a"], &["c"]);
        let graph = GraphBuilder::new(&repo).build(&[older, newer]).unwrap();

        let schedule = plan_batches(&graph, &all(&graph)).unwrap();
        assert_eq!(schedule.batches, vec![vec![0], vec![1]]);
    }

    #[test]
    fn test_write_after_read_runs_reader_first() {
        let repo = FakeRepo::default();
        repo.commit_paths("c1", &["x", "y"]);
        repo.commit_paths("c2", &["x"]);
        let reader = recorded(&repo, 1, "c1", &["x"], &["y"]);
        let writer = recorded(&repo, 2, "c2", &[], &["x"]);
        let graph = GraphBuilder::new(&repo).build(&[writer, reader]).unwrap();

        let schedule = plan_batches(&graph, &all(&graph)).unwrap();
        assert_eq!(schedule.batches, vec![vec![0], vec![1]]);
    }

    #[test]
    fn test_subset_only_schedules_selected() {
        let repo = FakeRepo::default();
        repo.commit_paths("c1", &["src", "mid", "out"]);
        let a = recorded(&repo, 1, "c1", &["src"], &["mid"]);
        let b = recorded(&repo, 2, "c1", &["mid"], &["out"]);
        let graph = GraphBuilder::new(&repo).build(&[a, b]).unwrap();

        let schedule = plan_batches(&graph, &BTreeSet::from([1])).unwrap();
        assert_eq!(schedule.batches, vec![vec![1]]);
        assert!(plan_batches(&graph, &BTreeSet::new()).unwrap().is_empty());
    }

    #[test]
    fn test_cycle_is_corruption() {
        // Each activity claims to have read the other's output at a later
        // revision than the one it wrote its own output in.
        let repo = FakeRepo::default();
        repo.commit_paths("c1", &["x", "y"]);
        repo.commit_paths("c2", &["x", "y"]);
        let mut first = recorded(&repo, 1, "c1", &["y"], &["x"]);
        first.usages[0].entity.revision = RevisionId::new("c2");
        let mut second = recorded(&repo, 2, "c1", &["x"], &["y"]);
        second.usages[0].entity.revision = RevisionId::new("c2");
        let graph = GraphBuilder::new(&repo).build(&[first, second]).unwrap();
        assert_eq!(graph.edges().count(), 2);

        let err = plan_batches(&graph, &all(&graph)).unwrap_err();
        assert!(err.is_corruption());
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_tie_break_by_start_time() {
        let repo = FakeRepo::default();
        repo.commit_paths("c1", &["a", "b", "c"]);
        let mut late = recorded(&repo, 1, "c1", &["a"], &["b"]);
        let early = recorded(&repo, 2, "c1", &["a"], &["c"]);
        late.started_at = early.started_at + chrono::Duration::seconds(10);
        let graph = GraphBuilder::new(&repo).build(&[late, early]).unwrap();

        let schedule = plan_batches(&graph, &all(&graph)).unwrap();
        assert_eq!(schedule.batches.len(), 1);
        assert_eq!(schedule.batches[0], vec![1, 0]);
    }
}
