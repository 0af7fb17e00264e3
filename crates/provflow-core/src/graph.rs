//! Provenance graph construction and queries.
//!
//! Nodes are current activities ordered by recency, so a larger node index
//! always means a more recent activity. An edge A→B exists when B used a path
//! whose content version was produced by A. Among several producers of the
//! same path, the edge source is the one whose generation is the latest
//! revision at or before B's usage in `history_of(path)`. This keeps unrelated
//! historical writes from creating false edges.
//!
//! The builder never fails on cycles; the scheduler rejects them.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::activity::{Activity, ActivityId};
use crate::entity::{path_is_within, Entity};
use crate::errors::ProvflowError;
use crate::history::RevisionId;
use crate::repository::Repository;

/// Index of an activity inside a [`ProvenanceGraph`].
pub type NodeIndex = usize;

// ============================================================================
// ProvenanceGraph
// ============================================================================

/// Immutable dependency graph over current activities.
#[derive(Debug, Clone, Default)]
pub struct ProvenanceGraph {
    activities: Vec<Activity>,
    index: HashMap<ActivityId, NodeIndex>,
    successors: Vec<BTreeSet<NodeIndex>>,
    predecessors: Vec<BTreeSet<NodeIndex>>,
    producers: BTreeMap<String, Vec<NodeIndex>>,
    usage_sources: Vec<BTreeMap<String, NodeIndex>>,
}

impl ProvenanceGraph {
    /// Number of activities.
    pub fn len(&self) -> usize {
        self.activities.len()
    }

    /// Whether the graph has no activities.
    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }

    /// The activity at `node`.
    pub fn activity(&self, node: NodeIndex) -> &Activity {
        &self.activities[node]
    }

    /// All activities, oldest first.
    pub fn activities(&self) -> &[Activity] {
        &self.activities
    }

    /// Node of an activity id.
    pub fn node_of(&self, id: &ActivityId) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    /// Activities consuming something `node` produced.
    pub fn successors(&self, node: NodeIndex) -> &BTreeSet<NodeIndex> {
        &self.successors[node]
    }

    /// Activities that produced something `node` consumed.
    pub fn predecessors(&self, node: NodeIndex) -> &BTreeSet<NodeIndex> {
        &self.predecessors[node]
    }

    /// Every edge `(source, target)`.
    pub fn edges(&self) -> impl Iterator<Item = (NodeIndex, NodeIndex)> + '_ {
        self.successors
            .iter()
            .enumerate()
            .flat_map(|(a, succ)| succ.iter().map(move |&b| (a, b)))
    }

    /// Producers of exactly `path`, oldest first.
    pub fn producers_of(&self, path: &str) -> &[NodeIndex] {
        self.producers.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The most recent producer of `path`.
    pub fn latest_producer(&self, path: &str) -> Option<NodeIndex> {
        self.producers_of(path).last().copied()
    }

    /// Generated paths equal to or below `target`, with their producers.
    pub fn generated_within(&self, target: &str) -> Vec<(&str, &[NodeIndex])> {
        self.producers
            .iter()
            .filter(|(path, _)| path_is_within(path, target))
            .map(|(path, nodes)| (path.as_str(), nodes.as_slice()))
            .collect()
    }

    /// Every generated path.
    pub fn generated_paths(&self) -> impl Iterator<Item = &str> {
        self.producers.keys().map(String::as_str)
    }

    /// The activity whose generation `node`'s usage of `path` was bound to.
    pub fn usage_source(&self, node: NodeIndex, path: &str) -> Option<NodeIndex> {
        self.usage_sources[node].get(path).copied()
    }

    /// Activities whose usage of `path` is bound to `node`'s generation.
    pub fn consumers_of(&self, node: NodeIndex, path: &str) -> Vec<NodeIndex> {
        self.successors[node]
            .iter()
            .copied()
            .filter(|&b| self.usage_source(b, path) == Some(node))
            .collect()
    }

    /// Paths through which `target` depends on `source`.
    pub fn edge_paths(&self, source: NodeIndex, target: NodeIndex) -> Vec<&str> {
        self.usage_sources[target]
            .iter()
            .filter(|(_, &s)| s == source)
            .map(|(p, _)| p.as_str())
            .collect()
    }

    /// Whether every output of `node` has a strictly more recent producer.
    ///
    /// An activity without generations is never overridden.
    pub fn is_overridden(&self, node: NodeIndex) -> bool {
        let activity = &self.activities[node];
        !activity.generations.is_empty()
            && activity
                .generation_paths()
                .all(|p| self.latest_producer(p).map_or(false, |latest| latest > node))
    }

    /// `seeds` plus every activity they transitively depend on.
    pub fn upstream_closure(&self, seeds: impl IntoIterator<Item = NodeIndex>) -> BTreeSet<NodeIndex> {
        self.closure(seeds, &self.predecessors)
    }

    /// `seeds` plus every activity transitively depending on them.
    pub fn downstream_closure(
        &self,
        seeds: impl IntoIterator<Item = NodeIndex>,
    ) -> BTreeSet<NodeIndex> {
        self.closure(seeds, &self.successors)
    }

    fn closure(
        &self,
        seeds: impl IntoIterator<Item = NodeIndex>,
        adjacency: &[BTreeSet<NodeIndex>],
    ) -> BTreeSet<NodeIndex> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<NodeIndex> = seeds.into_iter().collect();
        while let Some(node) = stack.pop() {
            if seen.insert(node) {
                stack.extend(adjacency[node].iter().copied());
            }
        }
        seen
    }
}

// ============================================================================
// GraphBuilder
// ============================================================================

/// Builds a [`ProvenanceGraph`], memoizing `history_of` per path.
pub struct GraphBuilder<'r> {
    repo: &'r dyn Repository,
    history: HashMap<String, Vec<RevisionId>>,
}

impl<'r> GraphBuilder<'r> {
    /// Create a builder over `repo`.
    pub fn new(repo: &'r dyn Repository) -> Self {
        Self {
            repo,
            history: HashMap::new(),
        }
    }

    /// Position of `entity.revision` in the history of `entity.path`.
    ///
    /// Also used by `doctor` to check entities without building a graph.
    pub fn revision_position(&mut self, entity: &Entity) -> Result<Option<usize>, ProvflowError> {
        if !self.history.contains_key(&entity.path) {
            let revisions = self.repo.history_of(&entity.path)?;
            self.history.insert(entity.path.clone(), revisions);
        }
        Ok(self.history[&entity.path]
            .iter()
            .position(|r| r == &entity.revision))
    }

    fn require_position(
        &mut self,
        entity: &Entity,
        activity: &Activity,
        what: &str,
    ) -> Result<usize, ProvflowError> {
        self.revision_position(entity)?
            .ok_or_else(|| ProvflowError::GraphCorruption {
                reason: format!(
                    "{} of `{}` by activity {} references revision {} which is not in the history of that path",
                    what,
                    entity.path,
                    activity.id.short(),
                    entity.revision.short()
                ),
            })
    }

    /// Build the graph over the current activities in `activities`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvflowError::GraphCorruption`] if a usage or generation
    /// references a revision that never captured its path.
    pub fn build(mut self, activities: &[Activity]) -> Result<ProvenanceGraph, ProvflowError> {
        let mut nodes: Vec<Activity> = activities.iter().filter(|a| a.is_current()).cloned().collect();
        nodes.sort_by(|a, b| a.recency().cmp(&b.recency()));

        let count = nodes.len();
        let mut index = HashMap::with_capacity(count);
        let mut producers: BTreeMap<String, Vec<NodeIndex>> = BTreeMap::new();
        let mut generation_positions: HashMap<(NodeIndex, String), usize> = HashMap::new();

        for (node, activity) in nodes.iter().enumerate() {
            index.insert(activity.id.clone(), node);
            for generation in &activity.generations {
                let pos = self.require_position(&generation.entity, activity, "generation")?;
                generation_positions.insert((node, generation.entity.path.clone()), pos);
                let entry = producers.entry(generation.entity.path.clone()).or_default();
                if entry.last() != Some(&node) {
                    entry.push(node);
                }
            }
        }

        let mut successors = vec![BTreeSet::new(); count];
        let mut predecessors = vec![BTreeSet::new(); count];
        let mut usage_sources = vec![BTreeMap::new(); count];

        for (b, activity) in nodes.iter().enumerate() {
            for usage in &activity.usages {
                let path = &usage.entity.path;
                let u = self.require_position(&usage.entity, activity, "usage")?;

                let source = producers
                    .get(path)
                    .into_iter()
                    .flatten()
                    .copied()
                    .filter(|&a| a != b)
                    .filter_map(|a| {
                        let g = generation_positions[&(a, path.clone())];
                        (g < u || (g == u && a < b)).then_some((g, a))
                    })
                    .max();

                if let Some((_, a)) = source {
                    successors[a].insert(b);
                    predecessors[b].insert(a);
                    usage_sources[b].insert(path.clone(), a);
                }
            }
        }

        tracing::debug!(
            "Built provenance graph: {} activities, {} paths generated",
            count,
            producers.len()
        );

        Ok(ProvenanceGraph {
            activities: nodes,
            index,
            successors,
            predecessors,
            producers,
            usage_sources,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::activity::Agent;
    use crate::entity::Checksum;
    use crate::plan::PlanId;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Mutex;

    /// In-memory repository: scripted history and working-tree contents.
    #[derive(Default)]
    pub(crate) struct FakeRepo {
        pub history: Mutex<Vec<(RevisionId, Vec<String>)>>,
        pub files: Mutex<HashMap<String, String>>,
    }

    impl FakeRepo {
        pub fn commit_paths(&self, rev: &str, paths: &[&str]) -> RevisionId {
            let id = RevisionId::new(rev);
            self.history
                .lock()
                .unwrap()
                .push((id.clone(), paths.iter().map(|p| p.to_string()).collect()));
            id
        }

        pub fn write(&self, path: &str, content: &str) {
            self.files
                .lock()
                .unwrap()
                .insert(path.to_string(), content.to_string());
        }

        pub fn delete(&self, path: &str) {
            self.files.lock().unwrap().remove(path);
        }
    }

    impl Repository for FakeRepo {
        fn root(&self) -> &std::path::Path {
            std::path::Path::new("/fake")
        }

        fn current_checksum(&self, path: &str) -> Result<Option<Checksum>, ProvflowError> {
            Ok(self
                .files
                .lock()
                .unwrap()
                .get(path)
                .map(|c| Checksum::of_bytes(c.as_bytes())))
        }

        fn history_of(&self, path: &str) -> Result<Vec<RevisionId>, ProvflowError> {
            Ok(self
                .history
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, paths)| paths.iter().any(|p| p == path))
                .map(|(id, _)| id.clone())
                .collect())
        }

        fn head(&self) -> Result<Option<RevisionId>, ProvflowError> {
            Ok(self.history.lock().unwrap().last().map(|(id, _)| id.clone()))
        }

        fn next_revision(&self) -> RevisionId {
            RevisionId::generate()
        }

        fn commit(
            &self,
            revision: &RevisionId,
            paths: &[String],
            _message: &str,
        ) -> Result<(), ProvflowError> {
            self.history
                .lock()
                .unwrap()
                .push((revision.clone(), paths.to_vec()));
            Ok(())
        }
    }

    /// Build an activity `name` that read `inputs` and wrote `outputs` at
    /// revision `rev`, ending `seq` seconds after a fixed epoch.
    pub(crate) fn recorded(
        repo: &FakeRepo,
        seq: i64,
        rev: &str,
        inputs: &[&str],
        outputs: &[&str],
    ) -> Activity {
        let revision = RevisionId::new(rev);
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(seq);
        let mut activity = Activity::new(PlanId::new(format!("plan-{}", seq)), Agent::person("t", None), start, start);
        activity.order_index = seq as u64;
        let files = repo.files.lock().unwrap();
        for (i, input) in inputs.iter().enumerate() {
            let content = files.get(*input).cloned().unwrap_or_default();
            activity = activity.with_usage(
                format!("input-{}", i + 1),
                Entity::new(*input, Checksum::of_bytes(content.as_bytes()), revision.clone()),
            );
        }
        for (i, output) in outputs.iter().enumerate() {
            let content = files.get(*output).cloned().unwrap_or_default();
            activity = activity.with_generation(
                format!("output-{}", i + 1),
                Entity::new(*output, Checksum::of_bytes(content.as_bytes()), revision.clone()),
            );
        }
        activity
    }

    fn chain_repo() -> (FakeRepo, Vec<Activity>) {
        // r1: a -> b ; r2: b -> c ; r3: a -> c
        let repo = FakeRepo::default();
        repo.write("a", "1");
        repo.commit_paths("c0", &["a"]);
        repo.write("b", "1");
        repo.commit_paths("c1", &["a", "b"]);
        let r1 = recorded(&repo, 1, "c1", &["a"], &["b"]);
        repo.write("c", "from b");
        repo.commit_paths("c2", &["b", "c"]);
        let r2 = recorded(&repo, 2, "c2", &["b"], &["c"]);
        repo.write("c", "from a");
        repo.commit_paths("c3", &["a", "c"]);
        let r3 = recorded(&repo, 3, "c3", &["a"], &["c"]);
        (repo, vec![r3, r1, r2])
    }

    #[test]
    fn test_build_orders_by_recency_and_links_edges() {
        let (repo, activities) = chain_repo();
        let graph = GraphBuilder::new(&repo).build(&activities).unwrap();

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.activity(0).order_index, 1);
        assert_eq!(graph.edges().collect::<Vec<_>>(), vec![(0, 1)]);
        assert_eq!(graph.usage_source(1, "b"), Some(0));
        assert_eq!(graph.producers_of("c"), &[1, 2]);
        assert_eq!(graph.latest_producer("c"), Some(2));
        assert_eq!(graph.consumers_of(0, "b"), vec![1]);
        assert_eq!(graph.edge_paths(0, 1), vec!["b"]);
    }

    #[test]
    fn test_override_detection() {
        let (repo, activities) = chain_repo();
        let graph = GraphBuilder::new(&repo).build(&activities).unwrap();

        assert!(!graph.is_overridden(0));
        assert!(graph.is_overridden(1));
        assert!(!graph.is_overridden(2));
    }

    #[test]
    fn test_closures() {
        let (repo, activities) = chain_repo();
        let graph = GraphBuilder::new(&repo).build(&activities).unwrap();

        assert_eq!(graph.upstream_closure([1]), BTreeSet::from([0, 1]));
        assert_eq!(graph.downstream_closure([0]), BTreeSet::from([0, 1]));
        assert_eq!(graph.downstream_closure([2]), BTreeSet::from([2]));
    }

    #[test]
    fn test_usage_before_regeneration_binds_older_producer() {
        // p1 writes x at c1; consumer reads x at c1; p2 rewrites x at c2.
        let repo = FakeRepo::default();
        repo.write("x", "1");
        repo.commit_paths("c1", &["x", "y"]);
        let p1 = recorded(&repo, 1, "c1", &[], &["x"]);
        let consumer = recorded(&repo, 2, "c1", &["x"], &["y"]);
        repo.write("x", "2");
        repo.commit_paths("c2", &["x"]);
        let p2 = recorded(&repo, 3, "c2", &[], &["x"]);

        let graph = GraphBuilder::new(&repo).build(&[p1, consumer, p2]).unwrap();
        assert_eq!(graph.usage_source(1, "x"), Some(0));
        assert!(graph.successors(2).is_empty());
    }

    #[test]
    fn test_same_revision_producer_must_be_older() {
        // Both activities reference the same revision; only the older one
        // can be the source of the newer one's usage.
        let repo = FakeRepo::default();
        repo.commit_paths("c1", &["a", "b"]);
        let writer = recorded(&repo, 1, "c1", &[], &["b"]);
        let reader = recorded(&repo, 2, "c1", &["b"], &["a"]);
        let graph = GraphBuilder::new(&repo).build(&[writer, reader]).unwrap();

        assert_eq!(graph.edges().collect::<Vec<_>>(), vec![(0, 1)]);
    }

    #[test]
    fn test_no_self_edges() {
        let repo = FakeRepo::default();
        repo.commit_paths("c1", &["a"]);
        let inplace = recorded(&repo, 1, "c1", &["a"], &["a"]);
        let graph = GraphBuilder::new(&repo).build(&[inplace]).unwrap();

        assert_eq!(graph.edges().count(), 0);
    }

    #[test]
    fn test_unknown_revision_is_corruption() {
        let repo = FakeRepo::default();
        repo.commit_paths("c1", &["a"]);
        let broken = recorded(&repo, 1, "missing", &["a"], &["b"]);

        let err = GraphBuilder::new(&repo).build(&[broken]).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_invalidated_activities_are_excluded() {
        let (repo, mut activities) = chain_repo();
        activities[0].invalidated_at = Some(Utc::now());
        let graph = GraphBuilder::new(&repo).build(&activities).unwrap();

        assert_eq!(graph.len(), 2);
        assert_eq!(graph.latest_producer("c"), Some(1));
    }

    #[test]
    fn test_generated_within_directory() {
        let repo = FakeRepo::default();
        repo.commit_paths("c1", &["out/a", "out/b", "outside"]);
        let act = recorded(&repo, 1, "c1", &[], &["out/a", "out/b", "outside"]);
        let graph = GraphBuilder::new(&repo).build(&[act]).unwrap();

        let within: Vec<&str> = graph.generated_within("out").iter().map(|(p, _)| *p).collect();
        assert_eq!(within, vec!["out/a", "out/b"]);
    }
}
