//! Plans: immutable command templates and their derivation lineage.
//!
//! A [`Plan`] describes a parameterized command (inputs, outputs,
//! parameters). Plans are never mutated: a structural edit produces a new
//! plan whose `derived_from` points at the previous one, and the previous
//! one is soft-invalidated. Concrete values only exist on an
//! [`AppliedPlan`], built transiently when an activity is (re-)executed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ProvflowError;

// ============================================================================
// PlanId
// ============================================================================

/// Unique plan identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(String);

impl PlanId {
    /// Create a plan ID from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique plan ID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PlanId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

// ============================================================================
// Command arguments
// ============================================================================

/// Standard stream an input or output is bound to instead of argv.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappedStream {
    /// Read from stdin.
    Stdin,
    /// Written to stdout.
    Stdout,
    /// Written to stderr.
    Stderr,
}

/// Which list of a plan an argument belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgumentKind {
    /// A file or directory consumed.
    Input,
    /// A file or directory produced.
    Output,
    /// A plain value.
    Parameter,
}

impl std::fmt::Display for ArgumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
            Self::Parameter => write!(f, "parameter"),
        }
    }
}

/// Design-time description of one argument of a command.
///
/// Carries only the default value. The value used by a concrete execution
/// lives on [`BoundArgument`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandArgument {
    /// Unique argument id.
    pub id: String,
    /// Role name, unique within the plan.
    pub name: String,
    /// Position in argv (1-based after the command), if positional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
    /// Flag emitted before the value (`--out`, or `--out=` to concatenate).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// Value used when an execution does not bind this role.
    pub default_value: String,
    /// Stream mapping, for inputs and outputs only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapped_to: Option<MappedStream>,
    /// Free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A file or directory consumed by a plan.
pub type CommandInput = CommandArgument;
/// A file or directory produced by a plan.
pub type CommandOutput = CommandArgument;
/// A value passed to a plan.
pub type CommandParameter = CommandArgument;

impl CommandArgument {
    /// Create an argument with a generated id.
    pub fn new(name: impl Into<String>, default_value: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            position: None,
            prefix: None,
            default_value: default_value.into(),
            mapped_to: None,
            description: None,
        }
    }

    /// Set the argv position.
    pub fn at(mut self, position: u32) -> Self {
        self.position = Some(position);
        self
    }

    /// Set the flag prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Map to a standard stream.
    pub fn mapped(mut self, stream: MappedStream) -> Self {
        self.mapped_to = Some(stream);
        self
    }

    fn same_shape(&self, other: &Self) -> bool {
        self.name == other.name
            && self.position == other.position
            && self.prefix == other.prefix
            && self.mapped_to == other.mapped_to
    }
}

/// Role name → value, for one execution.
pub type Bindings = BTreeMap<String, String>;

// ============================================================================
// Plan
// ============================================================================

/// An immutable command template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    /// Unique plan ID.
    pub id: PlanId,
    /// Human-readable name (`r1`, `train-model`).
    pub name: String,
    /// Free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Base command (program plus fixed leading tokens).
    pub command: String,
    /// Consumed files.
    #[serde(default)]
    pub inputs: Vec<CommandInput>,
    /// Produced files.
    #[serde(default)]
    pub outputs: Vec<CommandOutput>,
    /// Plain values.
    #[serde(default)]
    pub parameters: Vec<CommandParameter>,
    /// Authors.
    #[serde(default)]
    pub creators: Vec<String>,
    /// Search keywords.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Creation time.
    pub created_date: DateTime<Utc>,
    /// The plan this one was derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_from: Option<PlanId>,
    /// Set when superseded; excluded from current queries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalidated_at: Option<DateTime<Utc>>,
}

impl Plan {
    /// Create a new plan with no arguments.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: PlanId::generate(),
            name: name.into(),
            description: None,
            command: command.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            parameters: Vec::new(),
            creators: Vec::new(),
            keywords: Vec::new(),
            created_date: Utc::now(),
            derived_from: None,
            invalidated_at: None,
        }
    }

    /// Add an input.
    pub fn with_input(mut self, input: CommandInput) -> Self {
        self.inputs.push(input);
        self
    }

    /// Add an output.
    pub fn with_output(mut self, output: CommandOutput) -> Self {
        self.outputs.push(output);
        self
    }

    /// Add a parameter.
    pub fn with_parameter(mut self, parameter: CommandParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Whether the plan is current (not invalidated).
    pub fn is_current(&self) -> bool {
        self.invalidated_at.is_none()
    }

    /// Look up an argument by role name in the given list.
    pub fn argument(&self, kind: ArgumentKind, name: &str) -> Option<&CommandArgument> {
        self.arguments(kind).iter().find(|a| a.name == name)
    }

    /// The arguments of one kind.
    pub fn arguments(&self, kind: ArgumentKind) -> &[CommandArgument] {
        match kind {
            ArgumentKind::Input => &self.inputs,
            ArgumentKind::Output => &self.outputs,
            ArgumentKind::Parameter => &self.parameters,
        }
    }

    /// Whether `other` renders the same command line shape.
    pub fn same_structure(&self, other: &Plan) -> bool {
        fn same(a: &[CommandArgument], b: &[CommandArgument]) -> bool {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_shape(y))
        }
        self.command == other.command
            && same(&self.inputs, &other.inputs)
            && same(&self.outputs, &other.outputs)
            && same(&self.parameters, &other.parameters)
    }

    /// Whether bindings recorded against `other` can be applied to `self`
    /// (same role names per kind).
    pub fn is_compatible_with(&self, other: &Plan) -> bool {
        fn names(args: &[CommandArgument]) -> HashSet<&str> {
            args.iter().map(|a| a.name.as_str()).collect()
        }
        names(&self.inputs) == names(&other.inputs)
            && names(&self.outputs) == names(&other.outputs)
            && names(&self.parameters) == names(&other.parameters)
    }

    /// A new plan version derived from this one (fresh id, `derived_from` set).
    pub fn derive(&self) -> Plan {
        Plan {
            id: PlanId::generate(),
            created_date: Utc::now(),
            derived_from: Some(self.id.clone()),
            invalidated_at: None,
            ..self.clone()
        }
    }

    /// A copy of this plan record marked invalidated at `at`.
    pub fn invalidated(&self, at: DateTime<Utc>) -> Plan {
        Plan {
            invalidated_at: Some(at),
            ..self.clone()
        }
    }

    /// Bind concrete values, producing the transient applied view.
    ///
    /// Unbound roles fall back to their default value.
    ///
    /// # Errors
    ///
    /// Returns [`ProvflowError::InvalidBinding`] if `bindings` names a role the
    /// plan does not declare.
    pub fn apply(&self, bindings: &Bindings) -> Result<AppliedPlan, ProvflowError> {
        for role in bindings.keys() {
            let known = [ArgumentKind::Input, ArgumentKind::Output, ArgumentKind::Parameter]
                .iter()
                .any(|k| self.argument(*k, role).is_some());
            if !known {
                return Err(ProvflowError::InvalidBinding {
                    plan: self.name.clone(),
                    role: role.clone(),
                });
            }
        }

        let bind = |args: &[CommandArgument]| -> Vec<BoundArgument> {
            args.iter()
                .map(|a| BoundArgument {
                    name: a.name.clone(),
                    position: a.position,
                    prefix: a.prefix.clone(),
                    mapped_to: a.mapped_to,
                    actual_value: bindings
                        .get(&a.name)
                        .cloned()
                        .unwrap_or_else(|| a.default_value.clone()),
                })
                .collect()
        };

        Ok(AppliedPlan {
            plan_id: self.id.clone(),
            plan_name: self.name.clone(),
            command: self.command.clone(),
            inputs: bind(&self.inputs),
            outputs: bind(&self.outputs),
            parameters: bind(&self.parameters),
        })
    }
}

// ============================================================================
// AppliedPlan
// ============================================================================

/// An argument with the value used for one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundArgument {
    /// Role name.
    pub name: String,
    /// Argv position, if positional.
    pub position: Option<u32>,
    /// Flag prefix.
    pub prefix: Option<String>,
    /// Stream mapping.
    pub mapped_to: Option<MappedStream>,
    /// The concrete value.
    pub actual_value: String,
}

/// A plan bound to concrete values; what executors receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedPlan {
    /// The bound plan.
    pub plan_id: PlanId,
    /// The bound plan's name.
    pub plan_name: String,
    /// Base command.
    pub command: String,
    /// Bound inputs.
    pub inputs: Vec<BoundArgument>,
    /// Bound outputs.
    pub outputs: Vec<BoundArgument>,
    /// Bound parameters.
    pub parameters: Vec<BoundArgument>,
}

impl AppliedPlan {
    fn all(&self) -> impl Iterator<Item = &BoundArgument> {
        self.inputs
            .iter()
            .chain(self.outputs.iter())
            .chain(self.parameters.iter())
    }

    /// The full argument vector: base command tokens, positional arguments in
    /// position order, then prefixed non-positional arguments.
    ///
    /// Stream-mapped arguments and non-positional arguments without a prefix
    /// are not part of argv.
    pub fn argv(&self) -> Vec<String> {
        let mut argv: Vec<String> = self.command.split_whitespace().map(str::to_string).collect();

        let mut positional: Vec<&BoundArgument> = self
            .all()
            .filter(|a| a.mapped_to.is_none() && a.position.is_some())
            .collect();
        positional.sort_by_key(|a| a.position);

        let flagged = self
            .all()
            .filter(|a| a.mapped_to.is_none() && a.position.is_none() && a.prefix.is_some());

        for arg in positional.into_iter().chain(flagged) {
            match &arg.prefix {
                Some(prefix) if prefix.ends_with('=') => {
                    argv.push(format!("{}{}", prefix, arg.actual_value))
                }
                Some(prefix) => {
                    argv.push(prefix.trim().to_string());
                    argv.push(arg.actual_value.clone());
                }
                None => argv.push(arg.actual_value.clone()),
            }
        }
        argv
    }

    fn stream(&self, stream: MappedStream) -> Option<&str> {
        self.inputs
            .iter()
            .chain(self.outputs.iter())
            .find(|a| a.mapped_to == Some(stream))
            .map(|a| a.actual_value.as_str())
    }

    /// File redirected to stdin.
    pub fn stdin(&self) -> Option<&str> {
        self.stream(MappedStream::Stdin)
    }

    /// File receiving stdout.
    pub fn stdout(&self) -> Option<&str> {
        self.stream(MappedStream::Stdout)
    }

    /// File receiving stderr.
    pub fn stderr(&self) -> Option<&str> {
        self.stream(MappedStream::Stderr)
    }

    /// Paths of all bound inputs.
    pub fn input_paths(&self) -> Vec<&str> {
        self.inputs.iter().map(|a| a.actual_value.as_str()).collect()
    }

    /// Paths of all bound outputs.
    pub fn output_paths(&self) -> Vec<&str> {
        self.outputs.iter().map(|a| a.actual_value.as_str()).collect()
    }

    /// Shell-like rendering for reports (`cp a b > c`).
    pub fn display_command(&self) -> String {
        let mut rendered = self.argv().join(" ");
        if let Some(stdin) = self.stdin() {
            rendered.push_str(&format!(" < {}", stdin));
        }
        if let Some(stdout) = self.stdout() {
            rendered.push_str(&format!(" > {}", stdout));
        }
        if let Some(stderr) = self.stderr() {
            rendered.push_str(&format!(" 2> {}", stderr));
        }
        rendered
    }
}

// ============================================================================
// PlanArena
// ============================================================================

/// All plan records indexed by id.
///
/// Derivation is stored as a forward pointer (`derived_from`, child → parent).
/// Walking from an old plan to its newer versions goes through an explicit
/// reverse index built once at load time.
#[derive(Debug, Default, Clone)]
pub struct PlanArena {
    plans: HashMap<PlanId, Plan>,
    order: Vec<PlanId>,
    derivatives: HashMap<PlanId, Vec<PlanId>>,
}

impl PlanArena {
    /// Build from store records; a later record with the same id replaces an
    /// earlier one.
    pub fn from_records(records: impl IntoIterator<Item = Plan>) -> Self {
        let mut arena = Self::default();
        for plan in records {
            if !arena.plans.contains_key(&plan.id) {
                arena.order.push(plan.id.clone());
            }
            arena.plans.insert(plan.id.clone(), plan);
        }
        for id in &arena.order {
            if let Some(parent) = arena.plans.get(id).and_then(|p| p.derived_from.clone()) {
                arena.derivatives.entry(parent).or_default().push(id.clone());
            }
        }
        arena
    }

    /// Number of distinct plans.
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    /// Whether the arena is empty.
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Look up a plan.
    pub fn get(&self, id: &PlanId) -> Option<&Plan> {
        self.plans.get(id)
    }

    /// Look up a plan or fail with [`ProvflowError::PlanNotFound`].
    pub fn require(&self, id: &PlanId) -> Result<&Plan, ProvflowError> {
        self.get(id)
            .ok_or_else(|| ProvflowError::PlanNotFound(id.to_string()))
    }

    /// Every plan, in first-seen order.
    pub fn all(&self) -> impl Iterator<Item = &Plan> {
        self.order.iter().filter_map(|id| self.plans.get(id))
    }

    /// Plans that are not invalidated.
    pub fn current(&self) -> impl Iterator<Item = &Plan> {
        self.all().filter(|p| p.is_current())
    }

    /// The current plan with `name`, newest first if several exist.
    pub fn find_current(&self, name: &str) -> Option<&Plan> {
        self.current()
            .filter(|p| p.name == name)
            .max_by_key(|p| p.created_date)
    }

    /// Resolve a user reference: current plan name, or id / id prefix.
    pub fn resolve(&self, reference: &str) -> Result<&Plan, ProvflowError> {
        if let Some(plan) = self.find_current(reference) {
            return Ok(plan);
        }
        if let Some(plan) = self.plans.get(&PlanId::new(reference)) {
            return Ok(plan);
        }
        let matches: Vec<&Plan> = if reference.len() >= 6 {
            self.all()
                .filter(|p| p.id.as_str().starts_with(reference))
                .collect()
        } else {
            Vec::new()
        };
        match matches.as_slice() {
            [plan] => Ok(plan),
            _ => Err(ProvflowError::PlanNotFound(reference.to_string())),
        }
    }

    /// The plan and its ancestors, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`ProvflowError::GraphCorruption`] if a parent is missing or the
    /// chain loops.
    pub fn derivation_chain(&self, id: &PlanId) -> Result<Vec<&Plan>, ProvflowError> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(id.clone());

        while let Some(current) = next {
            if !seen.insert(current.clone()) {
                return Err(ProvflowError::GraphCorruption {
                    reason: format!("derivation chain of plan {} loops at {}", id, current),
                });
            }
            let plan = self.plans.get(&current).ok_or_else(|| ProvflowError::GraphCorruption {
                reason: format!(
                    "derivation chain of plan {} references missing plan {}",
                    id, current
                ),
            })?;
            chain.push(plan);
            next = plan.derived_from.clone();
        }
        Ok(chain)
    }

    /// The newest plan derived (transitively) from `id` whose bindings are
    /// compatible with `id`; `id` itself when there is none.
    pub fn latest_compatible(&self, id: &PlanId) -> Result<&Plan, ProvflowError> {
        let origin = self.require(id)?;
        let mut best = origin;
        let mut seen = HashSet::new();
        let mut frontier = vec![id.clone()];

        while let Some(current) = frontier.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            for child_id in self.derivatives.get(&current).into_iter().flatten() {
                if let Some(child) = self.plans.get(child_id) {
                    if child.is_compatible_with(origin) && child.created_date >= best.created_date {
                        best = child;
                    }
                    frontier.push(child_id.clone());
                }
            }
        }
        Ok(best)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn copy_plan() -> Plan {
        Plan::new("r1", "cp")
            .with_input(CommandArgument::new("input-1", "a").at(1))
            .with_output(CommandArgument::new("output-2", "b").at(2))
    }

    #[test]
    fn test_apply_uses_bindings_and_defaults() {
        let plan = copy_plan();
        let mut bindings = Bindings::new();
        bindings.insert("input-1".to_string(), "data/a.csv".to_string());

        let applied = plan.apply(&bindings).unwrap();
        assert_eq!(applied.argv(), vec!["cp", "data/a.csv", "b"]);
        assert_eq!(applied.input_paths(), vec!["data/a.csv"]);
        // The shared plan keeps its design-time value.
        assert_eq!(plan.inputs[0].default_value, "a");
    }

    #[test]
    fn test_apply_rejects_unknown_role() {
        let mut bindings = Bindings::new();
        bindings.insert("input-9".to_string(), "x".to_string());
        assert!(matches!(
            copy_plan().apply(&bindings),
            Err(ProvflowError::InvalidBinding { .. })
        ));
    }

    #[test]
    fn test_argv_prefixes_and_streams() {
        let plan = Plan::new("wc", "python run.py")
            .with_input(CommandArgument::new("input-stdin", "in.txt").mapped(MappedStream::Stdin))
            .with_output(CommandArgument::new("output-stdout", "out.txt").mapped(MappedStream::Stdout))
            .with_parameter(CommandArgument::new("parameter-3", "5").with_prefix("--n="))
            .with_parameter(CommandArgument::new("parameter-2", "fast").with_prefix("--mode"))
            .with_parameter(CommandArgument::new("parameter-1", "x").at(1));

        let applied = plan.apply(&Bindings::new()).unwrap();
        assert_eq!(
            applied.argv(),
            vec!["python", "run.py", "x", "--n=5", "--mode", "fast"]
        );
        assert_eq!(applied.stdin(), Some("in.txt"));
        assert_eq!(applied.stdout(), Some("out.txt"));
        assert_eq!(
            applied.display_command(),
            "python run.py x --n=5 --mode fast < in.txt > out.txt"
        );
    }

    #[test]
    fn test_structure_and_compatibility() {
        let a = copy_plan();
        let mut b = a.derive();
        assert!(a.same_structure(&b));
        assert!(a.is_compatible_with(&b));

        b.outputs[0].position = Some(3);
        assert!(!a.same_structure(&b));
        assert!(a.is_compatible_with(&b));

        b.outputs[0].name = "output-3".to_string();
        assert!(!a.is_compatible_with(&b));
    }

    #[test]
    fn test_arena_last_record_wins() {
        let plan = copy_plan();
        let invalidated = plan.invalidated(Utc::now());
        let arena = PlanArena::from_records(vec![plan.clone(), invalidated]);

        assert_eq!(arena.len(), 1);
        assert!(arena.find_current("r1").is_none());
        assert!(!arena.get(&plan.id).unwrap().is_current());
    }

    #[test]
    fn test_arena_derivation_chain_and_latest() {
        let v1 = copy_plan();
        let mut v2 = v1.derive();
        v2.created_date = v1.created_date + Duration::seconds(1);
        v2.description = Some("second".to_string());
        let mut v3 = v2.derive();
        v3.created_date = v2.created_date + Duration::seconds(1);
        v3.inputs[0].name = "source".to_string();

        let arena = PlanArena::from_records(vec![
            v1.clone(),
            v2.clone(),
            v3.clone(),
            v1.invalidated(Utc::now()),
            v2.invalidated(Utc::now()),
        ]);
        assert_eq!(arena.current().count(), 1);

        let chain: Vec<&str> = arena
            .derivation_chain(&v3.id)
            .unwrap()
            .iter()
            .map(|p| p.id.as_str())
            .collect();
        assert_eq!(chain, vec![v3.id.as_str(), v2.id.as_str(), v1.id.as_str()]);

        // v3 renamed a role, so v2 is the newest version v1 bindings fit.
        assert_eq!(arena.latest_compatible(&v1.id).unwrap().id, v2.id);
    }

    #[test]
    fn test_arena_detects_derivation_loop() {
        let mut a = copy_plan();
        let mut b = copy_plan();
        a.derived_from = Some(b.id.clone());
        b.derived_from = Some(a.id.clone());
        let arena = PlanArena::from_records(vec![a.clone(), b]);

        assert!(matches!(
            arena.derivation_chain(&a.id),
            Err(ProvflowError::GraphCorruption { .. })
        ));
    }

    #[test]
    fn test_arena_resolve_by_name_or_prefix() {
        let plan = copy_plan();
        let arena = PlanArena::from_records(vec![plan.clone()]);

        assert_eq!(arena.resolve("r1").unwrap().id, plan.id);
        assert_eq!(arena.resolve(&plan.id.as_str()[..8]).unwrap().id, plan.id);
        assert!(matches!(
            arena.resolve("nope"),
            Err(ProvflowError::PlanNotFound(_))
        ));
    }
}
