//! Activities: recorded executions of plans.
//!
//! An [`Activity`] binds every role of a plan to the concrete entities it
//! consumed ([`Usage`]) and produced ([`Generation`]). Activities are
//! created once, at the end of a successful execution. They are never edited
//! afterwards; a superseding record with the same id may only set
//! `invalidated_at`.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::Entity;
use crate::errors::ProvflowError;
use crate::plan::{ArgumentKind, Bindings, Plan, PlanId};

// ============================================================================
// ActivityId
// ============================================================================

/// Unique activity identifier (32 lowercase hex characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivityId(String);

impl ActivityId {
    /// Create an activity ID from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique activity ID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, for display.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(8);
        &self.0[..end]
    }
}

impl std::fmt::Display for ActivityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ActivityId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

// ============================================================================
// Agents
// ============================================================================

/// Kind of agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// A human user.
    Person,
    /// The tool that performed the execution.
    Software,
}

/// Who (or what) was responsible for an activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    /// Agent kind.
    pub kind: AgentKind,
    /// Display name.
    pub name: String,
    /// Email, for persons.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Agent {
    /// A person agent.
    pub fn person(name: impl Into<String>, email: Option<String>) -> Self {
        Self {
            kind: AgentKind::Person,
            name: name.into(),
            email,
        }
    }

    /// This tool, with its version.
    pub fn software() -> Self {
        Self {
            kind: AgentKind::Software,
            name: format!("provflow {}", env!("CARGO_PKG_VERSION")),
            email: None,
        }
    }
}

/// The plan an activity executed and the software agent that ran it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Association {
    /// The executed plan.
    pub plan_id: PlanId,
    /// The executing software.
    pub agent: Agent,
}

// ============================================================================
// Usage / Generation / ParameterValue
// ============================================================================

/// An input role bound to the entity consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    /// The consumed content version.
    pub entity: Entity,
    /// Input role name on the plan.
    pub role: String,
}

/// An output role bound to the entity produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Generation {
    /// The produced content version.
    pub entity: Entity,
    /// Output role name on the plan.
    pub role: String,
}

/// A parameter role bound to the value used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterValue {
    /// Parameter role name on the plan.
    pub role: String,
    /// The value used.
    pub value: String,
}

// ============================================================================
// Activity
// ============================================================================

/// One recorded execution of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    /// Unique activity ID.
    pub id: ActivityId,
    /// Execution start.
    pub started_at: DateTime<Utc>,
    /// Execution end.
    pub ended_at: DateTime<Utc>,
    /// Store insertion index; breaks ties between equal `ended_at`.
    #[serde(default)]
    pub order_index: u64,
    /// Inputs consumed.
    #[serde(default)]
    pub usages: Vec<Usage>,
    /// Outputs produced.
    #[serde(default)]
    pub generations: Vec<Generation>,
    /// Parameter values used.
    #[serde(default)]
    pub parameter_values: Vec<ParameterValue>,
    /// The person who triggered the execution.
    pub agent: Agent,
    /// Plan + software agent.
    pub association: Association,
    /// Set when the activity no longer takes part in provenance queries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalidated_at: Option<DateTime<Utc>>,
}

impl Activity {
    /// Start building an activity for `plan_id`.
    pub fn new(
        plan_id: PlanId,
        agent: Agent,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ActivityId::generate(),
            started_at,
            ended_at,
            order_index: 0,
            usages: Vec::new(),
            generations: Vec::new(),
            parameter_values: Vec::new(),
            agent,
            association: Association {
                plan_id,
                agent: Agent::software(),
            },
            invalidated_at: None,
        }
    }

    /// Add a usage.
    pub fn with_usage(mut self, role: impl Into<String>, entity: Entity) -> Self {
        self.usages.push(Usage {
            entity,
            role: role.into(),
        });
        self
    }

    /// Add a generation.
    pub fn with_generation(mut self, role: impl Into<String>, entity: Entity) -> Self {
        self.generations.push(Generation {
            entity,
            role: role.into(),
        });
        self
    }

    /// Add a parameter value.
    pub fn with_parameter(mut self, role: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameter_values.push(ParameterValue {
            role: role.into(),
            value: value.into(),
        });
        self
    }

    /// The executed plan.
    pub fn plan_id(&self) -> &PlanId {
        &self.association.plan_id
    }

    /// Whether the activity takes part in provenance queries.
    pub fn is_current(&self) -> bool {
        self.invalidated_at.is_none()
    }

    /// Ordering key: later `ended_at` is more recent, `order_index` breaks ties.
    pub fn recency(&self) -> (DateTime<Utc>, u64) {
        (self.ended_at, self.order_index)
    }

    /// Paths consumed.
    pub fn usage_paths(&self) -> impl Iterator<Item = &str> {
        self.usages.iter().map(|u| u.entity.path.as_str())
    }

    /// Paths produced.
    pub fn generation_paths(&self) -> impl Iterator<Item = &str> {
        self.generations.iter().map(|g| g.entity.path.as_str())
    }

    /// Whether this activity produced `path`.
    pub fn generates(&self, path: &str) -> bool {
        self.generation_paths().any(|p| p == path)
    }

    /// The usage of `path`, if any.
    pub fn usage_of(&self, path: &str) -> Option<&Usage> {
        self.usages.iter().find(|u| u.entity.path == path)
    }

    /// Role → value for every usage, generation and parameter.
    pub fn bindings(&self) -> Bindings {
        let mut bindings = Bindings::new();
        for usage in &self.usages {
            bindings.insert(usage.role.clone(), usage.entity.path.clone());
        }
        for generation in &self.generations {
            bindings.insert(generation.role.clone(), generation.entity.path.clone());
        }
        for parameter in &self.parameter_values {
            bindings.insert(parameter.role.clone(), parameter.value.clone());
        }
        bindings
    }

    /// Check that every role name exists on `plan` with the right kind.
    ///
    /// # Errors
    ///
    /// Returns [`ProvflowError::InvalidBinding`] for the first unknown role.
    pub fn check_roles(&self, plan: &Plan) -> Result<(), ProvflowError> {
        let roles = self
            .usages
            .iter()
            .map(|u| (ArgumentKind::Input, u.role.as_str()))
            .chain(
                self.generations
                    .iter()
                    .map(|g| (ArgumentKind::Output, g.role.as_str())),
            )
            .chain(
                self.parameter_values
                    .iter()
                    .map(|p| (ArgumentKind::Parameter, p.role.as_str())),
            );

        for (kind, role) in roles {
            if plan.argument(kind, role).is_none() {
                return Err(ProvflowError::InvalidBinding {
                    plan: plan.name.clone(),
                    role: format!("{} ({})", role, kind),
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// ActivityCollection
// ============================================================================

/// The operation that produced a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    /// `provflow update`
    Update,
    /// `provflow rerun`
    Rerun,
}

impl std::fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Update => write!(f, "update"),
            Self::Rerun => write!(f, "rerun"),
        }
    }
}

/// Activities executed together by one update or rerun.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityCollection {
    /// Unique collection id.
    pub id: String,
    /// Producing operation.
    pub kind: CollectionKind,
    /// Member activities in execution order.
    pub activity_ids: Vec<ActivityId>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl ActivityCollection {
    /// Create a collection with a fresh id.
    pub fn new(kind: CollectionKind, activity_ids: Vec<ActivityId>) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            kind,
            activity_ids,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Checksum;
    use crate::history::RevisionId;
    use crate::plan::CommandArgument;

    fn entity(path: &str) -> Entity {
        Entity::new(path, Checksum::of_bytes(path.as_bytes()), RevisionId::new("rev"))
    }

    fn plan() -> Plan {
        Plan::new("r1", "head")
            .with_input(CommandArgument::new("input-2", "a").at(2))
            .with_output(CommandArgument::new("output-stdout", "b"))
            .with_parameter(CommandArgument::new("parameter-1", "-n1").at(1))
    }

    #[test]
    fn test_activity_bindings_and_paths() {
        let plan = plan();
        let now = Utc::now();
        let activity = Activity::new(plan.id.clone(), Agent::person("ann", None), now, now)
            .with_usage("input-2", entity("a"))
            .with_generation("output-stdout", entity("b"))
            .with_parameter("parameter-1", "-n2");

        assert!(activity.generates("b"));
        assert!(!activity.generates("a"));
        assert!(activity.usage_of("a").is_some());
        let bindings = activity.bindings();
        assert_eq!(bindings["parameter-1"], "-n2");
        assert_eq!(bindings["output-stdout"], "b");
        assert!(activity.check_roles(&plan).is_ok());
        assert_eq!(activity.plan_id(), &plan.id);
        assert_eq!(activity.association.agent.kind, AgentKind::Software);
    }

    #[test]
    fn test_check_roles_rejects_wrong_kind() {
        let plan = plan();
        let now = Utc::now();
        // `input-2` exists, but as an input, not an output.
        let activity = Activity::new(plan.id.clone(), Agent::person("ann", None), now, now)
            .with_generation("input-2", entity("a"));

        assert!(matches!(
            activity.check_roles(&plan),
            Err(ProvflowError::InvalidBinding { .. })
        ));
    }

    #[test]
    fn test_recency_tie_break_uses_order_index() {
        let now = Utc::now();
        let mut first = Activity::new(PlanId::generate(), Agent::person("a", None), now, now);
        let mut second = first.clone();
        first.order_index = 1;
        second.order_index = 2;
        assert!(first.recency() < second.recency());
    }

    #[test]
    fn test_activity_id_is_hex() {
        let id = ActivityId::generate();
        assert_eq!(id.as_str().len(), 32);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
