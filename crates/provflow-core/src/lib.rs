//! # provflow-core
//!
//! **Provenance-aware workflow engine** – core library.
//!
//! Every command executed through provflow is recorded as an activity bound
//! to a reusable plan, with the exact file versions it read and wrote. From
//! that record the engine works out which outputs are out of date and
//! re-executes just the steps needed, in dependency order.
//!
//! ## Main Types
//!
//! - [`ProvflowEngine`] – the entry point for all operations
//! - [`ProjectContext`] – one opened project (workspace, config, repository)
//! - [`ProvenanceGraph`] – activity DAG built from recorded usages
//! - [`StalenessAnalyzer`] – decides what must re-execute and why
//! - [`ProvflowError`] – domain-specific error type
//!
//! ## Example
//!
//! ```ignore
//! use provflow_core::{ProvflowEngine, UpdateOptions, UpdateOutcome};
//! use std::path::Path;
//!
//! let engine = ProvflowEngine::with_defaults()?;
//! let workspace = engine.resolve_workspace(Path::new("."))?;
//! let ctx = engine.open_project(&workspace)?;
//!
//! match engine.update(&ctx, UpdateOptions::default())? {
//!     UpdateOutcome::Executed(summary) => println!("{} step(s)", summary.steps.len()),
//!     UpdateOutcome::DryRun(_) => unreachable!(),
//! }
//! ```

// Modules
pub mod activity;
pub mod config;
pub mod constants;
pub mod context;
pub mod doctor;
pub mod engine;
pub mod entity;
pub mod errors;
pub mod execute;
pub mod executor;
pub mod graph;
pub mod history;
pub mod lock;
pub mod plan;
pub mod report;
pub mod repository;
pub mod scheduler;
pub mod staleness;
pub mod status;
pub mod store;
pub mod types;
pub mod workspace;

// Re-exports for convenience
pub use activity::{Activity, ActivityCollection, ActivityId, Agent, CollectionKind};
pub use config::{GlobalConfig, ProjectConfig, ResolvedConfig};
pub use context::{ProjectContext, Transaction};
pub use doctor::{DoctorReport, Problem, ProblemKind};
pub use engine::ProvflowEngine;
pub use entity::{Checksum, Entity};
pub use errors::ProvflowError;
pub use executor::{ExecutionOutcome, ExecutorRegistry, LocalExecutor, WorkflowExecutor};
pub use graph::{GraphBuilder, NodeIndex, ProvenanceGraph};
pub use history::{Revision, RevisionId};
pub use lock::LockMode;
pub use plan::{AppliedPlan, ArgumentKind, CommandArgument, MappedStream, Plan, PlanArena, PlanId};
pub use report::{BlockedStep, DryRunReport, PlannedStep, SkippedStep};
pub use repository::{LocalRepository, Repository};
pub use scheduler::{plan_batches, Schedule};
pub use staleness::{AnalysisOptions, StaleReason, StaleSet, StalenessAnalyzer, Targets};
pub use status::{MissingInput, StaleOutput, StatusReport};
pub use types::{
    ExecutedStep, ExecutionSummary, InitResult, LogEntry, PlanEdit, RerunOptions, RunRequest,
    RunResult, SaveResult, UpdateOptions, UpdateOutcome,
};
pub use workspace::Workspace;
