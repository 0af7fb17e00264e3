//! Provflow engine: the entry point for every operation.
//!
//! The [`ProvflowEngine`] owns the global configuration and the executor
//! registry. Each operation receives a [`ProjectContext`] built once per
//! invocation, so one engine can serve many projects.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;

use crate::activity::{ActivityCollection, CollectionKind};
use crate::config::{GlobalConfig, ProjectConfig, ResolvedConfig};
use crate::context::{ProjectContext, Transaction};
use crate::doctor::{diagnose, DoctorReport};
use crate::errors::ProvflowError;
use crate::execute::{capture_inputs, execute_schedule, record_activity, ExecutionSettings};
use crate::executor::{ExecutorRegistry, WorkflowExecutor};
use crate::graph::{GraphBuilder, ProvenanceGraph};
use crate::lock::{holder_description, LockMode, ProjectLock};
use crate::plan::{Bindings, CommandArgument, MappedStream, Plan, PlanArena};
use crate::report::DryRunReport;
use crate::repository::{LocalRepository, Repository};
use crate::staleness::{AnalysisOptions, StaleSet, StalenessAnalyzer, Targets};
use crate::status::StatusReport;
use crate::store::{JsonlMetadataStore, MetadataSnapshot, MetadataStore};
use crate::types::{
    ExecutionSummary, InitResult, LogEntry, PlanEdit, RerunOptions, RunRequest, RunResult,
    SaveResult, UpdateOptions, UpdateOutcome,
};
use crate::workspace::Workspace;

// ============================================================================
// ProvflowEngine
// ============================================================================

/// The main engine for provflow operations.
///
/// # Example
///
/// ```ignore
/// use provflow_core::{ProvflowEngine, GlobalConfig, UpdateOptions};
///
/// let engine = ProvflowEngine::from_global_config(GlobalConfig::load_default()?)?;
/// let workspace = engine.resolve_workspace(Path::new("."))?;
/// let ctx = engine.open_project(&workspace)?;
/// engine.update(&ctx, UpdateOptions { dry_run: true, ..Default::default() })?;
/// ```
#[derive(Debug)]
pub struct ProvflowEngine {
    /// Global configuration loaded from `~/.provflow/config.yaml`.
    global_config: GlobalConfig,
    /// Executors by provider name.
    executors: ExecutorRegistry,
}

impl ProvflowEngine {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create an engine from a global configuration, with the built-in
    /// executors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if required resources cannot be initialized.
    pub fn from_global_config(global_config: GlobalConfig) -> anyhow::Result<Self> {
        Ok(Self {
            global_config,
            executors: ExecutorRegistry::with_defaults(),
        })
    }

    /// Create an engine from the default global configuration location.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be parsed.
    pub fn with_defaults() -> anyhow::Result<Self> {
        let config = GlobalConfig::load_default()?;
        Self::from_global_config(config)
    }

    /// Create an engine with the configuration file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn with_config(path: &Path) -> anyhow::Result<Self> {
        let config = GlobalConfig::from_path(path)?;
        Self::from_global_config(config)
    }

    /// The global configuration.
    pub fn global_config(&self) -> &GlobalConfig {
        &self.global_config
    }

    /// Register an additional executor (replaces one with the same name).
    pub fn register_executor(&mut self, executor: Arc<dyn WorkflowExecutor>) {
        self.executors.register(executor);
    }

    /// The executor registry.
    pub fn executors(&self) -> &ExecutorRegistry {
        &self.executors
    }

    // -------------------------------------------------------------------------
    // Projects
    // -------------------------------------------------------------------------

    /// Resolve the project containing `dir`.
    pub fn resolve_workspace(&self, dir: &Path) -> Result<Workspace, ProvflowError> {
        Workspace::resolve(dir)
    }

    /// Load `.provflow/config.yaml` (defaults when absent).
    pub fn load_project_config(&self, workspace: &Workspace) -> Result<ProjectConfig, ProvflowError> {
        ProjectConfig::load_from_workspace(workspace.root())
    }

    /// Effective configuration for a project.
    pub fn resolved_config(&self, workspace: &Workspace) -> Result<ResolvedConfig, ProvflowError> {
        let project = self.load_project_config(workspace)?;
        Ok(ResolvedConfig::resolve(&self.global_config, &project))
    }

    /// Open an initialized project.
    ///
    /// # Errors
    ///
    /// Returns [`ProvflowError::NotInitialized`] before `init`.
    pub fn open_project(&self, workspace: &Workspace) -> Result<ProjectContext, ProvflowError> {
        ProjectContext::open(workspace.clone(), self.resolved_config(workspace)?)
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    /// Create `.provflow/`, the empty metadata store and the initial commit
    /// capturing every project file.
    ///
    /// # Errors
    ///
    /// Returns [`ProvflowError::AlreadyInitialized`] if HEAD already exists.
    pub fn init(&self, workspace: &mut Workspace) -> Result<InitResult, ProvflowError> {
        if workspace.is_initialized() {
            return Err(ProvflowError::AlreadyInitialized {
                root: workspace.root().to_path_buf(),
            });
        }

        fs::create_dir_all(workspace.provflow_dir())?;
        let _lock = ProjectLock::acquire(
            &workspace.project_lock_path(),
            LockMode::FailFast,
            &holder_description("init"),
        )?;
        JsonlMetadataStore::open(workspace).create_files()?;

        let tracked = workspace.project_files()?;
        let mut paths = tracked.clone();
        paths.extend(workspace.metadata_relative_paths());

        let repo = LocalRepository::open(workspace);
        let revision = repo.next_revision();
        repo.commit(&revision, &paths, "provflow init")?;
        workspace.mark_initialized();

        tracing::info!(
            "Initialized provflow project at {} ({} file(s) tracked)",
            workspace.root().display(),
            tracked.len()
        );
        Ok(InitResult {
            revision,
            tracked_files: tracked.len(),
        })
    }

    /// Execute a command and record it as an activity.
    ///
    /// Argument tokens equal to a declared input or output become positional
    /// `input-<pos>` / `output-<pos>` roles, every other token a
    /// `parameter-<pos>`. Declared paths absent from argv become
    /// non-positional roles; stream redirections become `input-stdin`,
    /// `output-stdout` and `output-stderr`.
    ///
    /// A current plan with the same name is reused when its structure is
    /// unchanged; otherwise a new version is derived and the old one
    /// invalidated.
    ///
    /// # Errors
    ///
    /// - [`ProvflowError::PathNotFound`] if an input does not exist.
    /// - [`ProvflowError::ExecutorFailure`] if the command fails; nothing is
    ///   recorded.
    pub fn run(&self, ctx: &ProjectContext, request: RunRequest) -> Result<RunResult, ProvflowError> {
        let workspace = ctx.workspace();
        let cwd = request
            .cwd
            .clone()
            .unwrap_or_else(|| workspace.root().to_path_buf());
        let normalize = |raw: &String| workspace.project_path(&cwd, raw);
        let normalize_opt = |raw: &Option<String>| raw.as_ref().map(normalize).transpose();

        let inputs: Vec<String> = request.inputs.iter().map(normalize).collect::<Result<_, _>>()?;
        let outputs: Vec<String> = request.outputs.iter().map(normalize).collect::<Result<_, _>>()?;
        let stdin = normalize_opt(&request.stdin)?;
        let stdout = normalize_opt(&request.stdout)?;
        let stderr = normalize_opt(&request.stderr)?;

        for path in inputs.iter().chain(stdin.iter()) {
            if !workspace.absolute(path).exists() {
                return Err(ProvflowError::PathNotFound(path.clone()));
            }
        }

        let shape = CommandShape {
            inputs: &inputs,
            outputs: &outputs,
            stdin: stdin.as_deref(),
            stdout: stdout.as_deref(),
            stderr: stderr.as_deref(),
        };
        let mut candidate = shape.build_plan(workspace, &cwd, &request)?;
        let bindings: Bindings = candidate
            .inputs
            .iter()
            .chain(candidate.outputs.iter())
            .chain(candidate.parameters.iter())
            .map(|a| (a.name.clone(), a.default_value.clone()))
            .collect();

        let provider = request
            .provider
            .clone()
            .unwrap_or_else(|| ctx.config().execution.default_provider.clone());
        let executor = self.executors.get(&provider)?;

        let mut tx = ctx.begin("run")?;
        let snapshot = tx.snapshot()?;

        let (plan, new_plan) = match snapshot.plans.find_current(&candidate.name) {
            Some(existing) if existing.same_structure(&candidate) => (existing.clone(), false),
            Some(existing) => {
                let mut derived = existing.derive();
                derived.command = std::mem::take(&mut candidate.command);
                derived.inputs = std::mem::take(&mut candidate.inputs);
                derived.outputs = std::mem::take(&mut candidate.outputs);
                derived.parameters = std::mem::take(&mut candidate.parameters);
                if candidate.description.is_some() {
                    derived.description = candidate.description.take();
                }
                tracing::debug!(
                    "Plan `{}` changed shape; deriving {} from {}",
                    derived.name,
                    derived.id,
                    existing.id
                );
                tx.store_mut().save_plan(existing.invalidated(Utc::now()))?;
                (derived, true)
            }
            None => (candidate, true),
        };

        let applied = plan.apply(&bindings)?;
        let captured = match capture_inputs(ctx.repository(), &applied)? {
            Ok(captured) => captured,
            Err(path) => return Err(ProvflowError::PathNotFound(path)),
        };

        let started_at = Utc::now();
        let outcome = executor.execute(&applied, workspace.root())?;
        let ended_at = Utc::now();
        if !outcome.success {
            return Err(ProvflowError::ExecutorFailure {
                plan: plan.name.clone(),
                activity: "(new)".to_string(),
                reason: outcome.error.unwrap_or_else(|| "unknown failure".to_string()),
                completed: 0,
            });
        }

        if new_plan {
            tx.store_mut().save_plan(plan.clone())?;
        }
        let activity_id = match record_activity(
            &mut tx,
            &applied,
            &captured,
            &ctx.agent(),
            started_at,
            ended_at,
        )? {
            Ok(id) => id,
            Err(missing) => {
                return Err(ProvflowError::ExecutorFailure {
                    plan: plan.name.clone(),
                    activity: "(new)".to_string(),
                    reason: format!("output '{}' was not created", missing),
                    completed: 0,
                })
            }
        };

        let revision = tx.commit(&format!("provflow run: {}", plan.name))?;
        Ok(RunResult {
            plan_id: plan.id.clone(),
            plan_name: plan.name.clone(),
            new_plan,
            activity_id,
            revision,
            outputs: applied.output_paths().into_iter().map(str::to_string).collect(),
        })
    }

    /// Commit the current content of `paths` (every project file when empty).
    pub fn save(
        &self,
        ctx: &ProjectContext,
        paths: &[String],
        message: Option<&str>,
    ) -> Result<SaveResult, ProvflowError> {
        let workspace = ctx.workspace();
        let paths = if paths.is_empty() {
            workspace.project_files()?
        } else {
            paths
                .iter()
                .map(|p| workspace.normalize_relative(p))
                .collect::<Result<Vec<_>, _>>()?
        };

        let mut tx = ctx.begin("save")?;
        for path in &paths {
            tx.touch(path.clone());
        }
        let revision = tx.commit(message.unwrap_or("provflow save"))?;
        Ok(SaveResult { revision, paths })
    }

    /// Re-execute whatever is out of date for `options.targets`.
    ///
    /// # Errors
    ///
    /// - [`ProvflowError::PathNotGenerated`] for a target with no producer.
    /// - [`ProvflowError::DeletedDependency`] when a missing input blocks a
    ///   step (dry runs report it instead).
    /// - [`ProvflowError::ExecutorFailure`] after committing completed steps.
    /// - [`ProvflowError::LockAcquisition`] if the project is busy.
    pub fn update(
        &self,
        ctx: &ProjectContext,
        options: UpdateOptions,
    ) -> Result<UpdateOutcome, ProvflowError> {
        let targets = normalize_targets(ctx.workspace(), &options.targets)?;
        let ignore_deleted = options
            .ignore_deleted
            .unwrap_or(ctx.config().update.ignore_deleted);
        let analysis = AnalysisOptions::update(ignore_deleted);

        if options.dry_run {
            return self.dry_run(ctx, &targets, &analysis);
        }

        let executor = self.executor_for(ctx, options.provider.as_deref())?;
        let tx = ctx.begin("update")?;
        let snapshot = tx.snapshot()?;
        let (graph, stale) = analyze(ctx, &snapshot, &targets, &analysis)?;
        let settings = ExecutionSettings {
            parallel: ctx.config().execution.parallel,
            record: true,
        };
        self.execute_stale(tx, &graph, &stale, &snapshot.plans, executor.as_ref(), settings, CollectionKind::Update)
    }

    /// Re-execute everything leading to `options.paths`.
    ///
    /// # Errors
    ///
    /// As [`ProvflowEngine::update`]; additionally
    /// [`ProvflowError::InvalidArgument`] when no path is given or `--from`
    /// selects nothing.
    pub fn rerun(
        &self,
        ctx: &ProjectContext,
        options: RerunOptions,
    ) -> Result<UpdateOutcome, ProvflowError> {
        if options.paths.is_empty() {
            return Err(ProvflowError::InvalidArgument(
                "rerun needs at least one path".to_string(),
            ));
        }
        let workspace = ctx.workspace();
        let targets = normalize_targets(workspace, &Targets::Paths(options.paths.clone()))?;
        let sources = options
            .sources
            .iter()
            .map(|s| workspace.normalize_relative(s))
            .collect::<Result<Vec<_>, _>>()?;
        let analysis = AnalysisOptions::rerun(sources, false);

        if options.dry_run {
            return self.dry_run(ctx, &targets, &analysis);
        }

        let executor = self.executor_for(ctx, options.provider.as_deref())?;
        let tx = ctx.begin("rerun")?;
        let snapshot = tx.snapshot()?;
        let (graph, stale) = analyze(ctx, &snapshot, &targets, &analysis)?;
        let settings = ExecutionSettings {
            parallel: ctx.config().execution.parallel,
            record: !options.skip_metadata_update,
        };
        self.execute_stale(tx, &graph, &stale, &snapshot.plans, executor.as_ref(), settings, CollectionKind::Rerun)
    }

    /// Stale outputs, modified inputs and deleted outputs, without taking the
    /// project lock.
    pub fn status(&self, ctx: &ProjectContext) -> Result<StatusReport, ProvflowError> {
        let snapshot = ctx.snapshot()?;
        let analysis = AnalysisOptions::update(ctx.config().update.ignore_deleted);
        let (graph, stale) = analyze(ctx, &snapshot, &Targets::All, &analysis)?;
        Ok(StatusReport::from_analysis(
            ctx.workspace().root().to_path_buf(),
            ctx.repository().head()?,
            &graph,
            &snapshot.plans,
            &stale,
        ))
    }

    /// Activities, newest first.
    pub fn log(
        &self,
        ctx: &ProjectContext,
        include_invalidated: bool,
    ) -> Result<Vec<LogEntry>, ProvflowError> {
        let snapshot = ctx.snapshot()?;
        let mut activities: Vec<_> = snapshot
            .activities
            .iter()
            .filter(|a| include_invalidated || a.is_current())
            .collect();
        activities.sort_by(|a, b| b.recency().cmp(&a.recency()));

        Ok(activities
            .into_iter()
            .map(|a| LogEntry {
                activity_id: a.id.clone(),
                plan_name: snapshot
                    .plans
                    .get(a.plan_id())
                    .map(|p| p.name.clone())
                    .unwrap_or_else(|| "?".to_string()),
                ended_at: a.ended_at,
                agent: a.agent.name.clone(),
                inputs: a.usage_paths().map(str::to_string).collect(),
                outputs: a.generation_paths().map(str::to_string).collect(),
                current: a.is_current(),
            })
            .collect())
    }

    /// Current plans, or every plan version with `all`.
    pub fn list_plans(&self, ctx: &ProjectContext, all: bool) -> Result<Vec<Plan>, ProvflowError> {
        let snapshot = ctx.snapshot()?;
        let plans: Vec<Plan> = if all {
            snapshot.plans.all().cloned().collect()
        } else {
            snapshot.plans.current().cloned().collect()
        };
        Ok(plans)
    }

    /// Derive a new version of a current plan with `edit` applied and
    /// invalidate the old one.
    ///
    /// # Errors
    ///
    /// - [`ProvflowError::PlanNotFound`] if `reference` matches no current plan.
    /// - [`ProvflowError::InvalidArgument`] for an empty edit or a name clash.
    pub fn edit_plan(
        &self,
        ctx: &ProjectContext,
        reference: &str,
        edit: PlanEdit,
    ) -> Result<Plan, ProvflowError> {
        if edit.is_empty() {
            return Err(ProvflowError::InvalidArgument("Nothing to edit".to_string()));
        }

        let mut tx = ctx.begin("workflow edit")?;
        let snapshot = tx.snapshot()?;
        let plan = snapshot.plans.resolve(reference)?;
        if !plan.is_current() {
            return Err(ProvflowError::PlanNotFound(reference.to_string()));
        }
        if let Some(name) = &edit.new_name {
            if name != &plan.name && snapshot.plans.find_current(name).is_some() {
                return Err(ProvflowError::InvalidArgument(format!(
                    "A workflow named `{}` already exists",
                    name
                )));
            }
        }

        let mut derived = plan.derive();
        if let Some(name) = edit.new_name {
            derived.name = name;
        }
        if let Some(description) = edit.description {
            derived.description = Some(description);
        }
        if let Some(keywords) = edit.keywords {
            derived.keywords = keywords;
        }

        tx.store_mut().save_plan(plan.invalidated(Utc::now()))?;
        tx.store_mut().save_plan(derived.clone())?;
        tx.commit(&format!("provflow workflow edit: {}", derived.name))?;
        Ok(derived)
    }

    /// Every provenance problem found.
    pub fn doctor(&self, ctx: &ProjectContext) -> Result<DoctorReport, ProvflowError> {
        let snapshot = ctx.snapshot()?;
        Ok(diagnose(&snapshot, ctx.repository()))
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn executor_for(
        &self,
        ctx: &ProjectContext,
        provider: Option<&str>,
    ) -> Result<Arc<dyn WorkflowExecutor>, ProvflowError> {
        let provider = provider.unwrap_or(ctx.config().execution.default_provider.as_str());
        self.executors.get(provider)
    }

    fn dry_run(
        &self,
        ctx: &ProjectContext,
        targets: &Targets,
        analysis: &AnalysisOptions,
    ) -> Result<UpdateOutcome, ProvflowError> {
        let snapshot = ctx.snapshot()?;
        let (graph, stale) = analyze(ctx, &snapshot, targets, analysis)?;
        let report = DryRunReport::build(&graph, &stale, &snapshot.plans)?;
        Ok(UpdateOutcome::DryRun(report))
    }

    #[allow(clippy::too_many_arguments)]
    fn execute_stale(
        &self,
        mut tx: Transaction<'_>,
        graph: &ProvenanceGraph,
        stale: &StaleSet,
        plans: &PlanArena,
        executor: &dyn WorkflowExecutor,
        settings: ExecutionSettings,
        kind: CollectionKind,
    ) -> Result<UpdateOutcome, ProvflowError> {
        if let Some(blocked) = stale.blocked.first() {
            return Err(ProvflowError::DeletedDependency {
                path: blocked.path.clone(),
                activity: graph.activity(blocked.node).id.to_string(),
            });
        }

        let skipped: Vec<String> = stale
            .skipped
            .iter()
            .flat_map(|&n| graph.activity(n).generation_paths().map(str::to_string))
            .collect();

        if stale.is_empty() {
            tx.abort();
            return Ok(UpdateOutcome::Executed(ExecutionSummary {
                skipped,
                ..Default::default()
            }));
        }

        let mut run = execute_schedule(&mut tx, graph, &stale.schedule, plans, executor, settings)?;

        if settings.record && !run.new_activities.is_empty() {
            tx.store_mut()
                .append_collection(ActivityCollection::new(kind, run.new_activities.clone()))?;
        }

        let names: Vec<&str> = run.summary.steps.iter().map(|s| s.plan_name.as_str()).collect();
        let message = format!("provflow {}: {}", kind, names.join(", "));
        run.summary.revision = if settings.record {
            tx.commit(&message)?
        } else {
            tx.commit_files_only(&message)?
        };
        run.summary.skipped = skipped;

        match run.failure {
            Some(failure) => Err(failure),
            None => {
                tracing::info!("{} step(s) executed", run.summary.steps.len());
                Ok(UpdateOutcome::Executed(run.summary))
            }
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn normalize_targets(workspace: &Workspace, targets: &Targets) -> Result<Targets, ProvflowError> {
    match targets {
        Targets::All => Ok(Targets::All),
        Targets::Paths(paths) => Ok(Targets::Paths(
            paths
                .iter()
                .map(|p| workspace.normalize_relative(p))
                .collect::<Result<_, _>>()?,
        )),
    }
}

fn analyze(
    ctx: &ProjectContext,
    snapshot: &MetadataSnapshot,
    targets: &Targets,
    options: &AnalysisOptions,
) -> Result<(ProvenanceGraph, StaleSet), ProvflowError> {
    let graph = GraphBuilder::new(ctx.repository()).build(&snapshot.activities)?;
    let stale = StalenessAnalyzer::new(&graph, ctx.repository()).compute_stale(targets, options)?;
    Ok((graph, stale))
}

/// Declared paths of a `run` request, normalized.
struct CommandShape<'a> {
    inputs: &'a [String],
    outputs: &'a [String],
    stdin: Option<&'a str>,
    stdout: Option<&'a str>,
    stderr: Option<&'a str>,
}

impl CommandShape<'_> {
    fn build_plan(
        &self,
        workspace: &Workspace,
        cwd: &Path,
        request: &RunRequest,
    ) -> Result<Plan, ProvflowError> {
        let (program, args) = request
            .argv
            .split_first()
            .ok_or_else(|| ProvflowError::InvalidArgument("No command given".to_string()))?;

        let name = match &request.name {
            Some(name) => name.clone(),
            None => default_plan_name(program),
        };
        let mut plan = Plan::new(name, program.clone());
        plan.description = request.description.clone();

        let mut seen_inputs = BTreeSet::new();
        let mut seen_outputs = BTreeSet::new();
        for (i, token) in args.iter().enumerate() {
            let position = (i + 1) as u32;
            let as_path = workspace.project_path(cwd, token).ok();
            match as_path {
                Some(path) if self.inputs.contains(&path) => {
                    seen_inputs.insert(path.clone());
                    plan = plan.with_input(CommandArgument::new(format!("input-{}", position), path).at(position));
                }
                Some(path) if self.outputs.contains(&path) => {
                    seen_outputs.insert(path.clone());
                    plan = plan.with_output(CommandArgument::new(format!("output-{}", position), path).at(position));
                }
                _ => {
                    plan = plan.with_parameter(
                        CommandArgument::new(format!("parameter-{}", position), token.clone()).at(position),
                    );
                }
            }
        }

        let streams: BTreeSet<&str> = [self.stdin, self.stdout, self.stderr].into_iter().flatten().collect();
        let mut extra = args.len() + 1;
        for path in self.inputs {
            if !seen_inputs.contains(path) && !streams.contains(path.as_str()) {
                plan = plan.with_input(CommandArgument::new(format!("input-{}", extra), path.clone()));
                extra += 1;
            }
        }
        for path in self.outputs {
            if !seen_outputs.contains(path) && !streams.contains(path.as_str()) {
                plan = plan.with_output(CommandArgument::new(format!("output-{}", extra), path.clone()));
                extra += 1;
            }
        }

        if let Some(path) = self.stdin {
            plan = plan.with_input(CommandArgument::new("input-stdin", path).mapped(MappedStream::Stdin));
        }
        if let Some(path) = self.stdout {
            plan = plan.with_output(CommandArgument::new("output-stdout", path).mapped(MappedStream::Stdout));
        }
        if let Some(path) = self.stderr {
            plan = plan.with_output(CommandArgument::new("output-stderr", path).mapped(MappedStream::Stderr));
        }
        Ok(plan)
    }
}

fn default_plan_name(program: &str) -> String {
    let base = Path::new(program)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("run");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", base, &suffix[..8])
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ArgumentKind;
    use tempfile::TempDir;

    fn create_engine() -> ProvflowEngine {
        ProvflowEngine::from_global_config(GlobalConfig::default_for_testing()).unwrap()
    }

    fn project() -> (TempDir, ProvflowEngine, ProjectContext) {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "hello\n").unwrap();
        let engine = create_engine();
        let mut workspace = engine.resolve_workspace(dir.path()).unwrap();
        engine.init(&mut workspace).unwrap();
        let ctx = engine.open_project(&workspace).unwrap();
        (dir, engine, ctx)
    }

    fn argv(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_init_twice_fails() {
        let dir = TempDir::new().unwrap();
        let engine = create_engine();
        let mut workspace = engine.resolve_workspace(dir.path()).unwrap();
        let result = engine.init(&mut workspace).unwrap();
        assert_eq!(result.tracked_files, 0);
        assert!(workspace.is_initialized());

        let mut again = engine.resolve_workspace(dir.path()).unwrap();
        assert!(matches!(
            engine.init(&mut again),
            Err(ProvflowError::AlreadyInitialized { .. })
        ));
    }

    #[test]
    fn test_open_before_init_fails() {
        let dir = TempDir::new().unwrap();
        let engine = create_engine();
        let workspace = engine.resolve_workspace(dir.path()).unwrap();
        assert!(matches!(
            engine.open_project(&workspace),
            Err(ProvflowError::NotInitialized)
        ));
    }

    #[test]
    fn test_run_records_roles() {
        let (dir, engine, ctx) = project();
        let result = engine
            .run(
                &ctx,
                RunRequest {
                    name: Some("copy".to_string()),
                    argv: argv(&["cp", "a.txt", "b.txt"]),
                    inputs: vec!["a.txt".to_string()],
                    outputs: vec!["b.txt".to_string()],
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(result.new_plan);
        assert_eq!(result.outputs, vec!["b.txt".to_string()]);
        assert_eq!(fs::read_to_string(dir.path().join("b.txt")).unwrap(), "hello\n");

        let plans = engine.list_plans(&ctx, false).unwrap();
        assert_eq!(plans.len(), 1);
        let plan = &plans[0];
        assert_eq!(plan.argument(ArgumentKind::Input, "input-1").unwrap().position, Some(1));
        assert_eq!(plan.argument(ArgumentKind::Output, "output-2").unwrap().position, Some(2));

        let log = engine.log(&ctx, false).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].plan_name, "copy");
        assert_eq!(log[0].inputs, vec!["a.txt".to_string()]);
    }

    #[test]
    fn test_run_reuses_plan_with_same_shape() {
        let (dir, engine, ctx) = project();
        fs::write(dir.path().join("c.txt"), "other\n").unwrap();
        let request = |input: &str, output: &str| RunRequest {
            name: Some("copy".to_string()),
            argv: argv(&["cp", input, output]),
            inputs: vec![input.to_string()],
            outputs: vec![output.to_string()],
            ..Default::default()
        };

        let first = engine.run(&ctx, request("a.txt", "b.txt")).unwrap();
        let second = engine.run(&ctx, request("c.txt", "d.txt")).unwrap();
        assert!(!second.new_plan);
        assert_eq!(first.plan_id, second.plan_id);
    }

    #[test]
    fn test_run_derives_plan_when_shape_changes() {
        let (_dir, engine, ctx) = project();
        let first = engine
            .run(
                &ctx,
                RunRequest {
                    name: Some("copy".to_string()),
                    argv: argv(&["cp", "a.txt", "b.txt"]),
                    inputs: vec!["a.txt".to_string()],
                    outputs: vec!["b.txt".to_string()],
                    ..Default::default()
                },
            )
            .unwrap();
        let second = engine
            .run(
                &ctx,
                RunRequest {
                    name: Some("copy".to_string()),
                    argv: argv(&["cp", "-f", "a.txt", "b.txt"]),
                    inputs: vec!["a.txt".to_string()],
                    outputs: vec!["b.txt".to_string()],
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(second.new_plan);
        let all = engine.list_plans(&ctx, true).unwrap();
        assert_eq!(all.len(), 2);
        let current = engine.list_plans(&ctx, false).unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].derived_from, Some(first.plan_id));
    }

    #[test]
    fn test_run_rejects_missing_input() {
        let (_dir, engine, ctx) = project();
        let err = engine
            .run(
                &ctx,
                RunRequest {
                    argv: argv(&["cp", "missing.txt", "b.txt"]),
                    inputs: vec!["missing.txt".to_string()],
                    outputs: vec!["b.txt".to_string()],
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, ProvflowError::PathNotFound(p) if p == "missing.txt"));
        assert!(engine.log(&ctx, true).unwrap().is_empty());
    }

    #[test]
    fn test_failed_run_records_nothing() {
        let (_dir, engine, ctx) = project();
        let err = engine
            .run(
                &ctx,
                RunRequest {
                    name: Some("fail".to_string()),
                    argv: argv(&["false"]),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, ProvflowError::ExecutorFailure { .. }));
        assert!(engine.list_plans(&ctx, true).unwrap().is_empty());
    }

    #[test]
    fn test_run_records_while_a_reader_holds_the_metadata_lock() {
        let (dir, engine, ctx) = project();
        let reader = crate::lock::MetadataLock::shared(
            &ctx.workspace().metadata_lock_path(),
            LockMode::FailFast,
        )
        .unwrap();
        let release = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(300));
            drop(reader);
        });

        let result = engine.run(
            &ctx,
            RunRequest {
                name: Some("copy".to_string()),
                argv: argv(&["cp", "a.txt", "b.txt"]),
                inputs: vec!["a.txt".to_string()],
                outputs: vec!["b.txt".to_string()],
                ..Default::default()
            },
        );
        release.join().unwrap();

        assert!(result.is_ok(), "run failed: {:?}", result.err());
        assert!(dir.path().join("b.txt").exists());
        assert_eq!(engine.log(&ctx, false).unwrap().len(), 1);
    }

    #[test]
    fn test_edit_plan_derives_new_version() {
        let (_dir, engine, ctx) = project();
        engine
            .run(
                &ctx,
                RunRequest {
                    name: Some("copy".to_string()),
                    argv: argv(&["cp", "a.txt", "b.txt"]),
                    inputs: vec!["a.txt".to_string()],
                    outputs: vec!["b.txt".to_string()],
                    ..Default::default()
                },
            )
            .unwrap();

        let edited = engine
            .edit_plan(
                &ctx,
                "copy",
                PlanEdit {
                    new_name: Some("duplicate".to_string()),
                    description: Some("copies a".to_string()),
                    keywords: None,
                },
            )
            .unwrap();
        assert_eq!(edited.name, "duplicate");
        assert!(edited.derived_from.is_some());

        let current = engine.list_plans(&ctx, false).unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].name, "duplicate");
        assert!(matches!(
            engine.edit_plan(&ctx, "copy", PlanEdit { new_name: Some("x".to_string()), ..Default::default() }),
            Err(ProvflowError::PlanNotFound(_))
        ));
        assert!(matches!(
            engine.edit_plan(&ctx, "duplicate", PlanEdit::default()),
            Err(ProvflowError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_unknown_provider() {
        let (_dir, engine, ctx) = project();
        let err = engine
            .update(
                &ctx,
                UpdateOptions {
                    provider: Some("cwl".to_string()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, ProvflowError::UnknownExecutor { .. }));
    }

    #[test]
    fn test_save_commits_paths() {
        let (dir, engine, ctx) = project();
        fs::write(dir.path().join("notes.md"), "x").unwrap();
        let saved = engine.save(&ctx, &["notes.md".to_string()], None).unwrap();
        assert!(saved.revision.is_some());
        assert_eq!(saved.paths, vec!["notes.md".to_string()]);
    }

    #[test]
    fn test_fresh_project_is_clean() {
        let (_dir, engine, ctx) = project();
        let status = engine.status(&ctx).unwrap();
        assert!(status.is_clean());
        assert!(status.head.is_some());
        assert!(engine.doctor(&ctx).unwrap().is_healthy());
    }
}
