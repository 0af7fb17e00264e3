//! Workflow executors.
//!
//! An executor runs one [`AppliedPlan`] in the project working directory and
//! reports whether it succeeded. Executors are looked up by provider name in
//! an [`ExecutorRegistry`]; `local` is always available.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;

use crate::constants::DEFAULT_EXECUTOR;
use crate::errors::ProvflowError;
use crate::plan::AppliedPlan;

// ============================================================================
// ExecutionOutcome
// ============================================================================

/// Result of running one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// Whether the step succeeded.
    pub success: bool,
    /// Declared outputs that exist after the run.
    pub generated_paths: Vec<String>,
    /// Failure description, if any.
    pub error: Option<String>,
    /// Process exit code, when there was a process.
    pub exit_code: Option<i32>,
}

impl ExecutionOutcome {
    /// A successful outcome.
    pub fn succeeded(generated_paths: Vec<String>) -> Self {
        Self {
            success: true,
            generated_paths,
            error: None,
            exit_code: Some(0),
        }
    }

    /// A failed outcome.
    pub fn failed(error: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self {
            success: false,
            generated_paths: Vec::new(),
            error: Some(error.into()),
            exit_code,
        }
    }
}

// ============================================================================
// WorkflowExecutor trait
// ============================================================================

/// Runs applied plans.
pub trait WorkflowExecutor: Send + Sync {
    /// Provider name (`local`).
    fn name(&self) -> &str;

    /// Run `plan` with `workdir` as the working directory.
    ///
    /// A command that runs but fails is an `Ok` outcome with `success: false`;
    /// `Err` is reserved for problems setting up the run.
    fn execute(&self, plan: &AppliedPlan, workdir: &Path) -> Result<ExecutionOutcome, ProvflowError>;
}

// ============================================================================
// LocalExecutor
// ============================================================================

/// Spawns the plan's argv as a child process.
///
/// Stream-mapped arguments are wired to files relative to `workdir`. Parent
/// directories of outputs are created beforehand, and every declared output
/// must exist afterwards.
#[derive(Debug, Default, Clone)]
pub struct LocalExecutor;

impl LocalExecutor {
    /// Create the executor.
    pub fn new() -> Self {
        Self
    }
}

impl WorkflowExecutor for LocalExecutor {
    fn name(&self) -> &str {
        DEFAULT_EXECUTOR
    }

    fn execute(&self, plan: &AppliedPlan, workdir: &Path) -> Result<ExecutionOutcome, ProvflowError> {
        let argv = plan.argv();
        let Some((program, args)) = argv.split_first() else {
            return Ok(ExecutionOutcome::failed("empty command", None));
        };

        for output in plan.output_paths() {
            if let Some(parent) = workdir.join(output).parent() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut command = Command::new(program);
        command.args(args).current_dir(workdir);
        command.stdin(match plan.stdin() {
            Some(path) => Stdio::from(File::open(workdir.join(path))?),
            None => Stdio::null(),
        });
        if let Some(path) = plan.stdout() {
            command.stdout(Stdio::from(File::create(workdir.join(path))?));
        }
        if let Some(path) = plan.stderr() {
            command.stderr(Stdio::from(File::create(workdir.join(path))?));
        }

        tracing::info!("Running `{}`", plan.display_command());
        let status = match command.status() {
            Ok(status) => status,
            Err(e) => {
                return Ok(ExecutionOutcome::failed(
                    format!("could not start `{}`: {}", program, e),
                    None,
                ))
            }
        };

        if !status.success() {
            return Ok(ExecutionOutcome::failed(
                format!("command exited with {}", status),
                status.code(),
            ));
        }

        let missing: Vec<&str> = plan
            .output_paths()
            .into_iter()
            .filter(|p| !workdir.join(p).exists())
            .collect();
        if !missing.is_empty() {
            return Ok(ExecutionOutcome::failed(
                format!("expected output(s) not created: {}", missing.join(", ")),
                status.code(),
            ));
        }

        Ok(ExecutionOutcome::succeeded(
            plan.output_paths().into_iter().map(str::to_string).collect(),
        ))
    }
}

// ============================================================================
// ExecutorRegistry
// ============================================================================

/// Executors by provider name.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: BTreeMap<String, Arc<dyn WorkflowExecutor>>,
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}

impl ExecutorRegistry {
    /// Registry with the built-in `local` executor.
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(LocalExecutor::new()));
        registry
    }

    /// Add or replace an executor under its own name.
    pub fn register(&mut self, executor: Arc<dyn WorkflowExecutor>) {
        self.executors.insert(executor.name().to_string(), executor);
    }

    /// Registered provider names.
    pub fn providers(&self) -> Vec<&str> {
        self.executors.keys().map(String::as_str).collect()
    }

    /// Look up a provider.
    ///
    /// # Errors
    ///
    /// Returns [`ProvflowError::UnknownExecutor`] if nothing is registered
    /// under `provider`.
    pub fn get(&self, provider: &str) -> Result<Arc<dyn WorkflowExecutor>, ProvflowError> {
        self.executors
            .get(provider)
            .cloned()
            .ok_or_else(|| ProvflowError::UnknownExecutor {
                provider: provider.to_string(),
                available: self.providers().join(", "),
            })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{CommandArgument, MappedStream, Plan};
    use tempfile::TempDir;

    fn copy_plan(src: &str, dst: &str) -> AppliedPlan {
        Plan::new("copy", "cp")
            .with_input(CommandArgument::new("input-1", src).at(1))
            .with_output(CommandArgument::new("output-2", dst).at(2))
            .apply(&Default::default())
            .unwrap()
    }

    #[test]
    fn test_local_executor_runs_command() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "hello").unwrap();

        let outcome = LocalExecutor::new()
            .execute(&copy_plan("a.txt", "out/b.txt"), dir.path())
            .unwrap();

        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.generated_paths, vec!["out/b.txt".to_string()]);
        assert_eq!(fs::read_to_string(dir.path().join("out/b.txt")).unwrap(), "hello");
    }

    #[test]
    fn test_local_executor_maps_streams() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("in.txt"), "one\ntwo\n").unwrap();
        let plan = Plan::new("count", "wc -l")
            .with_input(CommandArgument::new("input-stdin", "in.txt").mapped(MappedStream::Stdin))
            .with_output(
                CommandArgument::new("output-stdout", "count.txt").mapped(MappedStream::Stdout),
            )
            .apply(&Default::default())
            .unwrap();

        let outcome = LocalExecutor::new().execute(&plan, dir.path()).unwrap();

        assert!(outcome.success);
        let count = fs::read_to_string(dir.path().join("count.txt")).unwrap();
        assert_eq!(count.trim(), "2");
    }

    #[test]
    fn test_local_executor_reports_failure() {
        let dir = TempDir::new().unwrap();
        let outcome = LocalExecutor::new()
            .execute(&copy_plan("missing.txt", "b.txt"), dir.path())
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome.exit_code.is_some());
        assert!(outcome.error.unwrap().contains("exited"));
    }

    #[test]
    fn test_local_executor_requires_outputs() {
        let dir = TempDir::new().unwrap();
        let plan = Plan::new("noop", "true")
            .with_output(CommandArgument::new("output-x", "never.txt"))
            .apply(&Default::default())
            .unwrap();
        let outcome = LocalExecutor::new().execute(&plan, dir.path()).unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("never.txt"));
    }

    #[test]
    fn test_unknown_program_is_failed_outcome() {
        let dir = TempDir::new().unwrap();
        let plan = Plan::new("bogus", "provflow-no-such-program-xyz")
            .apply(&Default::default())
            .unwrap();
        let outcome = LocalExecutor::new().execute(&plan, dir.path()).unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, None);
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ExecutorRegistry::with_defaults();
        assert_eq!(registry.providers(), vec!["local"]);
        assert_eq!(registry.get("local").unwrap().name(), "local");

        let err = registry.get("cwl").err().unwrap();
        assert_eq!(
            err.to_string(),
            "Unknown workflow provider `cwl`. Available: local"
        );
    }
}
