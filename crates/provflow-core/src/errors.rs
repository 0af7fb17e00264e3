//! Error types for provflow-core.

use std::path::PathBuf;

use thiserror::Error;

/// Domain-specific errors for provflow operations.
#[derive(Error, Debug)]
pub enum ProvflowError {
    // -------------------------------------------------------------------------
    // Project / Workspace
    // -------------------------------------------------------------------------
    /// The project has not been initialized with `provflow init`.
    #[error("Project not initialized. Run `provflow init`.")]
    NotInitialized,

    /// The project is already initialized.
    #[error("Project at `{root}` is already initialized. Nothing to do.")]
    AlreadyInitialized {
        /// The project root.
        root: PathBuf,
    },

    /// A path or file was not found.
    #[error("Path not found: {0}")]
    PathNotFound(String),

    /// An invalid path was provided (e.g., disk root, outside the project).
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid argument provided to a command.
    #[error("{0}")]
    InvalidArgument(String),

    // -------------------------------------------------------------------------
    // Configuration
    // -------------------------------------------------------------------------
    /// Global configuration file is invalid.
    #[error("Global config invalid: {0}")]
    InvalidGlobalConfig(String),

    /// Project configuration is invalid.
    #[error("Project config invalid: {0}")]
    InvalidProjectConfig(String),

    /// A configuration value is invalid.
    #[error("Invalid configuration: {message}. {hint}")]
    InvalidConfiguration {
        /// Description of the invalid configuration.
        message: String,
        /// Actionable hint on how to fix it.
        hint: String,
    },

    // -------------------------------------------------------------------------
    // Provenance analysis
    // -------------------------------------------------------------------------
    /// A target path has no producing activity.
    #[error("Path '{path}' is not generated by any workflows.")]
    PathNotGenerated {
        /// The path as given by the caller.
        path: String,
    },

    /// Provenance references missing entities, or the activity graph has a cycle.
    ///
    /// Fatal for the current operation. `provflow doctor` lists every problem.
    #[error("Provenance graph is corrupt: {reason}. Run `provflow doctor` for details.")]
    GraphCorruption {
        /// What was found to be inconsistent.
        reason: String,
    },

    /// A required upstream file is missing and nothing in the run recreates it.
    #[error("Input '{path}' of activity {activity} was deleted and is not regenerated by any workflow.")]
    DeletedDependency {
        /// The missing input path.
        path: String,
        /// The activity blocked by the missing input.
        activity: String,
    },

    /// Nothing to execute for the requested operation.
    #[error("Nothing to execute.")]
    NothingToExecute,

    // -------------------------------------------------------------------------
    // Metadata
    // -------------------------------------------------------------------------
    /// The requested plan does not exist (or is invalidated).
    #[error("Workflow `{0}` not found.")]
    PlanNotFound(String),

    /// The requested activity does not exist.
    #[error("Activity `{0}` not found.")]
    ActivityNotFound(String),

    /// A usage/generation/parameter role does not exist on the bound plan.
    #[error("Role `{role}` is not declared on workflow `{plan}`.")]
    InvalidBinding {
        /// Plan name.
        plan: String,
        /// The unknown role name.
        role: String,
    },

    /// Failed to read or write a metadata file.
    #[error("Metadata I/O error at `{path}`: {message}")]
    MetadataIo {
        /// Path to the metadata file.
        path: PathBuf,
        /// Description of the I/O error.
        message: String,
    },

    /// Failed to parse a metadata record.
    #[error("Metadata parse error at `{path}`: {message}")]
    MetadataParse {
        /// Path to the metadata file.
        path: PathBuf,
        /// Description of the parse error (includes the line number).
        message: String,
    },

    // -------------------------------------------------------------------------
    // Repository history
    // -------------------------------------------------------------------------
    /// Failed to write to the history.
    #[error("Failed to write to history: {0}")]
    HistoryWrite(String),

    /// Failed to read from the history.
    #[error("Failed to read history: {0}")]
    HistoryRead(String),

    /// Failed to parse a history entry.
    #[error("Failed to parse history entry: {0}")]
    HistoryParse(String),

    /// Failed to write HEAD file.
    #[error("Failed to write HEAD: {0}")]
    HeadWrite(String),

    /// Failed to read HEAD file.
    #[error("Failed to read HEAD: {0}")]
    HeadRead(String),

    // -------------------------------------------------------------------------
    // Execution
    // -------------------------------------------------------------------------
    /// No executor is registered under the requested provider name.
    #[error("Unknown workflow provider `{provider}`. Available: {available}")]
    UnknownExecutor {
        /// The requested provider.
        provider: String,
        /// Comma-separated registered providers.
        available: String,
    },

    /// The underlying command of a step failed. Remaining batches were not run.
    #[error("Workflow `{plan}` failed (activity {activity}): {reason}. {completed} step(s) completed before the failure were recorded.")]
    ExecutorFailure {
        /// Plan name.
        plan: String,
        /// Id of the activity being re-executed.
        activity: String,
        /// Executor-reported reason.
        reason: String,
        /// Steps completed (and recorded) before the failure.
        completed: usize,
    },

    // -------------------------------------------------------------------------
    // Locking
    // -------------------------------------------------------------------------
    /// A lock could not be acquired (held by another operation, or timed out).
    #[error("Could not acquire lock `{}` after {waited_ms} ms (held by {holder}). Retry when the other operation finishes.", lock.display())]
    LockAcquisition {
        /// The lock file.
        lock: PathBuf,
        /// How long the caller waited before giving up.
        waited_ms: u64,
        /// Description of the current holder, if known.
        holder: String,
    },

    // -------------------------------------------------------------------------
    // Wrapped errors
    // -------------------------------------------------------------------------
    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A wrapped generic error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProvflowError {
    /// Whether retrying the same operation later may succeed without any change.
    ///
    /// Only lock contention qualifies; everything else is a logic or data error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockAcquisition { .. })
    }

    /// Whether the error indicates corrupt provenance data.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::GraphCorruption { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_not_generated_message() {
        let err = ProvflowError::PathNotGenerated {
            path: "data/out.txt".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Path 'data/out.txt' is not generated by any workflows."
        );
    }

    #[test]
    fn test_only_lock_errors_are_retryable() {
        let lock = ProvflowError::LockAcquisition {
            lock: PathBuf::from("/tmp/p/.provflow/project.lock"),
            waited_ms: 0,
            holder: "pid 42".to_string(),
        };
        assert!(lock.is_retryable());
        assert!(!ProvflowError::NothingToExecute.is_retryable());
        assert!(!ProvflowError::GraphCorruption {
            reason: "cycle".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_corruption_suggests_doctor() {
        let err = ProvflowError::GraphCorruption {
            reason: "cycle between a and b".to_string(),
        };
        assert!(err.is_corruption());
        assert!(err.to_string().contains("provflow doctor"));
    }
}
