//! Common constants used throughout provflow-core.
//!
//! Paths, file names and defaults shared by the workspace, store, lock and
//! configuration layers.

// ============================================================================
// Directory Names
// ============================================================================

/// The name of the per-project metadata directory.
///
/// All provflow-managed state lives under `.provflow/` at the project root.
pub const PROVFLOW_DIR: &str = ".provflow";

/// The subdirectory within `.provflow` holding the metadata store.
///
/// Layout: `.provflow/metadata/{plans,activities,activity_collections}.jsonl`
pub const METADATA_DIR: &str = "metadata";

/// The name of the global configuration directory (`~/.provflow/`).
pub const PROVFLOW_HOME_DIR: &str = ".provflow";

// ============================================================================
// File Names
// ============================================================================

/// Append-only plan records.
pub const PLANS_FILENAME: &str = "plans.jsonl";

/// Append-only activity records.
pub const ACTIVITIES_FILENAME: &str = "activities.jsonl";

/// Append-only activity collection records.
pub const COLLECTIONS_FILENAME: &str = "activity_collections.jsonl";

/// Repository history, one revision per line.
pub const HISTORY_FILENAME: &str = "history.jsonl";

/// Pointer to the latest revision.
pub const HEAD_FILENAME: &str = "HEAD";

/// Coarse per-project concurrency lock.
pub const PROJECT_LOCK_FILENAME: &str = "project.lock";

/// Fine-grained read/write lock over the metadata store.
pub const METADATA_LOCK_FILENAME: &str = "metadata.lock";

/// Journal of a metadata flush whose revision is not recorded yet.
pub const PENDING_COMMIT_FILENAME: &str = "pending-commit.json";

/// The name of the global configuration file.
pub const GLOBAL_CONFIG_FILENAME: &str = "config.yaml";

/// The name of the project-level configuration file (inside `.provflow/`).
pub const PROJECT_CONFIG_FILENAME: &str = "config.yaml";

// ============================================================================
// Ignored Directories
// ============================================================================

/// Directories skipped when checksumming directory entities.
pub const ALWAYS_IGNORED_DIRS: &[&str] = &[".git", ".provflow"];

/// Check if a directory name should always be ignored.
#[inline]
pub fn should_ignore_dir(name: &str) -> bool {
    ALWAYS_IGNORED_DIRS.contains(&name)
}

// ============================================================================
// Defaults
// ============================================================================

/// Name of the executor registered by [`crate::executor::ExecutorRegistry::with_defaults`].
pub const DEFAULT_EXECUTOR: &str = "local";

/// Bounded wait for queued (non-interactive) operations, in seconds.
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 30;

/// Poll interval while waiting for a held lock, in milliseconds.
pub const LOCK_POLL_INTERVAL_MS: u64 = 50;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_ignore_dir() {
        assert!(should_ignore_dir(".git"));
        assert!(should_ignore_dir(".provflow"));
        assert!(!should_ignore_dir("data"));
        assert!(!should_ignore_dir("src"));
    }
}
