//! Project detection and on-disk layout.
//!
//! This module provides the [`Workspace`] type which represents a resolved
//! provflow project on disk: its root path, its `.provflow` metadata
//! directory, and the locations of the history, metadata store and lock
//! files. It also normalizes user-supplied paths into the project-relative,
//! `/`-separated form stored in entities.

use std::path::{Component, Path, PathBuf};

use ignore::WalkBuilder;

use crate::constants::{
    should_ignore_dir, ACTIVITIES_FILENAME, COLLECTIONS_FILENAME, HEAD_FILENAME,
    HISTORY_FILENAME, METADATA_DIR, METADATA_LOCK_FILENAME, PENDING_COMMIT_FILENAME,
    PLANS_FILENAME, PROJECT_CONFIG_FILENAME, PROJECT_LOCK_FILENAME, PROVFLOW_DIR,
};
use crate::errors::ProvflowError;

// ============================================================================
// Helper Functions
// ============================================================================

/// Check if a path is a disk root (e.g., C:\ on Windows, / on Unix).
///
/// Projects are never created at the root of a filesystem.
fn is_disk_root(path: &Path) -> bool {
    if path.parent().is_some() {
        return false;
    }

    #[cfg(windows)]
    {
        if let Some(s) = path.to_str() {
            if s.len() >= 2 && s.chars().nth(1) == Some(':') {
                return true;
            }
        }
    }

    #[cfg(not(windows))]
    {
        if path == Path::new("/") {
            return true;
        }
    }

    path.canonicalize().ok().map_or(false, |p| p.parent().is_none())
}

/// Lexically normalize a path, resolving `.` and `..` without touching the
/// filesystem (the path may name a deleted file).
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

// ============================================================================
// Workspace
// ============================================================================

/// A resolved provflow project.
///
/// # Example
///
/// ```ignore
/// use provflow_core::Workspace;
/// use std::path::Path;
///
/// let workspace = Workspace::resolve(Path::new("."))?;
/// println!("Metadata: {:?}", workspace.metadata_dir());
/// ```
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Absolute path to the project root directory.
    root: PathBuf,

    /// Path to the `.provflow` directory.
    provflow_dir: PathBuf,

    /// Whether a `.git` directory exists at the project root.
    has_git: bool,

    /// Whether the project has been initialized (`.provflow/HEAD` exists).
    initialized: bool,
}

impl Workspace {
    /// Create a `Workspace` from a root directory path.
    ///
    /// # Errors
    ///
    /// Returns [`ProvflowError::PathNotFound`] if the path does not exist or is
    /// not a directory, and [`ProvflowError::InvalidPath`] for disk roots.
    pub fn from_root(root: &Path) -> Result<Self, ProvflowError> {
        let root = root
            .canonicalize()
            .map_err(|_| ProvflowError::PathNotFound(root.display().to_string()))?;

        if !root.is_dir() {
            return Err(ProvflowError::PathNotFound(root.display().to_string()));
        }

        if is_disk_root(&root) {
            return Err(ProvflowError::InvalidPath(format!(
                "Cannot create a provflow project at disk root: {}. \
                 Please use a project directory instead.",
                root.display()
            )));
        }

        let provflow_dir = root.join(PROVFLOW_DIR);
        let has_git = root.join(".git").is_dir();
        let initialized = provflow_dir.join(HEAD_FILENAME).is_file();

        Ok(Self {
            root,
            provflow_dir,
            has_git,
            initialized,
        })
    }

    /// Resolve a project by walking up from the given directory.
    ///
    /// Searches for a directory containing `.provflow` or `.git`, starting
    /// from `start_dir`. When neither is found the start directory itself is
    /// returned as an (uninitialized) candidate so `provflow init` works
    /// anywhere.
    pub fn resolve(start_dir: &Path) -> Result<Self, ProvflowError> {
        let start = start_dir
            .canonicalize()
            .map_err(|_| ProvflowError::PathNotFound(start_dir.display().to_string()))?;

        let mut current = start.as_path();

        loop {
            if is_disk_root(current) {
                break;
            }

            if current.join(PROVFLOW_DIR).is_dir() {
                return Self::from_root(current);
            }

            if current.join(".git").is_dir() {
                return Self::from_root(current);
            }

            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }

        Self::from_root(&start)
    }

    /// Get the absolute path to the project root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the `.provflow` directory.
    pub fn provflow_dir(&self) -> &Path {
        &self.provflow_dir
    }

    /// Whether a `.git` directory exists at the root.
    pub fn has_git(&self) -> bool {
        self.has_git
    }

    /// Whether `provflow init` has been run for this project.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Mark the workspace as initialized (after `init` wrote its files).
    pub(crate) fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    /// Directory holding the metadata store.
    pub fn metadata_dir(&self) -> PathBuf {
        self.provflow_dir.join(METADATA_DIR)
    }

    /// `.provflow/metadata/plans.jsonl`
    pub fn plans_path(&self) -> PathBuf {
        self.metadata_dir().join(PLANS_FILENAME)
    }

    /// `.provflow/metadata/activities.jsonl`
    pub fn activities_path(&self) -> PathBuf {
        self.metadata_dir().join(ACTIVITIES_FILENAME)
    }

    /// `.provflow/metadata/activity_collections.jsonl`
    pub fn collections_path(&self) -> PathBuf {
        self.metadata_dir().join(COLLECTIONS_FILENAME)
    }

    /// `.provflow/history.jsonl`
    pub fn history_path(&self) -> PathBuf {
        self.provflow_dir.join(HISTORY_FILENAME)
    }

    /// `.provflow/HEAD`
    pub fn head_path(&self) -> PathBuf {
        self.provflow_dir.join(HEAD_FILENAME)
    }

    /// `.provflow/project.lock`
    pub fn project_lock_path(&self) -> PathBuf {
        self.provflow_dir.join(PROJECT_LOCK_FILENAME)
    }

    /// `.provflow/metadata.lock`
    pub fn metadata_lock_path(&self) -> PathBuf {
        self.provflow_dir.join(METADATA_LOCK_FILENAME)
    }

    /// `.provflow/metadata/pending-commit.json`
    pub fn pending_commit_path(&self) -> PathBuf {
        self.metadata_dir().join(PENDING_COMMIT_FILENAME)
    }

    /// `.provflow/config.yaml`
    pub fn config_path(&self) -> PathBuf {
        self.provflow_dir.join(PROJECT_CONFIG_FILENAME)
    }

    /// Project-relative paths of the metadata files, as recorded in commits.
    pub fn metadata_relative_paths(&self) -> Vec<String> {
        [PLANS_FILENAME, ACTIVITIES_FILENAME, COLLECTIONS_FILENAME]
            .iter()
            .map(|name| format!("{}/{}/{}", PROVFLOW_DIR, METADATA_DIR, name))
            .collect()
    }

    /// Absolute location of a project-relative path.
    pub fn absolute(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Normalize a user-supplied path into the project-relative form.
    ///
    /// Relative paths are interpreted against `cwd` (which must be inside the
    /// project). The result uses `/` separators and never starts with `./`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvflowError::InvalidPath`] when the path resolves outside
    /// the project root or to the root itself.
    pub fn project_path(&self, cwd: &Path, raw: &str) -> Result<String, ProvflowError> {
        let raw_path = Path::new(raw);
        let joined = if raw_path.is_absolute() {
            raw_path.to_path_buf()
        } else {
            let cwd = cwd.canonicalize().unwrap_or_else(|_| cwd.to_path_buf());
            cwd.join(raw_path)
        };
        let normalized = lexical_normalize(&joined);

        let relative = normalized.strip_prefix(&self.root).map_err(|_| {
            ProvflowError::InvalidPath(format!("`{}` is outside the project", raw))
        })?;

        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.is_empty() {
            return Err(ProvflowError::InvalidPath(format!(
                "`{}` is the project root",
                raw
            )));
        }
        Ok(parts.join("/"))
    }

    /// Normalize an already project-relative path (as used by the engine API).
    pub fn normalize_relative(&self, raw: &str) -> Result<String, ProvflowError> {
        let root = self.root.clone();
        self.project_path(&root, raw)
    }

    /// Every file in the project, relative and sorted.
    ///
    /// Honours `.gitignore`; `.git` and `.provflow` are always skipped.
    pub fn project_files(&self) -> Result<Vec<String>, ProvflowError> {
        let walker = WalkBuilder::new(&self.root)
            .hidden(false)
            .require_git(false)
            .filter_entry(|entry| {
                !(entry.file_type().map_or(false, |t| t.is_dir())
                    && entry.file_name().to_str().map_or(false, should_ignore_dir))
            })
            .build();

        let mut files = Vec::new();
        for result in walker {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().map_or(false, |t| t.is_file()) {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&self.root) {
                files.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
        files.sort();
        Ok(files)
    }
}

// ============================================================================
// Tests
// ============================================================================
