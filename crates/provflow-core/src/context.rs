//! Project context and the transaction coordinator.
//!
//! A [`ProjectContext`] is everything an operation needs about one project:
//! its workspace, effective configuration and repository. Mutating operations
//! go through a [`Transaction`]:
//!
//! 1. The project lock is acquired (fail-fast or bounded wait).
//! 2. The revision id of the final commit is allocated up front, so new
//!    entities can reference it.
//! 3. Metadata records are staged in memory.
//! 4. [`Transaction::commit`] takes the exclusive metadata lock, writes a
//!    pending-commit journal, flushes the stage, records one commit covering
//!    touched files and metadata, and only then removes the journal and
//!    releases the lock.
//!
//! A journal left behind means a commit was interrupted between the flush
//! and the revision. The next reader or writer truncates the metadata files
//! back to the lengths in the journal, so metadata never references a
//! revision missing from history.
//!
//! Dropping a transaction without committing discards the stage, leaving the
//! store untouched.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::activity::Agent;
use crate::config::ResolvedConfig;
use crate::errors::ProvflowError;
use crate::history::RevisionId;
use crate::lock::{holder_description, LockMode, MetadataLock, ProjectLock};
use crate::repository::{LocalRepository, Repository};
use crate::store::{JsonlMetadataStore, MetadataSnapshot, MetadataStore, StagedStore};
use crate::workspace::Workspace;

// ============================================================================
// Pending-commit journal
// ============================================================================

/// Store file lengths before a flush, keyed to the revision that flush
/// belongs to.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PendingCommit {
    revision: RevisionId,
    lengths: Vec<u64>,
}

// ============================================================================
// ProjectContext
// ============================================================================

/// One opened project.
#[derive(Clone)]
pub struct ProjectContext {
    workspace: Workspace,
    config: ResolvedConfig,
    repository: Arc<dyn Repository>,
    interactive: bool,
}

impl std::fmt::Debug for ProjectContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectContext")
            .field("root", &self.workspace.root())
            .field("interactive", &self.interactive)
            .finish()
    }
}

impl ProjectContext {
    /// Open an initialized project with its local repository.
    ///
    /// # Errors
    ///
    /// Returns [`ProvflowError::NotInitialized`] if `provflow init` has not run.
    pub fn open(workspace: Workspace, config: ResolvedConfig) -> Result<Self, ProvflowError> {
        if !workspace.is_initialized() {
            return Err(ProvflowError::NotInitialized);
        }
        let repository = Arc::new(LocalRepository::open(&workspace));
        Ok(Self::with_repository(workspace, config, repository))
    }

    /// Build a context around any repository.
    pub fn with_repository(
        workspace: Workspace,
        config: ResolvedConfig,
        repository: Arc<dyn Repository>,
    ) -> Self {
        Self {
            workspace,
            config,
            repository,
            interactive: true,
        }
    }

    /// Mark the context as interactive (fail fast on a busy lock) or queued.
    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// The project workspace.
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Effective configuration.
    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// The repository collaborator.
    pub fn repository(&self) -> &dyn Repository {
        self.repository.as_ref()
    }

    /// Lock behaviour of the project lock for this context.
    pub fn lock_mode(&self) -> LockMode {
        self.config.locking.mode(self.interactive)
    }

    fn metadata_lock_mode(&self) -> LockMode {
        self.config.locking.metadata_mode()
    }

    /// The person recorded on new activities.
    pub fn agent(&self) -> Agent {
        let name = self
            .config
            .user
            .name
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "unknown".to_string());
        Agent::person(name, self.config.user.email.clone())
    }

    /// Load a consistent metadata snapshot under the shared metadata lock.
    ///
    /// Waits for a concurrent commit to finish. An interrupted commit is
    /// rolled back first.
    pub fn snapshot(&self) -> Result<MetadataSnapshot, ProvflowError> {
        let lock_path = self.workspace.metadata_lock_path();
        loop {
            {
                let _guard = MetadataLock::shared(&lock_path, self.metadata_lock_mode())?;
                if !self.workspace.pending_commit_path().exists() {
                    return MetadataSnapshot::load(&JsonlMetadataStore::open(&self.workspace));
                }
            }
            self.recover_interrupted_commit()?;
        }
    }

    /// Undo the flush of a commit whose revision was never recorded.
    fn recover_interrupted_commit(&self) -> Result<(), ProvflowError> {
        let _guard = MetadataLock::exclusive(
            &self.workspace.metadata_lock_path(),
            self.metadata_lock_mode(),
        )?;
        let path = self.workspace.pending_commit_path();
        let pending: PendingCommit = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        if self.repository.head()?.as_ref() == Some(&pending.revision) {
            tracing::debug!(
                "Commit {} was recorded before it was interrupted",
                pending.revision.short()
            );
        } else {
            tracing::warn!(
                "Rolling back metadata of interrupted commit {}",
                pending.revision.short()
            );
            JsonlMetadataStore::open(&self.workspace).truncate_to(&pending.lengths)?;
        }
        fs::remove_file(&path)?;
        Ok(())
    }

    /// Start a mutating operation named `command` (used in the lock holder).
    ///
    /// # Errors
    ///
    /// Returns [`ProvflowError::LockAcquisition`] if another operation holds
    /// the project lock.
    pub fn begin(&self, command: &str) -> Result<Transaction<'_>, ProvflowError> {
        let lock = ProjectLock::acquire(
            &self.workspace.project_lock_path(),
            self.lock_mode(),
            &holder_description(command),
        )?;
        if self.workspace.pending_commit_path().exists() {
            self.recover_interrupted_commit()?;
        }
        let revision = self.repository.next_revision();
        tracing::debug!("Transaction for `{}` will commit {}", command, revision.short());
        Ok(Transaction {
            ctx: self,
            _lock: lock,
            store: StagedStore::new(JsonlMetadataStore::open(&self.workspace)),
            revision,
            touched: BTreeSet::new(),
            finished: false,
        })
    }
}

// ============================================================================
// Transaction
// ============================================================================

/// A locked, staged mutation of one project.
pub struct Transaction<'a> {
    ctx: &'a ProjectContext,
    _lock: ProjectLock,
    store: StagedStore<JsonlMetadataStore>,
    revision: RevisionId,
    touched: BTreeSet<String>,
    finished: bool,
}

impl<'a> Transaction<'a> {
    /// The revision the final commit will carry.
    pub fn revision(&self) -> &RevisionId {
        &self.revision
    }

    /// The owning context.
    pub fn context(&self) -> &'a ProjectContext {
        self.ctx
    }

    /// The staged store.
    pub fn store(&self) -> &StagedStore<JsonlMetadataStore> {
        &self.store
    }

    /// The staged store, for appending records.
    pub fn store_mut(&mut self) -> &mut StagedStore<JsonlMetadataStore> {
        &mut self.store
    }

    /// Snapshot of persisted plus staged metadata.
    pub fn snapshot(&self) -> Result<MetadataSnapshot, ProvflowError> {
        let _guard = MetadataLock::shared(
            &self.ctx.workspace.metadata_lock_path(),
            self.ctx.metadata_lock_mode(),
        )?;
        MetadataSnapshot::load(&self.store)
    }

    /// Include a project-relative path in the final commit.
    pub fn touch(&mut self, path: impl Into<String>) {
        self.touched.insert(path.into());
    }

    /// Paths included so far.
    pub fn touched(&self) -> impl Iterator<Item = &str> {
        self.touched.iter().map(String::as_str)
    }

    /// Flush the stage and record one commit.
    ///
    /// The exclusive metadata lock is held until the revision is recorded,
    /// so readers see either none or all of this commit. Returns `None` when
    /// there was nothing to record.
    pub fn commit(mut self, message: &str) -> Result<Option<RevisionId>, ProvflowError> {
        if !self.store.is_dirty() && self.touched.is_empty() {
            self.finished = true;
            return Ok(None);
        }

        let ctx = self.ctx;
        let workspace = &ctx.workspace;
        let _guard =
            MetadataLock::exclusive(&workspace.metadata_lock_path(), ctx.metadata_lock_mode())?;

        let journal = workspace.pending_commit_path();
        let dirty = self.store.is_dirty();
        if dirty {
            let pending = PendingCommit {
                revision: self.revision.clone(),
                lengths: JsonlMetadataStore::open(workspace).file_lengths()?,
            };
            fs::write(&journal, serde_json::to_vec(&pending)?)?;
        }

        let mut paths: Vec<String> = self.touched.iter().cloned().collect();
        if self.store.flush()? > 0 {
            paths.extend(workspace.metadata_relative_paths());
        }
        ctx.repository.commit(&self.revision, &paths, message)?;
        if dirty {
            fs::remove_file(&journal)?;
        }
        self.finished = true;
        Ok(Some(self.revision.clone()))
    }

    /// Record touched files only, dropping staged metadata.
    pub fn commit_files_only(mut self, message: &str) -> Result<Option<RevisionId>, ProvflowError> {
        self.store.discard();
        if self.touched.is_empty() {
            self.finished = true;
            return Ok(None);
        }
        let paths: Vec<String> = self.touched.iter().cloned().collect();
        self.ctx.repository.commit(&self.revision, &paths, message)?;
        self.finished = true;
        Ok(Some(self.revision.clone()))
    }

    /// Discard everything staged.
    pub fn abort(mut self) {
        self.store.discard();
        self.finished = true;
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!("Transaction {} dropped without commit", self.revision.short());
            self.store.discard();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
