//! The repository collaborator.
//!
//! The engine never touches version-control internals directly. It asks a
//! [`Repository`] for current content checksums, the ordered revisions that
//! captured a path, and to record one commit per mutating operation.
//! [`LocalRepository`] is the built-in implementation, backed by
//! `.provflow/history.jsonl` and the project working tree.

use std::path::{Path, PathBuf};

use crate::entity::Checksum;
use crate::errors::ProvflowError;
use crate::history::{append_revision, read_head, read_history, write_head, PathChange, Revision, RevisionId};
use crate::workspace::Workspace;

// ============================================================================
// Repository trait
// ============================================================================

/// Narrow interface over the version-controlled project.
pub trait Repository: Send + Sync {
    /// Absolute project root.
    fn root(&self) -> &Path;

    /// Checksum of the current working-tree content at `path`, or `None` if
    /// nothing exists there.
    fn current_checksum(&self, path: &str) -> Result<Option<Checksum>, ProvflowError>;

    /// Revisions that captured `path`, oldest first.
    fn history_of(&self, path: &str) -> Result<Vec<RevisionId>, ProvflowError>;

    /// The latest revision, if any commit exists.
    fn head(&self) -> Result<Option<RevisionId>, ProvflowError>;

    /// Allocate the id the next commit will carry.
    ///
    /// Entities created during an operation reference this id before the
    /// commit itself is written.
    fn next_revision(&self) -> RevisionId;

    /// Record the current content of `paths` as revision `revision`.
    fn commit(
        &self,
        revision: &RevisionId,
        paths: &[String],
        message: &str,
    ) -> Result<(), ProvflowError>;
}

// ============================================================================
// LocalRepository
// ============================================================================

/// [`Repository`] over the working tree and a JSONL history file.
#[derive(Debug, Clone)]
pub struct LocalRepository {
    root: PathBuf,
    history_path: PathBuf,
    head_path: PathBuf,
}

impl LocalRepository {
    /// Open the repository of a project.
    pub fn open(workspace: &Workspace) -> Self {
        Self {
            root: workspace.root().to_path_buf(),
            history_path: workspace.history_path(),
            head_path: workspace.head_path(),
        }
    }

    /// All revisions, oldest first.
    pub fn revisions(&self) -> Result<Vec<Revision>, ProvflowError> {
        read_history(&self.history_path)
    }
}

impl Repository for LocalRepository {
    fn root(&self) -> &Path {
        &self.root
    }

    fn current_checksum(&self, path: &str) -> Result<Option<Checksum>, ProvflowError> {
        Ok(Checksum::of_path(&self.root.join(path))?)
    }

    fn history_of(&self, path: &str) -> Result<Vec<RevisionId>, ProvflowError> {
        Ok(read_history(&self.history_path)?
            .into_iter()
            .filter(|r| r.touches(path))
            .map(|r| r.id)
            .collect())
    }

    fn head(&self) -> Result<Option<RevisionId>, ProvflowError> {
        read_head(&self.head_path)
    }

    fn next_revision(&self) -> RevisionId {
        RevisionId::generate()
    }

    fn commit(
        &self,
        revision: &RevisionId,
        paths: &[String],
        message: &str,
    ) -> Result<(), ProvflowError> {
        let mut changes = Vec::with_capacity(paths.len());
        for path in paths {
            changes.push(PathChange {
                path: path.clone(),
                checksum: self.current_checksum(path)?,
            });
        }

        let parent = self.head()?;
        let revision = Revision::new(revision.clone(), parent, message, changes);
        append_revision(&self.history_path, &revision)?;
        write_head(&self.head_path, &revision.id)?;

        tracing::info!(
            "Committed revision {} ({} path(s)): {}",
            revision.id.short(),
            revision.changes.len(),
            message
        );
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn repo(temp: &TempDir) -> LocalRepository {
        fs::create_dir_all(temp.path().join(".provflow")).unwrap();
        LocalRepository::open(&Workspace::from_root(temp.path()).unwrap())
    }

    #[test]
    fn test_commit_records_checksums_and_moves_head() {
        let temp = TempDir::new().unwrap();
        let repo = repo(&temp);
        fs::write(temp.path().join("a.txt"), "a").unwrap();

        let first = repo.next_revision();
        repo.commit(&first, &["a.txt".to_string()], "first").unwrap();
        assert_eq!(repo.head().unwrap(), Some(first.clone()));

        fs::write(temp.path().join("a.txt"), "a2").unwrap();
        let second = repo.next_revision();
        repo.commit(&second, &["a.txt".to_string(), "gone.txt".to_string()], "second")
            .unwrap();

        let revisions = repo.revisions().unwrap();
        assert_eq!(revisions.len(), 2);
        assert_eq!(revisions[1].parent_id, Some(first.clone()));
        assert_eq!(
            revisions[1].changes[0].checksum,
            Some(Checksum::of_bytes(b"a2"))
        );
        assert!(revisions[1].changes[1].checksum.is_none());
    }

    #[test]
    fn test_history_of_is_ordered_and_filtered() {
        let temp = TempDir::new().unwrap();
        let repo = repo(&temp);
        fs::write(temp.path().join("a.txt"), "a").unwrap();
        fs::write(temp.path().join("b.txt"), "b").unwrap();

        let r1 = repo.next_revision();
        repo.commit(&r1, &["a.txt".to_string()], "1").unwrap();
        let r2 = repo.next_revision();
        repo.commit(&r2, &["b.txt".to_string()], "2").unwrap();
        let r3 = repo.next_revision();
        repo.commit(&r3, &["a.txt".to_string()], "3").unwrap();

        assert_eq!(repo.history_of("a.txt").unwrap(), vec![r1, r3]);
        assert_eq!(repo.history_of("b.txt").unwrap(), vec![r2]);
        assert!(repo.history_of("c.txt").unwrap().is_empty());
    }

    #[test]
    fn test_current_checksum_missing_file() {
        let temp = TempDir::new().unwrap();
        let repo = repo(&temp);
        assert!(repo.current_checksum("nope.txt").unwrap().is_none());
    }
}
