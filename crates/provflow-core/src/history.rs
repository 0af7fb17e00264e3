//! Repository history: revisions and the HEAD pointer.
//!
//! The history is stored as a JSONL file with one revision per line. Each
//! revision records the content checksum of every path it captured (or a
//! deletion marker), which is what `history_of(path)` queries walk.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::Checksum;
use crate::errors::ProvflowError;

// ============================================================================
// RevisionId
// ============================================================================

/// A unique identifier for a revision.
///
/// Revision IDs are UUIDs stored as strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionId(String);

impl RevisionId {
    /// Create a new revision ID from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique revision ID using UUID v4.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the revision ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, for display.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(8);
        &self.0[..end]
    }
}

impl std::fmt::Display for RevisionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RevisionId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl AsRef<str> for RevisionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Revision
// ============================================================================

/// The state of one path captured by a revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathChange {
    /// Project-relative path.
    pub path: String,

    /// Content checksum, or `None` when the path was deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Checksum>,
}

/// A revision in the history.
///
/// Revisions form a linked list via `parent_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    /// Unique revision ID.
    pub id: RevisionId,

    /// Parent revision ID (None for the first revision).
    pub parent_id: Option<RevisionId>,

    /// Timestamp of the revision.
    pub timestamp: DateTime<Utc>,

    /// Human-readable message describing the revision.
    pub message: String,

    /// Paths captured by this revision.
    #[serde(default)]
    pub changes: Vec<PathChange>,
}

impl Revision {
    /// Create a revision with a pre-allocated ID and the current timestamp.
    pub fn new(
        id: RevisionId,
        parent_id: Option<RevisionId>,
        message: impl Into<String>,
        changes: Vec<PathChange>,
    ) -> Self {
        Self {
            id,
            parent_id,
            timestamp: Utc::now(),
            message: message.into(),
            changes,
        }
    }

    /// Whether this revision captured `path`.
    pub fn touches(&self, path: &str) -> bool {
        self.changes.iter().any(|c| c.path == path)
    }
}

// ============================================================================
// History I/O
// ============================================================================

/// Append a revision to a history file.
///
/// Creates the file and parent directories if they don't exist.
pub fn append_revision(path: &Path, revision: &Revision) -> Result<(), ProvflowError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            ProvflowError::HistoryWrite(format!("Failed to create history directory: {}", e))
        })?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ProvflowError::HistoryWrite(format!("Failed to open history: {}", e)))?;

    let line = serde_json::to_string(revision).map_err(|e| {
        ProvflowError::HistoryWrite(format!("Failed to serialize revision: {}", e))
    })?;

    writeln!(file, "{}", line)
        .map_err(|e| ProvflowError::HistoryWrite(format!("Failed to write revision: {}", e)))?;

    file.flush()
        .map_err(|e| ProvflowError::HistoryWrite(format!("Failed to flush history: {}", e)))?;

    Ok(())
}

/// Read all revisions from a history file, oldest first.
///
/// Returns an empty vector if the file does not exist. Empty lines are skipped.
pub fn read_history(path: &Path) -> Result<Vec<Revision>, ProvflowError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)
        .map_err(|e| ProvflowError::HistoryRead(format!("Failed to open history: {}", e)))?;

    let reader = BufReader::new(file);
    let mut revisions = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result.map_err(|e| {
            ProvflowError::HistoryRead(format!("Failed to read line {}: {}", line_num + 1, e))
        })?;

        if line.trim().is_empty() {
            continue;
        }

        let revision: Revision = serde_json::from_str(&line).map_err(|e| {
            ProvflowError::HistoryParse(format!("Failed to parse line {}: {}", line_num + 1, e))
        })?;

        revisions.push(revision);
    }

    Ok(revisions)
}

/// Get the most recent revision, if any.
pub fn last_revision(path: &Path) -> Result<Option<Revision>, ProvflowError> {
    Ok(read_history(path)?.pop())
}

/// Read the HEAD pointer.
///
/// Returns `None` if the file is missing or empty.
pub fn read_head(path: &Path) -> Result<Option<RevisionId>, ProvflowError> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path)
        .map_err(|e| ProvflowError::HeadRead(format!("Failed to read HEAD: {}", e)))?;

    let id = content.trim();
    if id.is_empty() {
        return Ok(None);
    }

    Ok(Some(RevisionId::new(id)))
}

/// Write the HEAD pointer.
pub fn write_head(path: &Path, id: &RevisionId) -> Result<(), ProvflowError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            ProvflowError::HeadWrite(format!("Failed to create HEAD directory: {}", e))
        })?;
    }

    fs::write(path, format!("{}\n", id))
        .map_err(|e| ProvflowError::HeadWrite(format!("Failed to write HEAD: {}", e)))?;

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn change(path: &str, content: &[u8]) -> PathChange {
        PathChange {
            path: path.to_string(),
            checksum: Some(Checksum::of_bytes(content)),
        }
    }

    #[test]
    fn test_revision_id_generate() {
        let a = RevisionId::generate();
        let b = RevisionId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
        assert_eq!(a.short().len(), 8);
    }

    #[test]
    fn test_history_empty() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("history.jsonl");
        assert!(read_history(&path).unwrap().is_empty());
        assert!(last_revision(&path).unwrap().is_none());
    }

    #[test]
    fn test_history_append_and_read() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/history.jsonl");

        let first = Revision::new(
            RevisionId::new("r1"),
            None,
            "init",
            vec![change("a.txt", b"a")],
        );
        let second = Revision::new(
            RevisionId::new("r2"),
            Some(first.id.clone()),
            "update",
            vec![
                change("b.txt", b"b"),
                PathChange {
                    path: "a.txt".to_string(),
                    checksum: None,
                },
            ],
        );
        append_revision(&path, &first).unwrap();
        append_revision(&path, &second).unwrap();

        let revisions = read_history(&path).unwrap();
        assert_eq!(revisions.len(), 2);
        assert_eq!(revisions[1].parent_id, Some(RevisionId::new("r1")));
        assert!(revisions[1].touches("a.txt"));
        assert!(revisions[1].changes[1].checksum.is_none());
        assert_eq!(last_revision(&path).unwrap().unwrap().id.as_str(), "r2");
    }

    #[test]
    fn test_history_parse_error_reports_line() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("history.jsonl");
        fs::write(&path, "\n{not json}\n").unwrap();

        match read_history(&path) {
            Err(ProvflowError::HistoryParse(msg)) => assert!(msg.contains("line 2")),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_head_write_and_read() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sub/HEAD");
        assert!(read_head(&path).unwrap().is_none());

        write_head(&path, &RevisionId::new("abc")).unwrap();
        assert_eq!(read_head(&path).unwrap(), Some(RevisionId::new("abc")));

        fs::write(&path, "  \n").unwrap();
        assert!(read_head(&path).unwrap().is_none());
    }
}
