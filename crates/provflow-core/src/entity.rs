//! Entities: a path at a specific content version and repository revision.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constants::should_ignore_dir;
use crate::history::RevisionId;

// ============================================================================
// Checksum
// ============================================================================

/// SHA-256 content checksum, lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    /// Wrap an existing hex digest.
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Checksum of an in-memory byte slice.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(hex(&Sha256::digest(bytes)))
    }

    /// Checksum of the file or directory at `path`.
    ///
    /// Returns `Ok(None)` if nothing exists there. A directory checksum covers
    /// the sorted relative paths and contents of every file below it, skipping
    /// `.git` and `.provflow`.
    pub fn of_path(path: &Path) -> io::Result<Option<Self>> {
        let metadata = match path.symlink_metadata() {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        if metadata.is_dir() {
            checksum_dir(path).map(Some)
        } else {
            checksum_file(path).map(Some)
        }
    }

    /// Get the checksum as a hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for display.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(12);
        &self.0[..end]
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn checksum_file(path: &Path) -> io::Result<Checksum> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(Checksum(hex(&hasher.finalize())))
}

fn checksum_dir(dir: &Path) -> io::Result<Checksum> {
    let walker = WalkBuilder::new(dir)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .ignore(false)
        .parents(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(|entry| {
            !(entry.file_type().map_or(false, |t| t.is_dir())
                && entry.file_name().to_str().map_or(false, should_ignore_dir))
        })
        .build();

    let mut entries = Vec::new();
    for result in walker {
        let entry = result.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        if !entry.file_type().map_or(false, |t| t.is_file()) {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?
            .to_string_lossy()
            .replace('\\', "/");
        entries.push((relative, checksum_file(entry.path())?));
    }
    entries.sort();

    let mut hasher = Sha256::new();
    for (relative, checksum) in &entries {
        hasher.update(relative.as_bytes());
        hasher.update([0u8]);
        hasher.update(checksum.as_str().as_bytes());
        hasher.update([b'\n']);
    }
    Ok(Checksum(hex(&hasher.finalize())))
}

// ============================================================================
// Entity
// ============================================================================

/// A unique content version of a file or directory at a point in history.
///
/// Two entities are equal iff path, checksum and revision all match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Project-relative path with `/` separators.
    pub path: String,
    /// Content checksum at `revision`.
    pub checksum: Checksum,
    /// The revision this content version was committed in.
    pub revision: RevisionId,
}

impl Entity {
    /// Create a new entity.
    pub fn new(path: impl Into<String>, checksum: Checksum, revision: RevisionId) -> Self {
        Self {
            path: path.into(),
            checksum,
            revision,
        }
    }

    /// Whether `self.path` equals `other` or lies below it as a directory.
    pub fn is_within(&self, other: &str) -> bool {
        path_is_within(&self.path, other)
    }
}

/// Whether `path` equals `prefix` or lies below it (`prefix/...`).
pub fn path_is_within(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    path == prefix
        || (path.len() > prefix.len()
            && path.starts_with(prefix)
            && path.as_bytes()[prefix.len()] == b'/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_checksum_of_missing_path_is_none() {
        let temp = TempDir::new().unwrap();
        assert!(Checksum::of_path(&temp.path().join("missing")).unwrap().is_none());
    }

    #[test]
    fn test_checksum_of_file_matches_bytes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.txt");
        fs::write(&path, b"hello\n").unwrap();

        let on_disk = Checksum::of_path(&path).unwrap().unwrap();
        assert_eq!(on_disk, Checksum::of_bytes(b"hello\n"));
        assert_eq!(on_disk.as_str().len(), 64);
        assert_eq!(on_disk.short().len(), 12);
    }

    #[test]
    fn test_directory_checksum_tracks_content_and_names() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("out");
        fs::create_dir_all(dir.join("nested")).unwrap();
        fs::write(dir.join("x.txt"), "x").unwrap();
        fs::write(dir.join("nested/y.txt"), "y").unwrap();

        let first = Checksum::of_path(&dir).unwrap().unwrap();
        assert_eq!(first, Checksum::of_path(&dir).unwrap().unwrap());

        fs::write(dir.join("nested/y.txt"), "changed").unwrap();
        let second = Checksum::of_path(&dir).unwrap().unwrap();
        assert_ne!(first, second);

        fs::rename(dir.join("x.txt"), dir.join("z.txt")).unwrap();
        assert_ne!(second, Checksum::of_path(&dir).unwrap().unwrap());
    }

    #[test]
    fn test_entity_equality_uses_all_fields() {
        let a = Entity::new("a.txt", Checksum::new("01"), RevisionId::new("r1"));
        let same = Entity::new("a.txt", Checksum::new("01"), RevisionId::new("r1"));
        let other_rev = Entity::new("a.txt", Checksum::new("01"), RevisionId::new("r2"));
        assert_eq!(a, same);
        assert_ne!(a, other_rev);
    }

    #[test]
    fn test_path_is_within() {
        assert!(path_is_within("data/a.txt", "data"));
        assert!(path_is_within("data/a.txt", "data/"));
        assert!(path_is_within("data", "data"));
        assert!(!path_is_within("database/a.txt", "data"));
        assert!(!path_is_within("dat", "data"));
    }
}
