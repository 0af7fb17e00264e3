//! Advisory file locks.
//!
//! Two locks guard a project:
//!
//! - The **project lock** (`.provflow/project.lock`) is held exclusively for
//!   the whole of any mutating command, so two updates never interleave.
//! - The **metadata lock** (`.provflow/metadata.lock`) is taken shared while
//!   reading the metadata store and exclusively while a commit flushes it
//!   and records its revision. It is always waited for.
//!
//! Both are OS-level `flock`s through `fs2`, so they are released when the
//! process dies. Lock files are never removed.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::constants::LOCK_POLL_INTERVAL_MS;
use crate::errors::ProvflowError;

/// How to behave when a lock is busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Fail immediately.
    FailFast,
    /// Poll until the timeout elapses.
    Wait(Duration),
}

#[derive(Clone, Copy)]
enum Kind {
    Shared,
    Exclusive,
}

fn open_lock_file(path: &Path) -> Result<File, ProvflowError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?)
}

fn try_lock(file: &File, kind: Kind) -> std::io::Result<()> {
    match kind {
        Kind::Shared => FileExt::try_lock_shared(file),
        Kind::Exclusive => FileExt::try_lock_exclusive(file),
    }
}

/// Poll for `kind` on `file` according to `mode`.
///
/// Returns the time spent waiting on failure.
fn acquire(file: &File, kind: Kind, mode: LockMode) -> Result<(), u64> {
    let started = Instant::now();
    let deadline = match mode {
        LockMode::FailFast => started,
        LockMode::Wait(timeout) => started + timeout,
    };
    let poll = Duration::from_millis(LOCK_POLL_INTERVAL_MS);

    loop {
        if try_lock(file, kind).is_ok() {
            return Ok(());
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(now.duration_since(started).as_millis() as u64);
        }
        std::thread::sleep(poll.min(deadline - now));
    }
}

fn read_holder(path: &Path) -> String {
    let mut holder = String::new();
    if let Ok(mut file) = File::open(path) {
        let _ = file.read_to_string(&mut holder);
    }
    let holder = holder.trim();
    if holder.is_empty() {
        "unknown".to_string()
    } else {
        holder.to_string()
    }
}

// ============================================================================
// ProjectLock
// ============================================================================

/// Exclusive project lock. Released on drop.
#[derive(Debug)]
pub struct ProjectLock {
    file: File,
    path: PathBuf,
}

impl ProjectLock {
    /// Acquire the project lock at `path`, recording `holder` in the file.
    ///
    /// # Errors
    ///
    /// Returns [`ProvflowError::LockAcquisition`] when the lock is still busy
    /// after `mode` gives up.
    pub fn acquire(path: &Path, mode: LockMode, holder: &str) -> Result<Self, ProvflowError> {
        let mut file = open_lock_file(path)?;
        if let Err(waited_ms) = acquire(&file, Kind::Exclusive, mode) {
            return Err(ProvflowError::LockAcquisition {
                lock: path.to_path_buf(),
                waited_ms,
                holder: read_holder(path),
            });
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{}", holder)?;
        file.flush()?;

        tracing::debug!("Acquired project lock {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        let _ = FileExt::unlock(&self.file);
        tracing::debug!("Released project lock {}", self.path.display());
    }
}

/// Holder description written into the project lock.
pub fn holder_description(command: &str) -> String {
    format!("pid {} ({})", std::process::id(), command)
}

// ============================================================================
// MetadataLock
// ============================================================================

/// Shared or exclusive metadata lock. Released on drop.
#[derive(Debug)]
pub struct MetadataLock {
    file: File,
    exclusive: bool,
}

impl MetadataLock {
    /// Acquire a shared (reader) lock.
    ///
    /// # Errors
    ///
    /// Returns [`ProvflowError::LockAcquisition`] on timeout.
    pub fn shared(path: &Path, mode: LockMode) -> Result<Self, ProvflowError> {
        Self::acquire(path, mode, Kind::Shared)
    }

    /// Acquire an exclusive (writer) lock.
    ///
    /// # Errors
    ///
    /// Returns [`ProvflowError::LockAcquisition`] on timeout.
    pub fn exclusive(path: &Path, mode: LockMode) -> Result<Self, ProvflowError> {
        Self::acquire(path, mode, Kind::Exclusive)
    }

    fn acquire(path: &Path, mode: LockMode, kind: Kind) -> Result<Self, ProvflowError> {
        let file = open_lock_file(path)?;
        acquire(&file, kind, mode).map_err(|waited_ms| ProvflowError::LockAcquisition {
            lock: path.to_path_buf(),
            waited_ms,
            holder: "another provflow process".to_string(),
        })?;
        Ok(Self {
            file,
            exclusive: matches!(kind, Kind::Exclusive),
        })
    }

    /// Whether this is a writer lock.
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }
}

impl Drop for MetadataLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

// ============================================================================
// Tests
// ============================================================================
