//! The append-only metadata store.
//!
//! Plans, activities and activity collections are stored as JSONL files,
//! one record per line. Records are never rewritten: superseding a record
//! (for example to soft-invalidate it) appends a new line with the same id,
//! and readers keep the last record per id.
//!
//! [`StagedStore`] layers an in-memory set of pending records over a base
//! store. Transactions write only to the staged layer and flush it on commit;
//! dropping it discards the changes.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::hash::Hash;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::activity::{Activity, ActivityCollection, ActivityId};
use crate::errors::ProvflowError;
use crate::plan::{Plan, PlanArena, PlanId};
use crate::workspace::Workspace;

// ============================================================================
// JSONL helpers
// ============================================================================

/// Append records to a JSONL file, creating it (and parents) if needed.
pub(crate) fn append_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<(), ProvflowError> {
    if records.is_empty() {
        return Ok(());
    }
    let io_err = |message: String| ProvflowError::MetadataIo {
        path: path.to_path_buf(),
        message,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(format!("Failed to create directory: {}", e)))?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_err(format!("Failed to open: {}", e)))?;

    let mut buffer = String::new();
    for record in records {
        let line = serde_json::to_string(record)
            .map_err(|e| io_err(format!("Failed to serialize record: {}", e)))?;
        buffer.push_str(&line);
        buffer.push('\n');
    }

    file.write_all(buffer.as_bytes())
        .map_err(|e| io_err(format!("Failed to write: {}", e)))?;
    file.flush()
        .map_err(|e| io_err(format!("Failed to flush: {}", e)))?;
    Ok(())
}

/// Read every record of a JSONL file. Missing file => empty.
pub(crate) fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, ProvflowError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path).map_err(|e| ProvflowError::MetadataIo {
        path: path.to_path_buf(),
        message: format!("Failed to open: {}", e),
    })?;

    let mut records = Vec::new();
    for (line_num, line_result) in BufReader::new(file).lines().enumerate() {
        let line = line_result.map_err(|e| ProvflowError::MetadataIo {
            path: path.to_path_buf(),
            message: format!("Failed to read line {}: {}", line_num + 1, e),
        })?;

        if line.trim().is_empty() {
            continue;
        }

        let record = serde_json::from_str(&line).map_err(|e| ProvflowError::MetadataParse {
            path: path.to_path_buf(),
            message: format!("line {}: {}", line_num + 1, e),
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Keep the last record per key, in first-seen order.
fn last_per_key<T, K, F>(records: impl IntoIterator<Item = T>, key: F) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut out: Vec<T> = Vec::new();
    for record in records {
        let k = key(&record);
        match index.get(&k) {
            Some(&i) => out[i] = record,
            None => {
                index.insert(k, out.len());
                out.push(record);
            }
        }
    }
    out
}

// ============================================================================
// MetadataStore trait
// ============================================================================

/// Persistent home of plans, activities and collections.
pub trait MetadataStore {
    /// Every activity (last record per id), in insertion order.
    fn load_all_activities(&self) -> Result<Vec<Activity>, ProvflowError>;

    /// Append an activity record.
    fn append(&mut self, activity: Activity) -> Result<(), ProvflowError>;

    /// Load one plan (last record for its id).
    fn load_plan(&self, id: &PlanId) -> Result<Option<Plan>, ProvflowError>;

    /// Append a plan record.
    fn save_plan(&mut self, plan: Plan) -> Result<(), ProvflowError>;

    /// Every plan (last record per id), in insertion order.
    fn load_all_plans(&self) -> Result<Vec<Plan>, ProvflowError>;

    /// Append an activity collection.
    fn append_collection(&mut self, collection: ActivityCollection) -> Result<(), ProvflowError>;

    /// Every activity collection.
    fn load_all_collections(&self) -> Result<Vec<ActivityCollection>, ProvflowError>;

    /// The order index the next appended activity should carry.
    fn next_order_index(&self) -> Result<u64, ProvflowError> {
        Ok(self
            .load_all_activities()?
            .iter()
            .map(|a| a.order_index + 1)
            .max()
            .unwrap_or(1))
    }
}

// ============================================================================
// JsonlMetadataStore
// ============================================================================

/// [`MetadataStore`] over the JSONL files in `.provflow/metadata/`.
#[derive(Debug, Clone)]
pub struct JsonlMetadataStore {
    plans_path: PathBuf,
    activities_path: PathBuf,
    collections_path: PathBuf,
}

impl JsonlMetadataStore {
    /// Open the store of a project.
    pub fn open(workspace: &Workspace) -> Self {
        Self {
            plans_path: workspace.plans_path(),
            activities_path: workspace.activities_path(),
            collections_path: workspace.collections_path(),
        }
    }

    fn paths(&self) -> [&PathBuf; 3] {
        [&self.plans_path, &self.activities_path, &self.collections_path]
    }

    /// Create the store files if missing.
    pub fn create_files(&self) -> Result<(), ProvflowError> {
        for path in self.paths() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            OpenOptions::new().create(true).append(true).open(path)?;
        }
        Ok(())
    }

    /// Byte length of each store file (plans, activities, collections).
    pub fn file_lengths(&self) -> Result<Vec<u64>, ProvflowError> {
        let mut lengths = Vec::with_capacity(3);
        for path in self.paths() {
            lengths.push(match fs::metadata(path) {
                Ok(meta) => meta.len(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
                Err(e) => {
                    return Err(ProvflowError::MetadataIo {
                        path: path.clone(),
                        message: format!("Failed to stat: {}", e),
                    })
                }
            });
        }
        Ok(lengths)
    }

    /// Cut each store file back to a length from [`Self::file_lengths`],
    /// dropping every record appended after it was taken.
    pub fn truncate_to(&self, lengths: &[u64]) -> Result<(), ProvflowError> {
        for (path, &length) in self.paths().into_iter().zip(lengths) {
            let io_err = |e: std::io::Error| ProvflowError::MetadataIo {
                path: path.clone(),
                message: format!("Failed to truncate: {}", e),
            };
            if !path.exists() {
                continue;
            }
            let file = OpenOptions::new().write(true).open(path).map_err(io_err)?;
            if file.metadata().map_err(io_err)?.len() > length {
                file.set_len(length).map_err(io_err)?;
            }
        }
        Ok(())
    }

    fn append_activities(&self, activities: &[Activity]) -> Result<(), ProvflowError> {
        append_jsonl(&self.activities_path, activities)
    }

    fn append_plans(&self, plans: &[Plan]) -> Result<(), ProvflowError> {
        append_jsonl(&self.plans_path, plans)
    }

    fn append_collections(&self, collections: &[ActivityCollection]) -> Result<(), ProvflowError> {
        append_jsonl(&self.collections_path, collections)
    }
}

impl MetadataStore for JsonlMetadataStore {
    fn load_all_activities(&self) -> Result<Vec<Activity>, ProvflowError> {
        let records: Vec<Activity> = read_jsonl(&self.activities_path)?;
        Ok(last_per_key(records, |a| a.id.clone()))
    }

    fn append(&mut self, activity: Activity) -> Result<(), ProvflowError> {
        self.append_activities(std::slice::from_ref(&activity))
    }

    fn load_plan(&self, id: &PlanId) -> Result<Option<Plan>, ProvflowError> {
        Ok(self.load_all_plans()?.into_iter().find(|p| &p.id == id))
    }

    fn save_plan(&mut self, plan: Plan) -> Result<(), ProvflowError> {
        self.append_plans(std::slice::from_ref(&plan))
    }

    fn load_all_plans(&self) -> Result<Vec<Plan>, ProvflowError> {
        let records: Vec<Plan> = read_jsonl(&self.plans_path)?;
        Ok(last_per_key(records, |p| p.id.clone()))
    }

    fn append_collection(&mut self, collection: ActivityCollection) -> Result<(), ProvflowError> {
        self.append_collections(std::slice::from_ref(&collection))
    }

    fn load_all_collections(&self) -> Result<Vec<ActivityCollection>, ProvflowError> {
        let records: Vec<ActivityCollection> = read_jsonl(&self.collections_path)?;
        Ok(last_per_key(records, |c| c.id.clone()))
    }
}

// ============================================================================
// StagedStore
// ============================================================================

/// Pending records layered over a base store.
///
/// Reads see base records plus staged ones. Nothing reaches the base store
/// until [`StagedStore::flush`].
#[derive(Debug)]
pub struct StagedStore<S: MetadataStore> {
    base: S,
    plans: Vec<Plan>,
    activities: Vec<Activity>,
    collections: Vec<ActivityCollection>,
}

impl<S: MetadataStore> StagedStore<S> {
    /// Stage over `base`.
    pub fn new(base: S) -> Self {
        Self {
            base,
            plans: Vec::new(),
            activities: Vec::new(),
            collections: Vec::new(),
        }
    }

    /// Whether anything is staged.
    pub fn is_dirty(&self) -> bool {
        !(self.plans.is_empty() && self.activities.is_empty() && self.collections.is_empty())
    }

    /// Staged activities, in append order.
    pub fn staged_activities(&self) -> &[Activity] {
        &self.activities
    }

    /// Ids of the staged activities.
    pub fn staged_activity_ids(&self) -> Vec<ActivityId> {
        self.activities.iter().map(|a| a.id.clone()).collect()
    }

    /// Write every staged record to the base store and clear the stage.
    ///
    /// Plans are written first so activities never reference an unknown plan.
    pub fn flush(&mut self) -> Result<usize, ProvflowError> {
        let count = self.plans.len() + self.activities.len() + self.collections.len();
        for plan in self.plans.drain(..) {
            self.base.save_plan(plan)?;
        }
        for activity in self.activities.drain(..) {
            self.base.append(activity)?;
        }
        for collection in self.collections.drain(..) {
            self.base.append_collection(collection)?;
        }
        Ok(count)
    }

    /// Drop every staged record.
    pub fn discard(&mut self) {
        if self.is_dirty() {
            tracing::debug!(
                "Discarding {} staged plan(s), {} activit(ies), {} collection(s)",
                self.plans.len(),
                self.activities.len(),
                self.collections.len()
            );
        }
        self.plans.clear();
        self.activities.clear();
        self.collections.clear();
    }
}

impl<S: MetadataStore> MetadataStore for StagedStore<S> {
    fn load_all_activities(&self) -> Result<Vec<Activity>, ProvflowError> {
        let mut records = self.base.load_all_activities()?;
        records.extend(self.activities.iter().cloned());
        Ok(last_per_key(records, |a| a.id.clone()))
    }

    fn append(&mut self, activity: Activity) -> Result<(), ProvflowError> {
        self.activities.push(activity);
        Ok(())
    }

    fn load_plan(&self, id: &PlanId) -> Result<Option<Plan>, ProvflowError> {
        if let Some(plan) = self.plans.iter().rev().find(|p| &p.id == id) {
            return Ok(Some(plan.clone()));
        }
        self.base.load_plan(id)
    }

    fn save_plan(&mut self, plan: Plan) -> Result<(), ProvflowError> {
        self.plans.push(plan);
        Ok(())
    }

    fn load_all_plans(&self) -> Result<Vec<Plan>, ProvflowError> {
        let mut records = self.base.load_all_plans()?;
        records.extend(self.plans.iter().cloned());
        Ok(last_per_key(records, |p| p.id.clone()))
    }

    fn append_collection(&mut self, collection: ActivityCollection) -> Result<(), ProvflowError> {
        self.collections.push(collection);
        Ok(())
    }

    fn load_all_collections(&self) -> Result<Vec<ActivityCollection>, ProvflowError> {
        let mut records = self.base.load_all_collections()?;
        records.extend(self.collections.iter().cloned());
        Ok(last_per_key(records, |c| c.id.clone()))
    }
}

// ============================================================================
// MetadataSnapshot
// ============================================================================

/// Everything an analysis needs, loaded once and then treated as immutable.
#[derive(Debug, Clone, Default)]
pub struct MetadataSnapshot {
    /// All activities, current and invalidated.
    pub activities: Vec<Activity>,
    /// All plans.
    pub plans: PlanArena,
    /// All collections.
    pub collections: Vec<ActivityCollection>,
}

impl MetadataSnapshot {
    /// Load a snapshot from any store.
    pub fn load(store: &dyn MetadataStore) -> Result<Self, ProvflowError> {
        Ok(Self {
            activities: store.load_all_activities()?,
            plans: PlanArena::from_records(store.load_all_plans()?),
            collections: store.load_all_collections()?,
        })
    }

    /// Current (not invalidated) activities.
    pub fn current_activities(&self) -> impl Iterator<Item = &Activity> {
        self.activities.iter().filter(|a| a.is_current())
    }
}

// ============================================================================
// Tests
// ============================================================================
