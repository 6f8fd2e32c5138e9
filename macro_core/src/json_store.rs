//! JSON document store implementing every collaborator interface.
//!
//! Backs the CLI and tests. The whole document is held in memory; when
//! file-backed, each write is persisted with an exclusive lock and an
//! atomic rename so a crashed write never leaves a truncated store.

use crate::catalog::CatalogEntry;
use crate::providers::{CatalogSource, InstanceStore, MetricProvider, PlanEditor, PlanStore};
use crate::types::{
    AppliedPlan, ExerciseInstance, MacroRule, PlanChange, SetRecord, WorkoutDetail,
};
use crate::{Error, Result};
use async_trait::async_trait;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tempfile::NamedTempFile;

/// Everything the engine reads and writes, as one document
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    pub applied_plans: Vec<AppliedPlan>,
    #[serde(default)]
    pub macros: Vec<MacroRule>,
    #[serde(default)]
    pub workout_details: Vec<WorkoutDetail>,
    #[serde(default)]
    pub exercise_instances: Vec<ExerciseInstance>,
    #[serde(default)]
    pub catalog: Vec<CatalogEntry>,
    /// Plan changes executed so far, oldest first
    #[serde(default)]
    pub plan_changes: Vec<PlanChange>,
}

impl StoreData {
    /// Load a store document with shared locking
    ///
    /// Returns an empty document if the file doesn't exist. A corrupt file
    /// is an error: an empty fallback would silently hide every macro.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No store file at {:?}, starting empty", path);
            return Ok(Self::default());
        }

        let file = File::open(path)?;
        file.lock_shared()?;

        let mut contents = String::new();
        let read = std::io::BufReader::new(&file).read_to_string(&mut contents);
        file.unlock()?;
        read?;

        let data: StoreData = serde_json::from_str(&contents)?;
        tracing::debug!(
            "Loaded store from {:?}: {} plans, {} macros",
            path,
            data.applied_plans.len(),
            data.macros.len()
        );
        Ok(data)
    }

    /// Save the document atomically
    ///
    /// Writes to a locked temp file in the same directory, syncs it and
    /// renames it over the original.
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;

        let temp = NamedTempFile::new_in(parent)?;
        temp.as_file().lock_exclusive()?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            serde_json::to_writer_pretty(&mut writer, self)?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;
        temp.persist(path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Saved store to {:?}", path);
        Ok(())
    }
}

/// In-memory store, optionally persisted to a JSON file
#[derive(Debug)]
pub struct JsonStore {
    path: Option<PathBuf>,
    data: Mutex<StoreData>,
}

impl JsonStore {
    pub fn in_memory(data: StoreData) -> Self {
        Self {
            path: None,
            data: Mutex::new(data),
        }
    }

    /// Open a file-backed store, creating an empty one if missing
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = StoreData::load(&path)?;
        Ok(Self {
            path: Some(path),
            data: Mutex::new(data),
        })
    }

    /// Copy of the current document
    pub fn snapshot(&self) -> Result<StoreData> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreData>> {
        self.data
            .lock()
            .map_err(|_| Error::Other("store lock poisoned".into()))
    }

    /// Apply `f` to a copy of the document, persist it, then publish it
    fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut StoreData) -> Result<()>,
    {
        let mut guard = self.lock()?;
        let mut next = guard.clone();
        f(&mut next)?;
        if let Some(path) = &self.path {
            next.save(path)?;
        }
        *guard = next;
        Ok(())
    }
}

#[async_trait]
impl PlanStore for JsonStore {
    async fn applied_plan(&self, applied_plan_id: i64) -> Result<Option<AppliedPlan>> {
        let data = self.lock()?;
        Ok(data
            .applied_plans
            .iter()
            .find(|p| p.id == applied_plan_id)
            .cloned())
    }

    async fn macros(&self, plan_id: i64) -> Result<Vec<MacroRule>> {
        let data = self.lock()?;
        Ok(data
            .macros
            .iter()
            .filter(|m| m.plan_id == plan_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MetricProvider for JsonStore {
    async fn workout_detail(&self, workout_id: i64) -> Result<Option<WorkoutDetail>> {
        let data = self.lock()?;
        Ok(data
            .workout_details
            .iter()
            .find(|d| d.workout_id == workout_id)
            .cloned())
    }
}

#[async_trait]
impl InstanceStore for JsonStore {
    async fn exercise_instances(&self, workout_id: i64) -> Result<Vec<ExerciseInstance>> {
        let data = self.lock()?;
        Ok(data
            .exercise_instances
            .iter()
            .filter(|i| i.workout_id == workout_id)
            .cloned()
            .collect())
    }

    async fn write_sets(
        &self,
        workout_id: i64,
        exercise_id: i64,
        sets: &[SetRecord],
    ) -> Result<()> {
        self.update(|data| {
            // New sets arrive without ids; number them after the highest id
            // in the store so ids stay unique across instances.
            let mut next_id = max_set_id(&data.exercise_instances) + 1;

            let instance = data
                .exercise_instances
                .iter_mut()
                .find(|i| i.workout_id == workout_id && i.exercise_id == exercise_id)
                .ok_or_else(|| {
                    Error::Downstream(format!(
                        "no exercise {} in workout {}",
                        exercise_id, workout_id
                    ))
                })?;

            let mut sets = sets.to_vec();
            for set in sets.iter_mut().filter(|s| s.id().is_none()) {
                set.set(SetRecord::ID, serde_json::json!(next_id));
                next_id += 1;
            }
            instance.sets = sets;
            Ok(())
        })
    }
}

fn max_set_id(instances: &[ExerciseInstance]) -> i64 {
    instances
        .iter()
        .flat_map(|i| i.sets.iter().filter_map(SetRecord::id))
        .max()
        .unwrap_or(0)
}

#[async_trait]
impl CatalogSource for JsonStore {
    async fn catalog(&self) -> Result<Vec<CatalogEntry>> {
        Ok(self.lock()?.catalog.clone())
    }
}

#[async_trait]
impl PlanEditor for JsonStore {
    async fn execute(&self, change: &PlanChange) -> Result<()> {
        self.update(|data| {
            if !data
                .applied_plans
                .iter()
                .any(|p| p.id == change.applied_plan_id)
            {
                return Err(Error::PlanNotFound(change.applied_plan_id));
            }
            data.plan_changes.push(change.clone());
            Ok(())
        })?;
        tracing::info!(
            "Recorded mesocycle injection for plan {} from macro {}",
            change.applied_plan_id,
            change.macro_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_data() -> StoreData {
        StoreData {
            applied_plans: vec![AppliedPlan {
                id: 1,
                plan_id: 10,
                current_workout_index: 0,
                workouts: vec![],
            }],
            exercise_instances: vec![ExerciseInstance {
                workout_id: 100,
                exercise_id: 7,
                sets: vec![SetRecord::from(json!({"id": 4, "reps": 5}))],
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_write_sets_assigns_ids() {
        let store = JsonStore::in_memory(sample_data());
        let sets = vec![
            SetRecord::from(json!({"id": 4, "reps": 5})),
            SetRecord::from(json!({"reps": 5})),
        ];
        store.write_sets(100, 7, &sets).await.unwrap();

        let instances = store.exercise_instances(100).await.unwrap();
        assert_eq!(instances[0].sets.len(), 2);
        assert_eq!(instances[0].sets[1].id(), Some(5));
    }

    #[tokio::test]
    async fn test_write_unknown_instance_is_downstream_error() {
        let store = JsonStore::in_memory(sample_data());
        let result = store.write_sets(100, 99, &[]).await;
        assert!(matches!(result, Err(Error::Downstream(_))));
    }

    #[tokio::test]
    async fn test_file_store_persists_writes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("store.json");
        sample_data().save(&path).unwrap();

        let store = JsonStore::open(&path).unwrap();
        store
            .write_sets(100, 7, &[SetRecord::from(json!({"id": 4, "reps": 8}))])
            .await
            .unwrap();

        let reloaded = StoreData::load(&path).unwrap();
        assert_eq!(
            reloaded.exercise_instances[0].sets[0].number("reps"),
            Some(8.0)
        );
    }

    #[test]
    fn test_load_nonexistent_returns_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let data = StoreData::load(&temp_dir.path().join("missing.json")).unwrap();
        assert!(data.applied_plans.is_empty());
    }

    #[test]
    fn test_corrupted_store_is_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("store.json");
        std::fs::write(&path, "{ invalid json }").unwrap();

        assert!(matches!(StoreData::load(&path), Err(Error::Json(_))));
    }

    #[test]
    fn test_atomic_save_leaves_no_temp_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("store.json");
        sample_data().save(&path).unwrap();

        let extras: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != "store.json")
            .collect();
        assert!(extras.is_empty(), "Expected only store.json, found {:?}", extras);
    }

    #[tokio::test]
    async fn test_execute_plan_change_requires_plan() {
        let store = JsonStore::in_memory(sample_data());
        let change = PlanChange {
            macro_id: 3,
            applied_plan_id: 2,
            source: crate::types::MesocycleSource::ByTemplate { template_id: 1 },
            placement: None,
            on_conflict: None,
            matched_workouts: vec![],
        };
        assert!(store.execute(&change).await.is_err());

        let change = PlanChange {
            applied_plan_id: 1,
            ..change
        };
        store.execute(&change).await.unwrap();
        assert_eq!(store.snapshot().unwrap().plan_changes.len(), 1);
    }
}
