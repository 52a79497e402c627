//! Backend seam - persistence and global rarity recomputation
//!
//! The core owns no file layout. Everything it persists goes through
//! [`ProjectBackend`]; loads return `None` when nothing has been stored yet.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::constraints::RuleTable;
use crate::error::{BackendError, BackendResult};
use crate::global::aggregate_from_config;
use crate::model::{GlobalRarityData, GlobalRarityRequest, ProjectState, RarityConfig};

#[async_trait]
pub trait ProjectBackend: Send + Sync {
    async fn load_project_state(&self) -> BackendResult<Option<ProjectState>>;
    async fn save_project_state(&self, state: &ProjectState) -> BackendResult<()>;

    async fn load_rarity_config(&self) -> BackendResult<Option<RarityConfig>>;
    async fn save_rarity_config(&self, config: &RarityConfig) -> BackendResult<()>;

    async fn load_incompatibility_state(&self) -> BackendResult<Option<RuleTable>>;
    async fn save_incompatibility_state(&self, data: &RuleTable) -> BackendResult<()>;

    async fn load_forced_combination_state(&self) -> BackendResult<Option<RuleTable>>;
    async fn save_forced_combination_state(&self, data: &RuleTable) -> BackendResult<()>;

    async fn load_global_rarity(&self) -> BackendResult<Option<GlobalRarityData>>;

    /// Ask the backend to recompute global rarity from the given config.
    async fn update_global_rarity_from_config(&self, request: &GlobalRarityRequest) -> BackendResult<()>;
}

#[derive(Debug, Default)]
struct MemoryState {
    project: Option<ProjectState>,
    rarity: Option<RarityConfig>,
    incompatibilities: Option<RuleTable>,
    forced: Option<RuleTable>,
    global: Option<GlobalRarityData>,
}

/// In-process backend. `set_failing(true)` makes every call fail, which is
/// how degraded paths are exercised.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    failing: AtomicBool,
    recompute_calls: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn recompute_calls(&self) -> usize {
        self.recompute_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> BackendResult<MutexGuard<'_, MemoryState>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("memory backend set to fail".into()));
        }
        self.state
            .lock()
            .map_err(|_| BackendError::Unavailable("memory backend lock poisoned".into()))
    }
}

#[async_trait]
impl ProjectBackend for MemoryBackend {
    async fn load_project_state(&self) -> BackendResult<Option<ProjectState>> {
        Ok(self.lock()?.project.clone())
    }

    async fn save_project_state(&self, state: &ProjectState) -> BackendResult<()> {
        self.lock()?.project = Some(state.clone());
        Ok(())
    }

    async fn load_rarity_config(&self) -> BackendResult<Option<RarityConfig>> {
        Ok(self.lock()?.rarity.clone())
    }

    async fn save_rarity_config(&self, config: &RarityConfig) -> BackendResult<()> {
        self.lock()?.rarity = Some(config.clone());
        Ok(())
    }

    async fn load_incompatibility_state(&self) -> BackendResult<Option<RuleTable>> {
        Ok(self.lock()?.incompatibilities.clone())
    }

    async fn save_incompatibility_state(&self, data: &RuleTable) -> BackendResult<()> {
        self.lock()?.incompatibilities = Some(data.clone());
        Ok(())
    }

    async fn load_forced_combination_state(&self) -> BackendResult<Option<RuleTable>> {
        Ok(self.lock()?.forced.clone())
    }

    async fn save_forced_combination_state(&self, data: &RuleTable) -> BackendResult<()> {
        self.lock()?.forced = Some(data.clone());
        Ok(())
    }

    async fn load_global_rarity(&self) -> BackendResult<Option<GlobalRarityData>> {
        Ok(self.lock()?.global.clone())
    }

    async fn update_global_rarity_from_config(&self, request: &GlobalRarityRequest) -> BackendResult<()> {
        let mut state = self.lock()?;
        self.recompute_calls.fetch_add(1, Ordering::SeqCst);
        state.global = Some(aggregate_from_config(&request.rarity_config, &request.sets));
        Ok(())
    }
}

const PROJECT_FILE: &str = "project.json";
const RARITY_FILE: &str = "rarity_config.json";
const INCOMPATIBILITY_FILE: &str = "incompatibilities.json";
const FORCED_FILE: &str = "forced_combinations.json";
const GLOBAL_RARITY_FILE: &str = "global_rarity.json";

/// One pretty-printed JSON file per state kind inside a project directory.
#[derive(Debug, Clone)]
pub struct JsonDirBackend {
    dir: PathBuf,
}

impl JsonDirBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read<T: DeserializeOwned>(&self, file: &str) -> BackendResult<Option<T>> {
        let path = self.dir.join(file);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no stored state");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write<T: Serialize + Sync>(&self, file: &str, value: &T) -> BackendResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let content = serde_json::to_string_pretty(value)?;
        tokio::fs::write(self.dir.join(file), content).await?;
        Ok(())
    }
}

#[async_trait]
impl ProjectBackend for JsonDirBackend {
    async fn load_project_state(&self) -> BackendResult<Option<ProjectState>> {
        self.read(PROJECT_FILE).await
    }

    async fn save_project_state(&self, state: &ProjectState) -> BackendResult<()> {
        self.write(PROJECT_FILE, state).await
    }

    async fn load_rarity_config(&self) -> BackendResult<Option<RarityConfig>> {
        self.read(RARITY_FILE).await
    }

    async fn save_rarity_config(&self, config: &RarityConfig) -> BackendResult<()> {
        self.write(RARITY_FILE, config).await
    }

    async fn load_incompatibility_state(&self) -> BackendResult<Option<RuleTable>> {
        self.read(INCOMPATIBILITY_FILE).await
    }

    async fn save_incompatibility_state(&self, data: &RuleTable) -> BackendResult<()> {
        self.write(INCOMPATIBILITY_FILE, data).await
    }

    async fn load_forced_combination_state(&self) -> BackendResult<Option<RuleTable>> {
        self.read(FORCED_FILE).await
    }

    async fn save_forced_combination_state(&self, data: &RuleTable) -> BackendResult<()> {
        self.write(FORCED_FILE, data).await
    }

    async fn load_global_rarity(&self) -> BackendResult<Option<GlobalRarityData>> {
        self.read(GLOBAL_RARITY_FILE).await
    }

    async fn update_global_rarity_from_config(&self, request: &GlobalRarityRequest) -> BackendResult<()> {
        let global = aggregate_from_config(&request.rarity_config, &request.sets);
        self.write(GLOBAL_RARITY_FILE, &global).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SetId;

    fn rules() -> RuleTable {
        let mut table = RuleTable::new();
        table
            .entry(SetId::from_number(1))
            .or_default()
            .entry("A".into())
            .or_default()
            .entry("a1".into())
            .or_default()
            .insert("B".into(), ["b1".to_string()].into());
        table
    }

    #[tokio::test]
    async fn test_memory_backend_failure_switch() {
        let backend = MemoryBackend::new();
        backend.save_incompatibility_state(&rules()).await.unwrap();
        backend.set_failing(true);
        assert!(backend.load_incompatibility_state().await.is_err());
        backend.set_failing(false);
        assert_eq!(backend.load_incompatibility_state().await.unwrap(), Some(rules()));
    }

    #[tokio::test]
    async fn test_json_dir_round_trip_and_absence() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonDirBackend::new(dir.path().join("project"));
        assert!(backend.load_forced_combination_state().await.unwrap().is_none());

        backend.save_forced_combination_state(&rules()).await.unwrap();
        let raw = std::fs::read_to_string(dir.path().join("project").join(FORCED_FILE)).unwrap();
        assert!(raw.contains("\"set1\""));
        assert_eq!(backend.load_forced_combination_state().await.unwrap(), Some(rules()));
    }

    #[tokio::test]
    async fn test_json_dir_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(RARITY_FILE), "{not json").unwrap();
        let backend = JsonDirBackend::new(dir.path());
        assert!(matches!(
            backend.load_rarity_config().await,
            Err(BackendError::Serialization(_))
        ));
    }
}
