//! Global Rarity Aggregator - cross-Set rarity view
//!
//! The aggregate itself is computed by the backend; this component caches
//! the last good copy and owns the global/per-Set view toggle. A failed
//! backend call never clears the cache.

use tracing::{debug, info, warn};

use crate::backend::ProjectBackend;
use crate::error::Result;
use crate::hashing::config_fingerprint;
use crate::model::{GlobalRarityData, GlobalRarityRequest, GlobalTraitRarity, RarityConfig, SetId, SetInfo};
use crate::rarity::RarityConfigStore;
use crate::sets::SetRegistry;

#[derive(Debug, Clone, Default)]
pub struct GlobalRarityAggregator {
    cache: GlobalRarityData,
    is_initialized: bool,
    is_global_view_active: bool,
    last_active_set: Option<SetId>,
    last_submitted: Option<String>,
}

impl GlobalRarityAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.is_initialized
    }

    pub fn is_global_view_active(&self) -> bool {
        self.is_global_view_active
    }

    pub fn last_active_set(&self) -> Option<&SetId> {
        self.last_active_set.as_ref()
    }

    /// Cached aggregate for a layer; empty until the first successful load.
    pub fn global_rarity_data(&self, layer: &str) -> &[GlobalTraitRarity] {
        if !self.is_initialized {
            return &[];
        }
        self.cache.get(layer).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Switch between the Set-agnostic view and the per-Set view. Leaving
    /// the global view re-activates the Set that was active on entry.
    /// Returns whether the global view is now active.
    pub fn toggle_global_view(&mut self, sets: &mut SetRegistry) -> bool {
        if self.is_global_view_active {
            self.is_global_view_active = false;
            if let Some(previous) = self.last_active_set.take() {
                if sets.activate(&previous).is_err() {
                    let fallback = sets.ordered_sets().first().map(|info| info.id.clone());
                    match fallback {
                        Some(first) => {
                            warn!(set = %previous, fallback = %first, "previously active set is gone");
                            if let Err(e) = sets.activate(&first) {
                                warn!(set = %first, error = %e, "could not activate fallback set");
                            }
                        }
                        None => warn!(set = %previous, "previously active set is gone and no set remains"),
                    }
                }
            }
        } else {
            self.last_active_set = Some(sets.active_set().clone());
            self.is_global_view_active = true;
        }
        debug!(global = self.is_global_view_active, "toggled global view");
        self.is_global_view_active
    }

    /// Reload the aggregate. On failure the cached copy stays as it was.
    pub async fn refresh_global_rarity_data(&mut self, backend: &dyn ProjectBackend) -> Result<()> {
        match backend.load_global_rarity().await {
            Ok(Some(data)) => {
                self.cache = data;
                self.is_initialized = true;
                debug!(layers = self.cache.len(), "global rarity refreshed");
                Ok(())
            }
            Ok(None) => {
                debug!("no global rarity stored yet");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "global rarity refresh failed, keeping cached data");
                Err(e.into())
            }
        }
    }

    /// Submit the current config for recomputation, then reload. Skips the
    /// backend when nothing changed since the last successful submission.
    /// Returns whether a recomputation was requested.
    pub async fn update_global_rarity_from_config(
        &mut self,
        backend: &dyn ProjectBackend,
        rarity: &RarityConfigStore,
        sets: &SetRegistry,
    ) -> Result<bool> {
        let request = GlobalRarityRequest {
            rarity_config: rarity.config().clone(),
            sets: sets.sets().to_vec(),
        };
        let fingerprint = config_fingerprint(&request)?;
        if self.is_initialized && self.last_submitted.as_deref() == Some(fingerprint.as_str()) {
            debug!("config unchanged, skipping global rarity recomputation");
            return Ok(false);
        }

        if let Err(e) = backend.update_global_rarity_from_config(&request).await {
            warn!(error = %e, "global rarity recomputation failed, keeping cached data");
            return Err(e.into());
        }
        info!("global rarity recomputation requested");
        self.refresh_global_rarity_data(backend).await?;
        // only a reloaded cache makes the fingerprint current
        self.last_submitted = Some(fingerprint);
        Ok(true)
    }
}

/// Reference aggregation: per trait, the NFT-count-weighted mean of its
/// per-Set rarity, counting disabled or missing entries as 0. When no Set
/// has a target count every Set weighs the same.
pub fn aggregate_from_config(config: &RarityConfig, sets: &[SetInfo]) -> GlobalRarityData {
    let total: u64 = sets.iter().map(|s| u64::from(s.nft_count)).sum();
    let weight = |info: &SetInfo| -> f64 {
        if total > 0 {
            f64::from(info.nft_count) / total as f64
        } else {
            1.0 / sets.len() as f64
        }
    };

    config
        .iter()
        .map(|(layer, layer_rarity)| {
            let traits = layer_rarity
                .traits
                .iter()
                .map(|(trait_name, entry)| {
                    let rarity = sets
                        .iter()
                        .map(|info| {
                            let r = entry
                                .sets
                                .get(&info.id)
                                .filter(|c| c.enabled)
                                .map_or(0.0, |c| c.rarity);
                            r * weight(info)
                        })
                        .sum();
                    GlobalTraitRarity { trait_name: trait_name.clone(), rarity }
                })
                .collect();
            (layer.clone(), traits)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::config::EngineConfig;
    use crate::constraints::RuleTable;
    use crate::error::{BackendError, BackendResult};
    use crate::model::{LayerDef, ProjectState};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Recomputes fine but can refuse to hand the aggregate back.
    #[derive(Default)]
    struct FlakyReload {
        inner: MemoryBackend,
        fail_reload: AtomicBool,
    }

    #[async_trait]
    impl ProjectBackend for FlakyReload {
        async fn load_project_state(&self) -> BackendResult<Option<ProjectState>> {
            self.inner.load_project_state().await
        }
        async fn save_project_state(&self, state: &ProjectState) -> BackendResult<()> {
            self.inner.save_project_state(state).await
        }
        async fn load_rarity_config(&self) -> BackendResult<Option<RarityConfig>> {
            self.inner.load_rarity_config().await
        }
        async fn save_rarity_config(&self, config: &RarityConfig) -> BackendResult<()> {
            self.inner.save_rarity_config(config).await
        }
        async fn load_incompatibility_state(&self) -> BackendResult<Option<RuleTable>> {
            self.inner.load_incompatibility_state().await
        }
        async fn save_incompatibility_state(&self, data: &RuleTable) -> BackendResult<()> {
            self.inner.save_incompatibility_state(data).await
        }
        async fn load_forced_combination_state(&self) -> BackendResult<Option<RuleTable>> {
            self.inner.load_forced_combination_state().await
        }
        async fn save_forced_combination_state(&self, data: &RuleTable) -> BackendResult<()> {
            self.inner.save_forced_combination_state(data).await
        }
        async fn load_global_rarity(&self) -> BackendResult<Option<GlobalRarityData>> {
            if self.fail_reload.load(Ordering::SeqCst) {
                return Err(BackendError::Unavailable("reload refused".into()));
            }
            self.inner.load_global_rarity().await
        }
        async fn update_global_rarity_from_config(&self, request: &GlobalRarityRequest) -> BackendResult<()> {
            self.inner.update_global_rarity_from_config(request).await
        }
    }

    fn setup() -> (RarityConfigStore, SetRegistry) {
        let mut rarity = RarityConfigStore::new();
        rarity.add_layer(LayerDef::new("Eyes", ["blue", "red"]), &[]).unwrap();
        let sets = SetRegistry::new(&mut rarity, &EngineConfig::default());
        (rarity, sets)
    }

    #[test]
    fn test_toggle_restores_active_set() {
        let (mut rarity, mut sets) = setup();
        sets.add_set(&mut rarity);
        sets.set_active_set(2).unwrap();
        let mut aggregator = GlobalRarityAggregator::new();

        assert!(aggregator.toggle_global_view(&mut sets));
        assert_eq!(aggregator.last_active_set().map(SetId::as_str), Some("set2"));
        sets.set_active_set(1).unwrap();
        assert!(!aggregator.toggle_global_view(&mut sets));
        assert_eq!(sets.active_set().as_str(), "set2");
    }

    #[test]
    fn test_toggle_falls_back_when_set_deleted() {
        let (mut rarity, mut sets) = setup();
        let mut rules = crate::constraints::ConstraintIndex::default();
        sets.add_set(&mut rarity);
        sets.set_active_set(2).unwrap();
        let mut aggregator = GlobalRarityAggregator::new();
        aggregator.toggle_global_view(&mut sets);
        sets.delete_set(2, &mut rarity, &mut rules).unwrap();
        aggregator.toggle_global_view(&mut sets);
        assert_eq!(sets.active_set().as_str(), "set1");
    }

    #[test]
    fn test_aggregate_weighted_by_nft_count() {
        let (mut rarity, mut sets) = setup();
        sets.add_set(&mut rarity);
        let two = SetId::from_number(2);
        rarity.set_trait_enabled("Eyes", "red", &two, false).unwrap();
        rarity.set_trait_rarity("Eyes", "blue", &two, 100.0).unwrap();
        sets.set_nft_count(1, 30).unwrap();
        sets.set_nft_count(2, 10).unwrap();

        let global = aggregate_from_config(rarity.config(), sets.sets());
        let eyes = &global["Eyes"];
        let blue = eyes.iter().find(|t| t.trait_name == "blue").unwrap();
        let red = eyes.iter().find(|t| t.trait_name == "red").unwrap();
        assert!((blue.rarity - 62.5).abs() < 1e-9);
        assert!((red.rarity - 37.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_empty_until_first_load() {
        let (rarity, sets) = setup();
        let backend = MemoryBackend::new();
        let mut aggregator = GlobalRarityAggregator::new();
        aggregator.refresh_global_rarity_data(&backend).await.unwrap();
        assert!(!aggregator.is_initialized());
        assert!(aggregator.global_rarity_data("Eyes").is_empty());

        assert!(aggregator
            .update_global_rarity_from_config(&backend, &rarity, &sets)
            .await
            .unwrap());
        assert!(aggregator.is_initialized());
        assert_eq!(aggregator.global_rarity_data("Eyes").len(), 2);
    }

    #[tokio::test]
    async fn test_unchanged_config_skips_backend() {
        let (mut rarity, sets) = setup();
        let backend = MemoryBackend::new();
        let mut aggregator = GlobalRarityAggregator::new();
        aggregator.update_global_rarity_from_config(&backend, &rarity, &sets).await.unwrap();
        let skipped = aggregator.update_global_rarity_from_config(&backend, &rarity, &sets).await.unwrap();
        assert!(!skipped);
        assert_eq!(backend.recompute_calls(), 1);

        rarity.set_trait_rarity("Eyes", "blue", &SetId::from_number(1), 90.0).unwrap();
        aggregator.update_global_rarity_from_config(&backend, &rarity, &sets).await.unwrap();
        assert_eq!(backend.recompute_calls(), 2);
    }

    #[tokio::test]
    async fn test_backend_failure_keeps_cache() {
        let (rarity, sets) = setup();
        let backend = MemoryBackend::new();
        let mut aggregator = GlobalRarityAggregator::new();
        aggregator.update_global_rarity_from_config(&backend, &rarity, &sets).await.unwrap();
        let before = aggregator.global_rarity_data("Eyes").to_vec();

        backend.set_failing(true);
        assert!(aggregator.refresh_global_rarity_data(&backend).await.is_err());
        assert_eq!(aggregator.global_rarity_data("Eyes"), before.as_slice());
        assert!(aggregator.is_initialized());
    }

    #[tokio::test]
    async fn test_failed_reload_is_retried() {
        let (mut rarity, sets) = setup();
        let backend = FlakyReload::default();
        let mut aggregator = GlobalRarityAggregator::new();
        aggregator.update_global_rarity_from_config(&backend, &rarity, &sets).await.unwrap();

        let one = SetId::from_number(1);
        rarity.set_trait_rarity("Eyes", "blue", &one, 80.0).unwrap();
        rarity.set_trait_rarity("Eyes", "red", &one, 20.0).unwrap();
        backend.fail_reload.store(true, Ordering::SeqCst);
        assert!(aggregator.update_global_rarity_from_config(&backend, &rarity, &sets).await.is_err());
        let stale = aggregator.global_rarity_data("Eyes").iter().find(|t| t.trait_name == "blue").unwrap().rarity;
        assert_eq!(stale, 50.0);

        backend.fail_reload.store(false, Ordering::SeqCst);
        let requested = aggregator.update_global_rarity_from_config(&backend, &rarity, &sets).await.unwrap();
        assert!(requested);
        let blue = aggregator.global_rarity_data("Eyes").iter().find(|t| t.trait_name == "blue").unwrap().rarity;
        assert_eq!(blue, 80.0);
        assert_eq!(backend.inner.recompute_calls(), 3);
    }
}
