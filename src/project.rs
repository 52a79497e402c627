//! Project - owned state and the single entry point for callers
//!
//! A `Project` owns the rarity store, set registry, rule index and global
//! rarity cache, and hands each component read-only handles to the others.
//! Nothing lives in globals, so independent projects never interfere.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::ProjectBackend;
use crate::compositing::{CompositedLayer, LayerCompositingOrderResolver};
use crate::config::EngineConfig;
use crate::constraints::{CombinationResolver, ConstraintIndex, RuleBook};
use crate::error::{BackendResult, CoreError, Result};
use crate::global::GlobalRarityAggregator;
use crate::hashing::config_fingerprint;
use crate::model::{GlobalRarityRequest, LayerDef, ProjectState, Selection, SetId};
use crate::rarity::RarityConfigStore;
use crate::sets::SetRegistry;
use crate::validation::{ValidationContext, ValidationResult, Validator};
use crate::{ENGINE_VERSION, FORMAT_VERSION, MIN_FORMAT_VERSION};

/// Summary of a project's configuration at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigManifest {
    pub id: String,
    pub engine_version: String,
    pub format_version: String,
    pub created_at: DateTime<Utc>,
    pub fingerprint: String,
    pub set_count: usize,
    pub layer_count: usize,
    pub incompatibility_rules: usize,
    pub forced_rules: usize,
    pub validation: ValidationResult,
}

pub struct Project {
    config: EngineConfig,
    rarity: RarityConfigStore,
    sets: SetRegistry,
    rules: ConstraintIndex,
    global: GlobalRarityAggregator,
    validator: Validator,
}

impl Project {
    pub fn new(config: EngineConfig, layers: Vec<LayerDef>) -> Result<Self> {
        let mut rarity = RarityConfigStore::new();
        for layer in layers {
            rarity.add_layer(layer, &[])?;
        }
        let sets = SetRegistry::new(&mut rarity, &config);
        Ok(Self {
            config,
            rarity,
            sets,
            rules: ConstraintIndex::default(),
            global: GlobalRarityAggregator::new(),
            validator: Validator::new(),
        })
    }

    /// Load a project. Absent pieces start empty; a failing backend call is
    /// logged and treated as absent so the project still opens. Without a
    /// readable Set list, Sets are recovered from the ids that the rarity
    /// config and rule books mention, so their data survives the next save.
    pub async fn load(backend: &dyn ProjectBackend, config: EngineConfig) -> Result<Self> {
        let state = degrade(backend.load_project_state().await, "project state");
        if let Some(state) = &state {
            check_format_version(&state.format_version)?;
        }
        let rarity_config = degrade(backend.load_rarity_config().await, "rarity config").unwrap_or_default();
        let incompatibilities = degrade(backend.load_incompatibility_state().await, "incompatibilities").unwrap_or_default();
        let forced = degrade(backend.load_forced_combination_state().await, "forced combinations").unwrap_or_default();
        let mut rules = ConstraintIndex::new(incompatibilities, forced);

        let (rarity, sets) = match state {
            Some(s) => {
                let mut rarity = RarityConfigStore::from_parts(s.layers, rarity_config);
                let sets = SetRegistry::from_parts(s.sets, s.set_orders, s.active_set, &mut rarity, &config);
                // rules of Sets the Set list no longer holds are stale
                rules.incompatibilities.retain_sets(|id| sets.contains(id));
                rules.forced.retain_sets(|id| sets.contains(id));
                (rarity, sets)
            }
            None => {
                let mut rarity = RarityConfigStore::from_parts(vec![], rarity_config);
                let mut ids = rarity.set_ids();
                ids.extend(rules.incompatibilities.table().keys().cloned());
                ids.extend(rules.forced.table().keys().cloned());
                let sets = SetRegistry::recover(ids, &mut rarity, &config);
                (rarity, sets)
            }
        };

        let mut global = GlobalRarityAggregator::new();
        // stale or missing global data is fine at load
        let _ = global.refresh_global_rarity_data(backend).await;

        info!(sets = sets.len(), layers = rarity.layers().len(), "project loaded");
        Ok(Self {
            config,
            rarity,
            sets,
            rules,
            global,
            validator: Validator::new(),
        })
    }

    /// Re-read both rule books. On failure the in-memory rules are kept.
    pub async fn reload_rules(&mut self, backend: &dyn ProjectBackend) -> Result<()> {
        let incompatibilities = backend.load_incompatibility_state().await;
        let forced = backend.load_forced_combination_state().await;
        match (incompatibilities, forced) {
            (Ok(i), Ok(f)) => {
                self.rules = ConstraintIndex::new(i.unwrap_or_default(), f.unwrap_or_default());
                Ok(())
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "rule reload failed, keeping in-memory rules");
                Err(e.into())
            }
        }
    }

    /// Persist everything. Every piece is attempted; the first failure is
    /// returned.
    pub async fn save(&self, backend: &dyn ProjectBackend) -> Result<()> {
        let results = [
            backend.save_project_state(&self.state()).await,
            backend.save_rarity_config(self.rarity.config()).await,
            backend.save_incompatibility_state(self.rules.incompatibilities.table()).await,
            backend.save_forced_combination_state(self.rules.forced.table()).await,
        ];
        let mut first = None;
        for result in results {
            if let Err(e) = result {
                warn!(error = %e, "save failed");
                first.get_or_insert(e);
            }
        }
        match first {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    pub fn state(&self) -> ProjectState {
        ProjectState {
            format_version: FORMAT_VERSION.to_string(),
            layers: self.rarity.layers().to_vec(),
            sets: self.sets.sets().to_vec(),
            set_orders: self.sets.set_orders().to_vec(),
            active_set: Some(self.sets.active_set().clone()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn rarity(&self) -> &RarityConfigStore {
        &self.rarity
    }

    pub fn rarity_mut(&mut self) -> &mut RarityConfigStore {
        &mut self.rarity
    }

    pub fn sets(&self) -> &SetRegistry {
        &self.sets
    }

    pub fn rules(&self) -> &ConstraintIndex {
        &self.rules
    }

    pub fn rules_mut(&mut self) -> &mut ConstraintIndex {
        &mut self.rules
    }

    pub fn global(&self) -> &GlobalRarityAggregator {
        &self.global
    }

    pub fn active_set(&self) -> &SetId {
        self.sets.active_set()
    }

    // --- Sets ---

    pub fn add_set(&mut self) -> SetId {
        self.sets.add_set(&mut self.rarity)
    }

    pub fn duplicate_set(&mut self, number: u32) -> Result<SetId> {
        self.sets.duplicate_set(number, &mut self.rarity)
    }

    pub fn delete_set(&mut self, number: u32) -> Result<()> {
        self.sets.delete_set(number, &mut self.rarity, &mut self.rules)
    }

    pub fn set_active_set(&mut self, number: u32) -> Result<()> {
        self.sets.set_active_set(number)
    }

    pub fn rename_set(&mut self, number: u32, name: &str) -> Result<()> {
        self.sets.rename_set(number, name)
    }

    pub fn set_custom_set_name(&mut self, number: u32, name: &str) -> Result<()> {
        self.sets.set_custom_set_name(number, name)
    }

    pub fn reorder_sets(&mut self, active_id: &SetId, over_id: &SetId) -> Result<()> {
        self.sets.reorder_sets(active_id, over_id)
    }

    pub fn set_nft_count(&mut self, number: u32, count: u32) -> Result<()> {
        self.sets.set_nft_count(number, count)
    }

    pub fn set_layer_order(&mut self, set: &SetId, order: Vec<String>) -> Result<()> {
        self.sets.set_layer_order(set, order, &self.rarity)
    }

    // --- Layers and traits ---

    pub fn add_layer(&mut self, layer: LayerDef) -> Result<()> {
        let name = layer.name.clone();
        let ids: Vec<SetId> = self.sets.sets().iter().map(|s| s.id.clone()).collect();
        self.rarity.add_layer(layer, &ids)?;
        self.sets.append_layer(&name);
        Ok(())
    }

    pub fn add_trait(&mut self, layer: &str, trait_name: &str) -> Result<()> {
        let ids: Vec<SetId> = self.sets.sets().iter().map(|s| s.id.clone()).collect();
        self.rarity.add_trait(layer, trait_name, &ids)
    }

    /// Remove a trait and every rule that mentions it.
    pub fn remove_trait(&mut self, layer: &str, trait_name: &str) -> Result<()> {
        self.rarity.remove_trait(layer, trait_name)?;
        self.rules.cleanup(&self.rarity);
        Ok(())
    }

    /// Toggle a trait; disabling it also drops rules that mention it.
    pub fn set_trait_enabled(&mut self, layer: &str, trait_name: &str, set: &SetId, enabled: bool) -> Result<()> {
        self.rarity.set_trait_enabled(layer, trait_name, set, enabled)?;
        if !enabled {
            self.rules.cleanup(&self.rarity);
        }
        Ok(())
    }

    pub fn equalize_rarity(&mut self, layer: &str) -> Result<()> {
        let set = self.sets.active_set().clone();
        self.rarity.equalize_rarity(layer, &set)
    }

    pub fn randomize_layer<R: Rng>(&mut self, layer: &str, rng: &mut R) -> Result<()> {
        let set = self.sets.active_set().clone();
        self.rarity.randomize_layer(layer, &set, rng)
    }

    pub fn validate_layer_probabilities(&self, layer: &str) -> Result<bool> {
        self.rarity
            .validate_layer_probabilities(layer, self.sets.active_set(), self.config.probability_epsilon)
    }

    // --- Resolution ---

    pub fn resolver(&self) -> CombinationResolver<'_> {
        self.rules.resolver()
    }

    /// Layer order used for forced-combination checks in a Set.
    pub fn ordered_layers(&self, set: &SetId) -> Result<Vec<String>> {
        let info = self.sets.get(set).ok_or_else(|| CoreError::SetNotFound(set.clone()))?;
        if info.layer_order.is_empty() {
            Ok(self.rarity.layer_names())
        } else {
            Ok(info.layer_order.clone())
        }
    }

    /// Whether `(layer, trait)` may join `selected` in `set`: the trait must
    /// be enabled and pass both rule gates.
    pub fn is_candidate_legal(&self, layer: &str, trait_name: &str, selected: &Selection, set: &SetId) -> Result<bool> {
        let order = self.ordered_layers(set)?;
        Ok(self.rarity.is_enabled(layer, trait_name, set)
            && self.resolver().is_legal(layer, trait_name, selected, &order, set))
    }

    pub fn compositing_order(&self, selection: &Selection, set: &SetId) -> Vec<CompositedLayer> {
        LayerCompositingOrderResolver::new(&self.rarity, self.config.z_index_step).resolve(selection, set)
    }

    /// Drop rules referencing disabled or removed traits.
    pub fn cleanup_rules(&mut self) -> usize {
        self.rules.cleanup(&self.rarity)
    }

    // --- Global rarity ---

    pub fn toggle_global_view(&mut self) -> bool {
        self.global.toggle_global_view(&mut self.sets)
    }

    pub async fn refresh_global_rarity_data(&mut self, backend: &dyn ProjectBackend) -> Result<()> {
        self.global.refresh_global_rarity_data(backend).await
    }

    pub async fn update_global_rarity_from_config(&mut self, backend: &dyn ProjectBackend) -> Result<bool> {
        self.global
            .update_global_rarity_from_config(backend, &self.rarity, &self.sets)
            .await
    }

    // --- Validation ---

    /// Validate one Set, or all of them when `set` is `None`.
    pub fn validate(&self, set: Option<&SetId>) -> Result<ValidationResult> {
        let targets = match set {
            Some(id) if self.sets.contains(id) => vec![id.clone()],
            Some(id) => return Err(CoreError::SetNotFound(id.clone())),
            None => self.sets.ordered_sets().iter().map(|s| s.id.clone()).collect(),
        };
        let ctx = ValidationContext {
            rarity: &self.rarity,
            sets: &self.sets,
            rules: &self.rules,
            config: &self.config,
            targets,
        };
        Ok(self.validator.validate(&ctx))
    }

    pub fn manifest(&self) -> Result<ConfigManifest> {
        let request = GlobalRarityRequest {
            rarity_config: self.rarity.config().clone(),
            sets: self.sets.sets().to_vec(),
        };
        let rule_total = |book: &RuleBook| -> usize {
            book.table().keys().map(|id| book.rule_count(id)).sum()
        };
        Ok(ConfigManifest {
            id: Uuid::new_v4().to_string(),
            engine_version: ENGINE_VERSION.to_string(),
            format_version: FORMAT_VERSION.to_string(),
            created_at: Utc::now(),
            fingerprint: config_fingerprint(&request)?,
            set_count: self.sets.len(),
            layer_count: self.rarity.layers().len(),
            incompatibility_rules: rule_total(&self.rules.incompatibilities),
            forced_rules: rule_total(&self.rules.forced),
            validation: self.validate(None)?,
        })
    }

    /// Layers that hold an enabled trait in every Set.
    pub fn fully_enabled_layers(&self) -> BTreeSet<String> {
        self.rarity
            .layer_names()
            .into_iter()
            .filter(|layer| {
                self.sets
                    .sets()
                    .iter()
                    .all(|s| !self.rarity.enabled_traits(layer, &s.id).is_empty())
            })
            .collect()
    }
}

fn degrade<T>(result: BackendResult<Option<T>>, what: &str) -> Option<T> {
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, what, "backend load failed, continuing without it");
            None
        }
    }
}

fn check_format_version(found: &str) -> Result<()> {
    let incompatible = || CoreError::IncompatibleFormat {
        found: found.to_string(),
        required: MIN_FORMAT_VERSION.to_string(),
    };
    let found_ver = semver::Version::parse(found).map_err(|_| incompatible())?;
    let min_ver = semver::Version::parse(MIN_FORMAT_VERSION).map_err(|_| incompatible())?;
    if found_ver < min_ver {
        return Err(incompatible());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_version_check() {
        assert!(check_format_version("1.0.0").is_ok());
        assert!(check_format_version("1.4.2").is_ok());
        assert!(matches!(
            check_format_version("0.9.0"),
            Err(CoreError::IncompatibleFormat { .. })
        ));
        assert!(check_format_version("garbage").is_err());
    }

    #[test]
    fn test_disabling_trait_cleans_rules() {
        let mut project = Project::new(
            EngineConfig::default(),
            vec![LayerDef::new("A", ["a1", "a2"]), LayerDef::new("B", ["b1"])],
        )
        .unwrap();
        let set = project.active_set().clone();
        project.rules_mut().add_incompatibility(&set, ("A", "a1"), ("B", "b1"));
        project.set_trait_enabled("A", "a1", &set, false).unwrap();
        assert!(project.rules().incompatibilities.is_empty());
        assert!(!project.is_candidate_legal("A", "a1", &Selection::new(), &set).unwrap());
    }

    #[test]
    fn test_add_layer_reaches_every_set() {
        let mut project = Project::new(EngineConfig::default(), vec![LayerDef::new("A", ["a1"])]).unwrap();
        let second = project.add_set();
        project.add_layer(LayerDef::new("B", ["b1", "b2", "b3"])).unwrap();
        assert_eq!(project.rarity().layer_sum("B", &second), 100.0);
        assert_eq!(project.ordered_layers(&second).unwrap(), vec!["A".to_string(), "B".to_string()]);
        assert_eq!(project.fully_enabled_layers().len(), 2);
    }

    #[test]
    fn test_manifest_counts() {
        let mut project = Project::new(EngineConfig::default(), vec![LayerDef::new("A", ["a1"])]).unwrap();
        let set = project.active_set().clone();
        project
            .rules_mut()
            .set_forced_combination(&set, ("A", "a1"), "B", ["b1".to_string(), "b2".to_string()].into());
        let manifest = project.manifest().unwrap();
        assert_eq!(manifest.forced_rules, 2);
        assert_eq!(manifest.set_count, 1);
        assert_eq!(manifest.fingerprint.len(), 64);
        // forced rule points at an unknown layer
        assert!(manifest.validation.valid);
        assert!(!manifest.validation.violations.is_empty());
    }
}
