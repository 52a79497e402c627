//! Rarity Config Store - per Layer/Trait/Set weights, enablement and z-order
//!
//! Weights of the enabled traits of a layer are kept as integer percentages
//! by every batch operation here: they sum to exactly 100 and any rounding
//! remainder goes to the first enabled trait in canonical order.

use rand::Rng;
use std::collections::BTreeSet;
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::model::{Blend, LayerDef, LayerRarity, RarityConfig, SetId, TraitEntry, TraitSetConfig};

pub const TOTAL_WEIGHT: f64 = 100.0;

#[derive(Debug, Clone, Default)]
pub struct RarityConfigStore {
    layers: Vec<LayerDef>,
    config: RarityConfig,
}

impl RarityConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from persisted parts. Layers or traits that only appear in the
    /// config are appended to the canonical order so nothing is orphaned.
    pub fn from_parts(mut layers: Vec<LayerDef>, mut config: RarityConfig) -> Self {
        for (name, layer) in &config {
            match layers.iter_mut().find(|l| &l.name == name) {
                Some(def) => {
                    for trait_name in layer.traits.keys() {
                        if !def.traits.contains(trait_name) {
                            def.traits.push(trait_name.clone());
                        }
                    }
                }
                None => layers.push(LayerDef::new(name.clone(), layer.traits.keys().cloned())),
            }
        }
        for def in &layers {
            let layer = config.entry(def.name.clone()).or_default();
            for trait_name in &def.traits {
                layer.traits.entry(trait_name.clone()).or_default();
            }
        }
        Self { layers, config }
    }

    pub fn layers(&self) -> &[LayerDef] {
        &self.layers
    }

    pub fn layer_names(&self) -> Vec<String> {
        self.layers.iter().map(|l| l.name.clone()).collect()
    }

    pub fn layer(&self, name: &str) -> Option<&LayerDef> {
        self.layers.iter().find(|l| l.name == name)
    }

    pub fn layer_index(&self, name: &str) -> Option<usize> {
        self.layers.iter().position(|l| l.name == name)
    }

    pub fn config(&self) -> &RarityConfig {
        &self.config
    }

    pub fn has_trait(&self, layer: &str, trait_name: &str) -> bool {
        self.layer(layer).map_or(false, |l| l.traits.iter().any(|t| t == trait_name))
    }

    pub fn default_blend(&self, layer: &str) -> Blend {
        self.config
            .get(layer)
            .and_then(|l| l.default_blend)
            .unwrap_or_default()
    }

    pub fn set_default_blend(&mut self, layer: &str, blend: Blend) -> Result<()> {
        self.require_layer(layer)?;
        self.config.entry(layer.to_string()).or_default().default_blend = Some(blend);
        Ok(())
    }

    pub fn trait_config(&self, layer: &str, trait_name: &str, set: &SetId) -> Option<&TraitSetConfig> {
        self.config.get(layer)?.traits.get(trait_name)?.sets.get(set)
    }

    /// A trait without a stored entry for the Set counts as enabled.
    pub fn is_enabled(&self, layer: &str, trait_name: &str, set: &SetId) -> bool {
        self.has_trait(layer, trait_name)
            && self.trait_config(layer, trait_name, set).map_or(true, |c| c.enabled)
    }

    /// Enabled traits of a layer for a Set, in canonical order.
    pub fn enabled_traits(&self, layer: &str, set: &SetId) -> Vec<String> {
        self.layer(layer)
            .map(|def| {
                def.traits
                    .iter()
                    .filter(|t| self.is_enabled(layer, t, set))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn layer_sum(&self, layer: &str, set: &SetId) -> f64 {
        self.enabled_traits(layer, set)
            .iter()
            .filter_map(|t| self.trait_config(layer, t, set))
            .map(|c| c.rarity)
            .sum()
    }

    // --- Structure ---

    pub fn add_layer(&mut self, def: LayerDef, sets: &[SetId]) -> Result<()> {
        if self.layer(&def.name).is_some() {
            return Err(CoreError::DuplicateLayer(def.name));
        }
        {
            let mut seen = BTreeSet::new();
            for trait_name in &def.traits {
                if !seen.insert(trait_name) {
                    return Err(CoreError::DuplicateTrait {
                        layer: def.name.clone(),
                        trait_name: trait_name.clone(),
                    });
                }
            }
        }
        let name = def.name.clone();
        let mut layer = LayerRarity::default();
        for trait_name in &def.traits {
            layer.traits.insert(trait_name.clone(), TraitEntry::default());
        }
        self.config.insert(name.clone(), layer);
        self.layers.push(def);
        for set in sets {
            self.equalize_rarity(&name, set)?;
        }
        Ok(())
    }

    /// New traits start enabled with weight 0 in every listed Set.
    pub fn add_trait(&mut self, layer: &str, trait_name: &str, sets: &[SetId]) -> Result<()> {
        if self.has_trait(layer, trait_name) {
            return Err(CoreError::DuplicateTrait {
                layer: layer.to_string(),
                trait_name: trait_name.to_string(),
            });
        }
        let def = self
            .layers
            .iter_mut()
            .find(|l| l.name == layer)
            .ok_or_else(|| CoreError::LayerNotFound(layer.to_string()))?;
        def.traits.push(trait_name.to_string());
        let entry = self
            .config
            .entry(layer.to_string())
            .or_default()
            .traits
            .entry(trait_name.to_string())
            .or_default();
        for set in sets {
            entry.sets.insert(set.clone(), TraitSetConfig::enabled_with(0.0));
        }
        Ok(())
    }

    pub fn remove_trait(&mut self, layer: &str, trait_name: &str) -> Result<()> {
        self.require_trait(layer, trait_name)?;
        if let Some(def) = self.layers.iter_mut().find(|l| l.name == layer) {
            def.traits.retain(|t| t != trait_name);
        }
        if let Some(l) = self.config.get_mut(layer) {
            l.traits.remove(trait_name);
        }
        Ok(())
    }

    // --- Set lifecycle support ---

    /// Give a Set an enabled entry for every trait it lacks. Entries that
    /// already exist are kept; a layer the Set had no entries for at all
    /// starts out equalized.
    pub fn init_set(&mut self, set: &SetId) {
        for name in self.layer_names() {
            let traits = self.layer(&name).map(|l| l.traits.clone()).unwrap_or_default();
            let total = traits.len();
            let layer = self.config.entry(name.clone()).or_default();
            let mut filled = 0;
            for trait_name in traits {
                let sets = &mut layer.traits.entry(trait_name).or_default().sets;
                if !sets.contains_key(set) {
                    sets.insert(set.clone(), TraitSetConfig::enabled_with(0.0));
                    filled += 1;
                }
            }
            if filled == total {
                self.distribute(&name, set, |_| 1.0);
            }
        }
    }

    /// Every Set id that holds at least one trait entry.
    pub fn set_ids(&self) -> BTreeSet<SetId> {
        self.config
            .values()
            .flat_map(|layer| layer.traits.values())
            .flat_map(|entry| entry.sets.keys().cloned())
            .collect()
    }

    pub fn copy_set(&mut self, from: &SetId, to: &SetId) {
        for layer in self.config.values_mut() {
            for entry in layer.traits.values_mut() {
                if let Some(config) = entry.sets.get(from).cloned() {
                    entry.sets.insert(to.clone(), config);
                }
            }
        }
    }

    pub fn remove_set(&mut self, set: &SetId) {
        for layer in self.config.values_mut() {
            for entry in layer.traits.values_mut() {
                entry.sets.remove(set);
            }
        }
    }

    // --- Single trait edits ---

    pub fn set_trait_rarity(&mut self, layer: &str, trait_name: &str, set: &SetId, rarity: f64) -> Result<()> {
        if !rarity.is_finite() || rarity < 0.0 {
            return Err(CoreError::InvalidRarity {
                layer: layer.to_string(),
                trait_name: trait_name.to_string(),
                value: rarity,
            });
        }
        self.trait_config_mut(layer, trait_name, set)?.rarity = rarity;
        Ok(())
    }

    /// Toggle a trait. Rules that reference a newly disabled trait are left
    /// for [`crate::constraints::ConstraintIndex::cleanup`].
    pub fn set_trait_enabled(&mut self, layer: &str, trait_name: &str, set: &SetId, enabled: bool) -> Result<()> {
        self.trait_config_mut(layer, trait_name, set)?.enabled = enabled;
        Ok(())
    }

    pub fn set_trait_z_index(&mut self, layer: &str, trait_name: &str, set: &SetId, z_index: Option<i32>) -> Result<()> {
        self.trait_config_mut(layer, trait_name, set)?.z_index = z_index;
        Ok(())
    }

    pub fn set_trait_blend(&mut self, layer: &str, trait_name: &str, set: &SetId, blend: Option<Blend>) -> Result<()> {
        self.trait_config_mut(layer, trait_name, set)?.blend = blend;
        Ok(())
    }

    // --- Layer-wide weight operations ---

    pub fn equalize_rarity(&mut self, layer: &str, set: &SetId) -> Result<()> {
        self.require_layer(layer)?;
        self.distribute(layer, set, |_| 1.0);
        debug!(layer, set = %set, "equalized layer rarity");
        Ok(())
    }

    pub fn randomize_layer<R: Rng>(&mut self, layer: &str, set: &SetId, rng: &mut R) -> Result<()> {
        self.require_layer(layer)?;
        let count = self.enabled_traits(layer, set).len();
        let draws: Vec<f64> = (0..count).map(|_| rng.gen_range(0.0..1.0)).collect();
        self.distribute(layer, set, |i| draws[i]);
        debug!(layer, set = %set, "randomized layer rarity");
        Ok(())
    }

    /// Re-enable every trait, clear z-index/blend overrides and equalize.
    pub fn reset_layer_rarity(&mut self, layer: &str, set: &SetId) -> Result<()> {
        let traits = self
            .layer(layer)
            .ok_or_else(|| CoreError::LayerNotFound(layer.to_string()))?
            .traits
            .clone();
        for trait_name in &traits {
            *self.trait_config_mut(layer, trait_name, set)? = TraitSetConfig::enabled_with(0.0);
        }
        self.distribute(layer, set, |_| 1.0);
        Ok(())
    }

    /// Rescale enabled weights proportionally so they sum to 100.
    pub fn adjust_rarity_values(&mut self, layer: &str, set: &SetId) -> Result<()> {
        self.require_layer(layer)?;
        let current: Vec<f64> = self
            .enabled_traits(layer, set)
            .iter()
            .map(|t| self.trait_config(layer, t, set).map_or(0.0, |c| c.rarity.max(0.0)))
            .collect();
        if current.iter().sum::<f64>() <= 0.0 {
            self.distribute(layer, set, |_| 1.0);
        } else {
            self.distribute(layer, set, |i| current[i]);
        }
        Ok(())
    }

    pub fn equalize_all_layers(&mut self, set: &SetId) -> Result<()> {
        for layer in self.layer_names() {
            self.equalize_rarity(&layer, set)?;
        }
        Ok(())
    }

    pub fn randomize_all_layers<R: Rng>(&mut self, set: &SetId, rng: &mut R) -> Result<()> {
        for layer in self.layer_names() {
            self.randomize_layer(&layer, set, rng)?;
        }
        Ok(())
    }

    pub fn reset_all(&mut self, set: &SetId) -> Result<()> {
        for layer in self.layer_names() {
            self.reset_layer_rarity(&layer, set)?;
        }
        Ok(())
    }

    /// Advisory check: enabled weights sum to 100 within `epsilon`.
    pub fn validate_layer_probabilities(&self, layer: &str, set: &SetId, epsilon: f64) -> Result<bool> {
        self.require_layer(layer)?;
        Ok((self.layer_sum(layer, set) - TOTAL_WEIGHT).abs() <= epsilon)
    }

    // --- Internals ---

    fn require_layer(&self, layer: &str) -> Result<()> {
        self.layer(layer)
            .map(|_| ())
            .ok_or_else(|| CoreError::LayerNotFound(layer.to_string()))
    }

    fn require_trait(&self, layer: &str, trait_name: &str) -> Result<()> {
        self.require_layer(layer)?;
        if self.has_trait(layer, trait_name) {
            Ok(())
        } else {
            Err(CoreError::TraitNotFound {
                layer: layer.to_string(),
                trait_name: trait_name.to_string(),
            })
        }
    }

    fn trait_config_mut(&mut self, layer: &str, trait_name: &str, set: &SetId) -> Result<&mut TraitSetConfig> {
        self.require_trait(layer, trait_name)?;
        Ok(self
            .config
            .entry(layer.to_string())
            .or_default()
            .traits
            .entry(trait_name.to_string())
            .or_default()
            .sets
            .entry(set.clone())
            .or_insert_with(|| TraitSetConfig::enabled_with(0.0)))
    }

    /// Write integer percentages proportional to `weight(i)` onto the
    /// enabled traits of a layer.
    fn distribute(&mut self, layer: &str, set: &SetId, weight: impl Fn(usize) -> f64) {
        let enabled = self.enabled_traits(layer, set);
        let weights: Vec<f64> = (0..enabled.len()).map(|i| weight(i).max(0.0)).collect();
        let shares = integer_shares(&weights);
        for (trait_name, share) in enabled.iter().zip(shares) {
            if let Ok(config) = self.trait_config_mut(layer, trait_name, set) {
                config.rarity = share;
            }
        }
    }
}

/// Floor each proportional share of 100 and give the remainder to the
/// first slot. All-zero weights are treated as uniform.
pub fn integer_shares(weights: &[f64]) -> Vec<f64> {
    if weights.is_empty() {
        return vec![];
    }
    let total: f64 = weights.iter().sum();
    let mut shares: Vec<f64> = if total > 0.0 {
        weights.iter().map(|w| (w / total * TOTAL_WEIGHT).floor()).collect()
    } else {
        vec![(TOTAL_WEIGHT / weights.len() as f64).floor(); weights.len()]
    };
    let assigned: f64 = shares.iter().sum();
    shares[0] += TOTAL_WEIGHT - assigned;
    shares
}
