//! Layer Compositing Order - draw order for a resolved selection

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{Blend, Selection, SetId};
use crate::rarity::RarityConfigStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositedLayer {
    pub layer: String,
    pub trait_name: String,
    pub z_index: i32,
    pub blend: Blend,
}

pub struct LayerCompositingOrderResolver<'a> {
    rarity: &'a RarityConfigStore,
    z_index_step: i32,
}

impl<'a> LayerCompositingOrderResolver<'a> {
    pub fn new(rarity: &'a RarityConfigStore, z_index_step: i32) -> Self {
        Self { rarity, z_index_step }
    }

    /// `index * step`, clamped to the `i32` range.
    fn default_z_index(&self, index: usize) -> i32 {
        i32::try_from(index)
            .unwrap_or(i32::MAX)
            .saturating_mul(self.z_index_step)
    }

    /// Bottom-to-top draw order. A trait's own zIndex for the Set wins,
    /// otherwise the layer sits at `canonical index * step`. Equal values keep
    /// canonical order.
    pub fn resolve(&self, selection: &Selection, set: &SetId) -> Vec<CompositedLayer> {
        let mut resolved: Vec<CompositedLayer> = self
            .rarity
            .layers()
            .iter()
            .enumerate()
            .filter_map(|(index, def)| {
                let trait_name = selection.get(&def.name)?;
                let config = self.rarity.trait_config(&def.name, trait_name, set);
                let z_index = config
                    .and_then(|c| c.z_index)
                    .unwrap_or_else(|| self.default_z_index(index));
                let blend = config
                    .and_then(|c| c.blend)
                    .unwrap_or_else(|| self.rarity.default_blend(&def.name));
                Some(CompositedLayer {
                    layer: def.name.clone(),
                    trait_name: trait_name.clone(),
                    z_index,
                    blend,
                })
            })
            .collect();

        for layer in selection.keys() {
            if self.rarity.layer(layer).is_none() {
                warn!(layer = layer.as_str(), "selected layer is not part of the project, not composited");
            }
        }

        resolved.sort_by_key(|l| l.z_index);
        resolved
    }
}
