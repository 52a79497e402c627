//! Set Registry - lifecycle of Sets on top of the rarity store
//!
//! A Set moves `Uninitialized -> Configured -> Removed`. Ids come from a
//! monotonic counter and are never handed out twice while the registry is
//! alive, so a removed id stays removed.

use chrono::Utc;
use std::collections::BTreeSet;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::constraints::ConstraintIndex;
use crate::error::{CoreError, Result};
use crate::model::{SetId, SetInfo, SetOrder};
use crate::rarity::RarityConfigStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetState {
    Uninitialized,
    Configured,
    Removed,
}

#[derive(Debug, Clone)]
pub struct SetRegistry {
    sets: Vec<SetInfo>,
    set_orders: Vec<SetOrder>,
    active_set: SetId,
    next_number: u32,
    max_name_len: usize,
    default_nft_count: u32,
}

impl SetRegistry {
    /// Fresh registry holding a single `set1`.
    pub fn new(rarity: &mut RarityConfigStore, config: &EngineConfig) -> Self {
        let first = SetId::from_number(1);
        let mut registry = Self {
            sets: vec![],
            set_orders: vec![],
            active_set: first,
            next_number: 1,
            max_name_len: config.max_set_name_len,
            default_nft_count: config.default_nft_count,
        };
        registry.add_set(rarity);
        registry
    }

    /// Rebuild from persisted data, repairing `set_orders` so it holds
    /// exactly one entry per Set. An empty Set list yields a fresh `set1`.
    pub fn from_parts(
        sets: Vec<SetInfo>,
        set_orders: Vec<SetOrder>,
        active_set: Option<SetId>,
        rarity: &mut RarityConfigStore,
        config: &EngineConfig,
    ) -> Self {
        if sets.is_empty() {
            return Self::new(rarity, config);
        }
        let next_number = sets.iter().filter_map(|s| s.id.number()).max().unwrap_or(0) + 1;

        let known: BTreeSet<SetId> = sets.iter().map(|s| s.id.clone()).collect();
        let mut seen = BTreeSet::new();
        let mut orders: Vec<SetOrder> = set_orders
            .into_iter()
            .filter(|o| known.contains(&o.set_id) && seen.insert(o.set_id.clone()))
            .collect();
        orders.sort_by_key(|o| o.order);
        for info in &sets {
            if !seen.contains(&info.id) {
                warn!(set = %info.id, "set had no order entry, appending");
                orders.push(SetOrder { set_id: info.id.clone(), order: usize::MAX });
            }
        }

        let active = active_set
            .filter(|id| known.contains(id))
            .unwrap_or_else(|| orders[0].set_id.clone());

        let mut registry = Self {
            sets,
            set_orders: orders,
            active_set: active,
            next_number,
            max_name_len: config.max_set_name_len,
            default_nft_count: config.default_nft_count,
        };
        registry.compact_orders();
        registry
    }

    /// Rebuild the Set list from the ids other persisted data still
    /// mentions, for when no Set list could be read. Stored rarity entries
    /// are kept and only missing ones are filled in.
    pub fn recover(
        ids: impl IntoIterator<Item = SetId>,
        rarity: &mut RarityConfigStore,
        config: &EngineConfig,
    ) -> Self {
        let mut ids: Vec<SetId> = ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        ids.sort_by_key(|id| (id.number().unwrap_or(u32::MAX), id.clone()));
        if !ids.is_empty() {
            warn!(sets = ids.len(), "no set list available, recovering sets from stored data");
        }

        let now = Utc::now();
        let sets: Vec<SetInfo> = ids
            .iter()
            .map(|id| SetInfo {
                id: id.clone(),
                name: id.number().map_or_else(|| id.to_string(), |n| format!("Set {}", n)),
                custom_name: None,
                created_at: now,
                nft_count: config.default_nft_count,
                layer_order: rarity.layer_names(),
            })
            .collect();
        let orders: Vec<SetOrder> = ids
            .iter()
            .enumerate()
            .map(|(order, id)| SetOrder { set_id: id.clone(), order })
            .collect();
        for id in &ids {
            rarity.init_set(id);
        }
        Self::from_parts(sets, orders, None, rarity, config)
    }

    pub fn sets(&self) -> &[SetInfo] {
        &self.sets
    }

    pub fn set_orders(&self) -> &[SetOrder] {
        &self.set_orders
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn get(&self, id: &SetId) -> Option<&SetInfo> {
        self.sets.iter().find(|s| &s.id == id)
    }

    pub fn contains(&self, id: &SetId) -> bool {
        self.get(id).is_some()
    }

    pub fn active_set(&self) -> &SetId {
        &self.active_set
    }

    pub fn active_info(&self) -> Option<&SetInfo> {
        self.get(&self.active_set)
    }

    pub fn state_of(&self, id: &SetId) -> SetState {
        if self.contains(id) {
            SetState::Configured
        } else if id.number().map_or(false, |n| n < self.next_number) {
            SetState::Removed
        } else {
            SetState::Uninitialized
        }
    }

    /// Sets sorted by their order index.
    pub fn ordered_sets(&self) -> Vec<&SetInfo> {
        let mut orders: Vec<&SetOrder> = self.set_orders.iter().collect();
        orders.sort_by_key(|o| o.order);
        orders.into_iter().filter_map(|o| self.get(&o.set_id)).collect()
    }

    pub fn add_set(&mut self, rarity: &mut RarityConfigStore) -> SetId {
        let number = self.next_number;
        self.next_number += 1;
        let id = SetId::from_number(number);

        self.sets.push(SetInfo {
            id: id.clone(),
            name: format!("Set {}", number),
            custom_name: None,
            created_at: Utc::now(),
            nft_count: self.default_nft_count,
            layer_order: rarity.layer_names(),
        });
        self.set_orders.push(SetOrder { set_id: id.clone(), order: self.set_orders.len() });
        rarity.init_set(&id);

        info!(set = %id, "added set");
        id
    }

    /// Copy rarity, enablement and z-order of a Set into a new one.
    /// Incompatibility and forced-combination rules are not copied.
    pub fn duplicate_set(&mut self, number: u32, rarity: &mut RarityConfigStore) -> Result<SetId> {
        let source_id = SetId::from_number(number);
        let source = self.require(&source_id)?.clone();

        let new_number = self.next_number;
        self.next_number += 1;
        let id = SetId::from_number(new_number);

        self.sets.push(SetInfo {
            id: id.clone(),
            name: truncate_name(&format!("{} Copy", source.display_name()), self.max_name_len),
            custom_name: None,
            created_at: Utc::now(),
            nft_count: source.nft_count,
            layer_order: source.layer_order.clone(),
        });
        self.set_orders.push(SetOrder { set_id: id.clone(), order: self.set_orders.len() });
        rarity.copy_set(&source_id, &id);

        info!(source = %source_id, set = %id, "duplicated set");
        Ok(id)
    }

    pub fn delete_set(
        &mut self,
        number: u32,
        rarity: &mut RarityConfigStore,
        rules: &mut ConstraintIndex,
    ) -> Result<()> {
        let id = SetId::from_number(number);
        self.require(&id)?;
        if self.sets.len() <= 1 {
            warn!(set = %id, "refusing to delete the last set");
            return Err(CoreError::LastSet(id));
        }

        self.sets.retain(|s| s.id != id);
        self.set_orders.retain(|o| o.set_id != id);
        self.compact_orders();
        rarity.remove_set(&id);
        rules.purge_set(&id);

        if self.active_set == id {
            self.active_set = self.set_orders[0].set_id.clone();
        }
        info!(set = %id, "deleted set");
        Ok(())
    }

    pub fn set_active_set(&mut self, number: u32) -> Result<()> {
        self.activate(&SetId::from_number(number))
    }

    pub fn activate(&mut self, id: &SetId) -> Result<()> {
        self.require(id)?;
        self.active_set = id.clone();
        Ok(())
    }

    pub fn rename_set(&mut self, number: u32, name: &str) -> Result<()> {
        self.require_mut(&SetId::from_number(number))?.name = name.to_string();
        Ok(())
    }

    /// An empty name clears the custom name.
    pub fn set_custom_set_name(&mut self, number: u32, name: &str) -> Result<()> {
        let info = self.require_mut(&SetId::from_number(number))?;
        info.custom_name = if name.is_empty() { None } else { Some(name.to_string()) };
        Ok(())
    }

    /// Swap the order indices of two Sets.
    pub fn reorder_sets(&mut self, active_id: &SetId, over_id: &SetId) -> Result<()> {
        let a = self.order_position(active_id)?;
        let b = self.order_position(over_id)?;
        let tmp = self.set_orders[a].order;
        self.set_orders[a].order = self.set_orders[b].order;
        self.set_orders[b].order = tmp;
        Ok(())
    }

    pub fn set_nft_count(&mut self, number: u32, count: u32) -> Result<()> {
        self.require_mut(&SetId::from_number(number))?.nft_count = count;
        Ok(())
    }

    /// Replace a Set's own layer z-order. Must name every project layer once.
    pub fn set_layer_order(&mut self, id: &SetId, order: Vec<String>, rarity: &RarityConfigStore) -> Result<()> {
        let mut expected = rarity.layer_names();
        let mut given = order.clone();
        expected.sort();
        given.sort();
        if expected != given {
            return Err(CoreError::InvalidLayerOrder(id.clone()));
        }
        self.require_mut(id)?.layer_order = order;
        Ok(())
    }

    /// Keep every Set's layer order in step with a newly added layer.
    pub fn append_layer(&mut self, layer: &str) {
        for info in &mut self.sets {
            if !info.layer_order.iter().any(|l| l == layer) {
                info.layer_order.push(layer.to_string());
            }
        }
    }

    fn require(&self, id: &SetId) -> Result<&SetInfo> {
        self.get(id).ok_or_else(|| CoreError::SetNotFound(id.clone()))
    }

    fn require_mut(&mut self, id: &SetId) -> Result<&mut SetInfo> {
        self.sets
            .iter_mut()
            .find(|s| &s.id == id)
            .ok_or_else(|| CoreError::SetNotFound(id.clone()))
    }

    fn order_position(&self, id: &SetId) -> Result<usize> {
        self.set_orders
            .iter()
            .position(|o| &o.set_id == id)
            .ok_or_else(|| CoreError::SetNotFound(id.clone()))
    }

    fn compact_orders(&mut self) {
        self.set_orders.sort_by_key(|o| o.order);
        for (i, entry) in self.set_orders.iter_mut().enumerate() {
            entry.order = i;
        }
    }
}

fn truncate_name(name: &str, max_len: usize) -> String {
    name.chars().take(max_len).collect()
}
