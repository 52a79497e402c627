//! Constraint Index & Combination Resolver
//!
//! Two rule books share one shape, `SetId -> Layer -> Trait -> OtherLayer ->
//! {OtherTrait}`:
//!
//! - incompatibilities: the two traits never co-occur. Stored once, checked
//!   from both sides.
//! - forced combinations: a selected trait restricts which traits another
//!   layer may hold. Evaluated in layer order, looking backwards only.
//!
//! Missing data is permissive. [`RuleScope::Absent`] and
//! [`AllowList::Unconstrained`] name that case explicitly.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::model::{Selection, SetId};
use crate::rarity::RarityConfigStore;

/// OtherLayer -> OtherTrait set.
pub type TargetRules = BTreeMap<String, BTreeSet<String>>;
/// Layer -> Trait -> targets, for one Set.
pub type SetRules = BTreeMap<String, BTreeMap<String, TargetRules>>;
/// Wire shape exchanged with the backend.
pub type RuleTable = BTreeMap<SetId, SetRules>;

/// Rule data for one Set, or the fact that there is none.
#[derive(Debug, Clone, Copy)]
pub enum RuleScope<'a> {
    Absent,
    Present(&'a SetRules),
}

impl<'a> RuleScope<'a> {
    pub fn targets(&self, layer: &str, trait_name: &str) -> Option<&'a TargetRules> {
        match *self {
            RuleScope::Absent => None,
            RuleScope::Present(rules) => rules.get(layer)?.get(trait_name),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, RuleScope::Absent)
    }
}

/// Which traits a rule admits on a target layer.
#[derive(Debug, Clone, Copy)]
pub enum AllowList<'a> {
    Unconstrained,
    Only(&'a BTreeSet<String>),
}

impl<'a> AllowList<'a> {
    /// Empty lists read as unconstrained, never as "nothing allowed".
    pub fn from_set(set: Option<&'a BTreeSet<String>>) -> Self {
        match set {
            Some(s) if !s.is_empty() => AllowList::Only(s),
            _ => AllowList::Unconstrained,
        }
    }

    pub fn permits(&self, trait_name: &str) -> bool {
        match self {
            AllowList::Unconstrained => true,
            AllowList::Only(allowed) => allowed.contains(trait_name),
        }
    }
}

/// A rule reference to a layer or trait the project does not define.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DanglingReference {
    pub set: SetId,
    pub layer: String,
    pub trait_name: String,
    pub referenced_by: Option<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleBook {
    table: RuleTable,
}

impl RuleBook {
    pub fn from_table(table: RuleTable) -> Self {
        let mut book = Self { table };
        book.prune();
        book
    }

    pub fn table(&self) -> &RuleTable {
        &self.table
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn scope(&self, set: &SetId) -> RuleScope<'_> {
        match self.table.get(set) {
            Some(rules) if !rules.is_empty() => RuleScope::Present(rules),
            _ => RuleScope::Absent,
        }
    }

    pub fn allow_list(&self, set: &SetId, layer: &str, trait_name: &str, target_layer: &str) -> AllowList<'_> {
        AllowList::from_set(
            self.scope(set)
                .targets(layer, trait_name)
                .and_then(|targets| targets.get(target_layer)),
        )
    }

    pub fn insert(&mut self, set: &SetId, layer: &str, trait_name: &str, target_layer: &str, target_trait: &str) {
        self.targets_mut(set, layer, trait_name)
            .entry(target_layer.to_string())
            .or_default()
            .insert(target_trait.to_string());
    }

    /// Replace the targets for one layer; an empty set removes the entry.
    pub fn set_targets(
        &mut self,
        set: &SetId,
        layer: &str,
        trait_name: &str,
        target_layer: &str,
        targets: BTreeSet<String>,
    ) {
        if targets.is_empty() {
            if let Some(t) = self.targets_mut_existing(set, layer, trait_name) {
                t.remove(target_layer);
            }
            self.prune();
        } else {
            self.targets_mut(set, layer, trait_name)
                .insert(target_layer.to_string(), targets);
        }
    }

    pub fn remove(&mut self, set: &SetId, layer: &str, trait_name: &str, target_layer: &str, target_trait: &str) -> bool {
        let removed = self
            .targets_mut_existing(set, layer, trait_name)
            .and_then(|t| t.get_mut(target_layer))
            .map_or(false, |traits| traits.remove(target_trait));
        if removed {
            self.prune();
        }
        removed
    }

    pub fn purge_set(&mut self, set: &SetId) -> bool {
        self.table.remove(set).is_some()
    }

    pub fn retain_sets(&mut self, mut keep: impl FnMut(&SetId) -> bool) {
        self.table.retain(|set, _| keep(set));
    }

    /// Drop every source or target `(layer, trait)` for which `keep` is false.
    /// Returns the number of `(source, target)` references removed.
    pub fn retain_references(&mut self, mut keep: impl FnMut(&SetId, &str, &str) -> bool) -> usize {
        let mut removed = 0;
        for (set, rules) in self.table.iter_mut() {
            for (layer, traits) in rules.iter_mut() {
                for (trait_name, targets) in traits.iter_mut() {
                    let source_kept = keep(set, layer, trait_name);
                    for (target_layer, target_traits) in targets.iter_mut() {
                        let before = target_traits.len();
                        if source_kept {
                            target_traits.retain(|t| keep(set, target_layer, t));
                        } else {
                            target_traits.clear();
                        }
                        removed += before - target_traits.len();
                    }
                }
            }
        }
        self.prune();
        removed
    }

    pub fn rule_count(&self, set: &SetId) -> usize {
        self.table.get(set).map_or(0, |rules| {
            rules
                .values()
                .flat_map(|traits| traits.values())
                .flat_map(|targets| targets.values())
                .map(BTreeSet::len)
                .sum()
        })
    }

    fn targets_mut(&mut self, set: &SetId, layer: &str, trait_name: &str) -> &mut TargetRules {
        self.table
            .entry(set.clone())
            .or_default()
            .entry(layer.to_string())
            .or_default()
            .entry(trait_name.to_string())
            .or_default()
    }

    fn targets_mut_existing(&mut self, set: &SetId, layer: &str, trait_name: &str) -> Option<&mut TargetRules> {
        self.table.get_mut(set)?.get_mut(layer)?.get_mut(trait_name)
    }

    fn prune(&mut self) {
        for rules in self.table.values_mut() {
            for traits in rules.values_mut() {
                for targets in traits.values_mut() {
                    targets.retain(|_, t| !t.is_empty());
                }
                traits.retain(|_, targets| !targets.is_empty());
            }
            rules.retain(|_, traits| !traits.is_empty());
        }
        self.table.retain(|_, rules| !rules.is_empty());
    }
}

/// Both rule books of a project.
#[derive(Debug, Clone, Default)]
pub struct ConstraintIndex {
    pub incompatibilities: RuleBook,
    pub forced: RuleBook,
}

impl ConstraintIndex {
    pub fn new(incompatibilities: RuleTable, forced: RuleTable) -> Self {
        Self {
            incompatibilities: RuleBook::from_table(incompatibilities),
            forced: RuleBook::from_table(forced),
        }
    }

    pub fn resolver(&self) -> CombinationResolver<'_> {
        CombinationResolver { index: self }
    }

    pub fn add_incompatibility(&mut self, set: &SetId, (layer, trait_name): (&str, &str), (other_layer, other_trait): (&str, &str)) {
        self.incompatibilities.insert(set, layer, trait_name, other_layer, other_trait);
    }

    /// Removes the pair whichever side it was stored under.
    pub fn remove_incompatibility(&mut self, set: &SetId, (layer, trait_name): (&str, &str), (other_layer, other_trait): (&str, &str)) -> bool {
        let forward = self.incompatibilities.remove(set, layer, trait_name, other_layer, other_trait);
        let backward = self.incompatibilities.remove(set, other_layer, other_trait, layer, trait_name);
        forward || backward
    }

    /// All traits incompatible with `(layer, trait)`, from either side.
    pub fn incompatibilities_for(&self, set: &SetId, layer: &str, trait_name: &str) -> BTreeSet<(String, String)> {
        let mut found = BTreeSet::new();
        let scope = self.incompatibilities.scope(set);
        if let Some(targets) = scope.targets(layer, trait_name) {
            for (other_layer, traits) in targets {
                for other in traits {
                    found.insert((other_layer.clone(), other.clone()));
                }
            }
        }
        if let RuleScope::Present(rules) = scope {
            for (source_layer, traits) in rules {
                for (source_trait, targets) in traits {
                    if targets.get(layer).map_or(false, |t| t.contains(trait_name)) {
                        found.insert((source_layer.clone(), source_trait.clone()));
                    }
                }
            }
        }
        found
    }

    pub fn set_forced_combination(
        &mut self,
        set: &SetId,
        (layer, trait_name): (&str, &str),
        target_layer: &str,
        allowed: BTreeSet<String>,
    ) {
        self.forced.set_targets(set, layer, trait_name, target_layer, allowed);
    }

    pub fn remove_forced_combination(&mut self, set: &SetId, (layer, trait_name): (&str, &str), target_layer: &str) {
        self.forced.set_targets(set, layer, trait_name, target_layer, BTreeSet::new());
    }

    pub fn purge_set(&mut self, set: &SetId) {
        let a = self.incompatibilities.purge_set(set);
        let b = self.forced.purge_set(set);
        if a || b {
            info!(set = %set, "purged rules of deleted set");
        }
    }

    /// Remove references to traits that are disabled in their Set or no
    /// longer exist.
    pub fn cleanup(&mut self, rarity: &RarityConfigStore) -> usize {
        let keep = |set: &SetId, layer: &str, trait_name: &str| rarity.is_enabled(layer, trait_name, set);
        let removed = self.incompatibilities.retain_references(keep) + self.forced.retain_references(keep);
        if removed > 0 {
            info!(removed, "cleaned up rules referencing disabled or removed traits");
        }
        removed
    }

    /// References to layers or traits that the project does not define.
    /// Disabled traits are not reported.
    pub fn dangling_references(&self, rarity: &RarityConfigStore) -> Vec<DanglingReference> {
        let mut dangling = vec![];
        for book in [&self.incompatibilities, &self.forced] {
            for (set, rules) in book.table() {
                for (layer, traits) in rules {
                    for (trait_name, targets) in traits {
                        if !rarity.has_trait(layer, trait_name) {
                            dangling.push(DanglingReference {
                                set: set.clone(),
                                layer: layer.clone(),
                                trait_name: trait_name.clone(),
                                referenced_by: None,
                            });
                        }
                        for (target_layer, target_traits) in targets {
                            for target in target_traits {
                                if !rarity.has_trait(target_layer, target) {
                                    dangling.push(DanglingReference {
                                        set: set.clone(),
                                        layer: target_layer.clone(),
                                        trait_name: target.clone(),
                                        referenced_by: Some((layer.clone(), trait_name.clone())),
                                    });
                                }
                            }
                        }
                    }
                }
            }
        }
        dangling
    }
}

/// Stateless legality checks over a borrowed [`ConstraintIndex`].
///
/// The resolver only answers accept/reject for one candidate. It never
/// searches or backtracks; a sampling loop that gets `false` picks again.
#[derive(Debug, Clone, Copy)]
pub struct CombinationResolver<'a> {
    index: &'a ConstraintIndex,
}

impl<'a> CombinationResolver<'a> {
    pub fn new(index: &'a ConstraintIndex) -> Self {
        Self { index }
    }

    /// True unless the candidate and some selected trait are incompatible,
    /// looking at the rules of both.
    pub fn check_trait_compatibility(&self, layer: &str, trait_name: &str, selected: &Selection, set: &SetId) -> bool {
        let scope = self.index.incompatibilities.scope(set);
        if scope.is_absent() {
            return true;
        }

        let own = scope.targets(layer, trait_name);
        for (other_layer, other_trait) in selected {
            if other_layer == layer {
                continue;
            }
            let forward = own
                .and_then(|targets| targets.get(other_layer))
                .map_or(false, |traits| traits.contains(other_trait));
            let backward = scope
                .targets(other_layer, other_trait)
                .and_then(|targets| targets.get(layer))
                .map_or(false, |traits| traits.contains(trait_name));
            if forward || backward {
                debug!(
                    layer,
                    trait_name,
                    other_layer = other_layer.as_str(),
                    other_trait = other_trait.as_str(),
                    "rejected by incompatibility"
                );
                return false;
            }
        }
        true
    }

    /// Forced-combination gate, consulting only layers ordered before
    /// `layer`. Later layers are checked when their own turn comes.
    pub fn check_forced_combination(
        &self,
        layer: &str,
        trait_name: &str,
        selected: &Selection,
        ordered_layers: &[String],
        set: &SetId,
    ) -> bool {
        let book = &self.index.forced;
        let scope = book.scope(set);
        if scope.is_absent() {
            return true;
        }
        let Some(idx) = ordered_layers.iter().position(|l| l == layer) else {
            debug!(layer, "layer not in order, forced combinations skipped");
            return true;
        };

        for earlier in &ordered_layers[..idx] {
            let Some(chosen) = selected.get(earlier) else {
                continue;
            };
            if !book.allow_list(set, earlier, chosen, layer).permits(trait_name) {
                debug!(
                    layer,
                    trait_name,
                    forced_by = earlier.as_str(),
                    forced_trait = chosen.as_str(),
                    "rejected by forced combination"
                );
                return false;
            }
        }

        if let Some(targets) = scope.targets(layer, trait_name) {
            for (target_layer, allowed) in targets {
                let before = ordered_layers
                    .iter()
                    .position(|l| l == target_layer)
                    .map_or(false, |i| i < idx);
                if !before {
                    continue;
                }
                if let Some(chosen) = selected.get(target_layer) {
                    if !AllowList::from_set(Some(allowed)).permits(chosen) {
                        debug!(
                            layer,
                            trait_name,
                            target_layer = target_layer.as_str(),
                            chosen = chosen.as_str(),
                            "rejected: earlier selection outside own allow-list"
                        );
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Both gates together.
    pub fn is_legal(
        &self,
        layer: &str,
        trait_name: &str,
        selected: &Selection,
        ordered_layers: &[String],
        set: &SetId,
    ) -> bool {
        self.check_trait_compatibility(layer, trait_name, selected, set)
            && self.check_forced_combination(layer, trait_name, selected, ordered_layers, set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LayerDef;

    fn set1() -> SetId {
        SetId::from_number(1)
    }

    fn selection(pairs: &[(&str, &str)]) -> Selection {
        pairs.iter().map(|(l, t)| (l.to_string(), t.to_string())).collect()
    }

    fn order() -> Vec<String> {
        vec!["A".into(), "B".into(), "C".into()]
    }

    #[test]
    fn test_no_rules_is_permissive() {
        let index = ConstraintIndex::default();
        let resolver = index.resolver();
        assert!(resolver.check_trait_compatibility("A", "a1", &Selection::new(), &set1()));
        assert!(resolver.check_trait_compatibility("A", "a1", &selection(&[("B", "b1")]), &set1()));
        assert!(resolver.check_forced_combination("B", "b9", &selection(&[("A", "a1")]), &order(), &set1()));
    }

    #[test]
    fn test_incompatibility_is_symmetric() {
        let mut index = ConstraintIndex::default();
        index.add_incompatibility(&set1(), ("A", "a1"), ("B", "b1"));
        let resolver = index.resolver();
        assert!(!resolver.check_trait_compatibility("B", "b1", &selection(&[("A", "a1")]), &set1()));
        assert!(!resolver.check_trait_compatibility("A", "a1", &selection(&[("B", "b1")]), &set1()));
        assert!(resolver.check_trait_compatibility("B", "b2", &selection(&[("A", "a1")]), &set1()));
    }

    #[test]
    fn test_rules_are_scoped_per_set() {
        let mut index = ConstraintIndex::default();
        index.add_incompatibility(&set1(), ("A", "a1"), ("B", "b1"));
        let other = SetId::from_number(2);
        assert!(index
            .resolver()
            .check_trait_compatibility("B", "b1", &selection(&[("A", "a1")]), &other));
    }

    #[test]
    fn test_forced_combination_from_earlier_layer() {
        let mut index = ConstraintIndex::default();
        index.set_forced_combination(&set1(), ("A", "a1"), "B", ["b1".to_string(), "b2".to_string()].into());
        let resolver = index.resolver();
        let chosen = selection(&[("A", "a1")]);
        assert!(!resolver.check_forced_combination("B", "b3", &chosen, &order(), &set1()));
        assert!(resolver.check_forced_combination("B", "b1", &chosen, &order(), &set1()));
        assert!(resolver.check_forced_combination("B", "b2", &chosen, &order(), &set1()));
        assert!(resolver.check_forced_combination("C", "c1", &selection(&[("A", "a1"), ("B", "b1")]), &order(), &set1()));
        // a different A trait leaves B free
        assert!(resolver.check_forced_combination("B", "b3", &selection(&[("A", "a2")]), &order(), &set1()));
    }

    #[test]
    fn test_forced_combination_own_rules_look_backwards_only() {
        let mut index = ConstraintIndex::default();
        // C/c1 only goes with A/a1, and wants B to be b2.
        index.set_forced_combination(&set1(), ("C", "c1"), "A", ["a1".to_string()].into());
        index.set_forced_combination(&set1(), ("C", "c1"), "B", ["b2".to_string()].into());
        let resolver = index.resolver();
        assert!(!resolver.check_forced_combination("C", "c1", &selection(&[("A", "a2")]), &order(), &set1()));
        assert!(resolver.check_forced_combination("C", "c1", &selection(&[("A", "a1"), ("B", "b2")]), &order(), &set1()));
        assert!(!resolver.check_forced_combination("C", "c1", &selection(&[("A", "a1"), ("B", "b1")]), &order(), &set1()));

        // With C ordered first its own targets lie later and are ignored.
        let c_first: Vec<String> = vec!["C".into(), "A".into(), "B".into()];
        assert!(resolver.check_forced_combination("C", "c1", &selection(&[("A", "a2")]), &c_first, &set1()));
    }

    #[test]
    fn test_empty_allow_list_is_unconstrained() {
        let mut rules = SetRules::new();
        rules
            .entry("A".into())
            .or_default()
            .entry("a1".into())
            .or_default()
            .insert("B".into(), BTreeSet::new());
        let mut table = RuleTable::new();
        table.insert(set1(), rules.clone());
        // from_table prunes, so build the book by hand to keep the empty list.
        let index = ConstraintIndex {
            incompatibilities: RuleBook::default(),
            forced: RuleBook { table },
        };
        assert!(index
            .resolver()
            .check_forced_combination("B", "anything", &selection(&[("A", "a1")]), &order(), &set1()));
        assert!(ConstraintIndex::new(RuleTable::new(), [(set1(), rules)].into()).forced.is_empty());
    }

    #[test]
    fn test_remove_incompatibility_either_side() {
        let mut index = ConstraintIndex::default();
        index.add_incompatibility(&set1(), ("A", "a1"), ("B", "b1"));
        assert_eq!(index.incompatibilities_for(&set1(), "B", "b1").len(), 1);
        assert!(index.remove_incompatibility(&set1(), ("B", "b1"), ("A", "a1")));
        assert!(index.incompatibilities.is_empty());
    }

    #[test]
    fn test_cleanup_drops_disabled_traits() {
        let mut rarity = RarityConfigStore::new();
        rarity.add_layer(LayerDef::new("A", ["a1", "a2"]), &[set1()]).unwrap();
        rarity.add_layer(LayerDef::new("B", ["b1", "b2"]), &[set1()]).unwrap();

        let mut index = ConstraintIndex::default();
        index.add_incompatibility(&set1(), ("A", "a1"), ("B", "b1"));
        index.add_incompatibility(&set1(), ("A", "a2"), ("B", "b2"));
        index.set_forced_combination(&set1(), ("A", "a2"), "B", ["b1".to_string(), "b2".to_string()].into());

        rarity.set_trait_enabled("B", "b1", &set1(), false).unwrap();
        assert_eq!(index.cleanup(&rarity), 2);
        assert_eq!(index.incompatibilities.rule_count(&set1()), 1);
        assert_eq!(index.forced.rule_count(&set1()), 1);
        assert!(index.dangling_references(&rarity).is_empty());
    }

    #[test]
    fn test_dangling_reference_reported() {
        let mut rarity = RarityConfigStore::new();
        rarity.add_layer(LayerDef::new("A", ["a1"]), &[set1()]).unwrap();
        let mut index = ConstraintIndex::default();
        index.add_incompatibility(&set1(), ("A", "a1"), ("Ghost", "g1"));
        let dangling = index.dangling_references(&rarity);
        assert_eq!(dangling.len(), 1);
        assert_eq!(dangling[0].layer, "Ghost");
        assert_eq!(dangling[0].referenced_by, Some(("A".to_string(), "a1".to_string())));
    }
}
