//! Data Model - Layers, Traits, Sets and their per-Set rarity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Layer name -> selected trait name.
pub type Selection = BTreeMap<String, String>;

/// Identifier of a Set, always of the form `set<N>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SetId(String);

impl SetId {
    pub fn from_number(number: u32) -> Self {
        Self(format!("set{}", number))
    }

    /// Numeric suffix, `None` for ids that do not follow the `set<N>` form.
    pub fn number(&self) -> Option<u32> {
        self.0.strip_prefix("set")?.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SetId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Blend {
    #[serde(default = "default_opacity")]
    pub opacity: f64,
}

fn default_opacity() -> f64 { 1.0 }

impl Default for Blend {
    fn default() -> Self {
        Self { opacity: default_opacity() }
    }
}

/// Per-Set configuration of one trait.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraitSetConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub rarity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z_index: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blend: Option<Blend>,
}

fn default_true() -> bool { true }

impl TraitSetConfig {
    pub fn enabled_with(rarity: f64) -> Self {
        Self {
            enabled: true,
            rarity,
            z_index: None,
            blend: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraitEntry {
    #[serde(default)]
    pub sets: BTreeMap<SetId, TraitSetConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerRarity {
    #[serde(default)]
    pub traits: BTreeMap<String, TraitEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_blend: Option<Blend>,
}

/// Layer -> traits -> Set -> config, the shape exchanged with the backend.
pub type RarityConfig = BTreeMap<String, LayerRarity>;

/// A layer and its traits in canonical order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerDef {
    pub name: String,
    #[serde(default)]
    pub traits: Vec<String>,
}

impl LayerDef {
    pub fn new<I, S>(name: impl Into<String>, traits: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            traits: traits.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetInfo {
    pub id: SetId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub nft_count: u32,
    #[serde(default)]
    pub layer_order: Vec<String>,
}

impl SetInfo {
    pub fn display_name(&self) -> &str {
        self.custom_name.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetOrder {
    pub set_id: SetId,
    pub order: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalTraitRarity {
    pub trait_name: String,
    pub rarity: f64,
}

pub type GlobalRarityData = BTreeMap<String, Vec<GlobalTraitRarity>>;

/// Payload for asking the backend to recompute global rarity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalRarityRequest {
    pub rarity_config: RarityConfig,
    pub sets: Vec<SetInfo>,
}

/// Project layout persisted next to the rarity config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectState {
    pub format_version: String,
    #[serde(default)]
    pub layers: Vec<LayerDef>,
    #[serde(default)]
    pub sets: Vec<SetInfo>,
    #[serde(default)]
    pub set_orders: Vec<SetOrder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_set: Option<SetId>,
}
