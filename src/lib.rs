//! TraitForge Core - trait configuration for layered generative collections
//!
//! Decides, per Set, which trait may occupy each layer:
//! 1. Rarity weights and enablement live in the rarity store
//! 2. Sets are added, duplicated and removed through the registry
//! 3. Incompatibility and forced-combination rules gate every candidate
//! 4. Compositing order is derived from z-index overrides
//!
//! Missing rule data is permissive and backend failures fall back to the
//! last good state. Sampling and rendering belong to the caller.

pub mod backend;
pub mod compositing;
pub mod config;
pub mod constraints;
pub mod error;
pub mod global;
pub mod hashing;
pub mod model;
pub mod project;
pub mod rarity;
pub mod sets;
pub mod validation;

pub use backend::{JsonDirBackend, MemoryBackend, ProjectBackend};
pub use compositing::{CompositedLayer, LayerCompositingOrderResolver};
pub use config::EngineConfig;
pub use constraints::{AllowList, CombinationResolver, ConstraintIndex, RuleBook, RuleScope, RuleTable};
pub use error::{BackendError, CoreError, Result};
pub use global::GlobalRarityAggregator;
pub use hashing::{canonical_json, config_fingerprint};
pub use model::{Blend, LayerDef, Selection, SetId, SetInfo, TraitSetConfig};
pub use project::{ConfigManifest, Project};
pub use rarity::RarityConfigStore;
pub use sets::{SetRegistry, SetState};
pub use validation::{ValidationResult, ValidationViolation, ViolationSeverity};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
/// Version written into saved project state.
pub const FORMAT_VERSION: &str = "1.0.0";
pub const MIN_FORMAT_VERSION: &str = "1.0.0";
