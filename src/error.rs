//! Error taxonomy for mutating operations and backend calls.
//!
//! Missing configuration is never an error (loads return `None`), and
//! validation problems are advisories (see [`crate::validation`]). What is
//! left here are usage errors and backend failures, none of them fatal.

use thiserror::Error;

use crate::model::SetId;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Set not found: {0}")]
    SetNotFound(SetId),

    #[error("Cannot delete {0}: at least one set must exist")]
    LastSet(SetId),

    #[error("Layer not found: {0}")]
    LayerNotFound(String),

    #[error("Trait not found: {layer}/{trait_name}")]
    TraitNotFound { layer: String, trait_name: String },

    #[error("Layer already exists: {0}")]
    DuplicateLayer(String),

    #[error("Trait already exists: {layer}/{trait_name}")]
    DuplicateTrait { layer: String, trait_name: String },

    #[error("Invalid rarity {value} for {layer}/{trait_name}")]
    InvalidRarity {
        layer: String,
        trait_name: String,
        value: f64,
    },

    #[error("Layer order for {0} is not a permutation of the project layers")]
    InvalidLayerOrder(SetId),

    #[error("Project format {found} is not supported, requires >= {required}")]
    IncompatibleFormat { found: String, required: String },

    #[error("Backend call failed: {0}")]
    Backend(#[from] BackendError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
