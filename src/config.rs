//! Engine configuration - tunables with serde defaults

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Tolerance used when checking that enabled weights sum to 100.
    #[serde(default = "default_probability_epsilon")]
    pub probability_epsilon: f64,
    /// Default zIndex distance between consecutive canonical layers.
    #[serde(default = "default_z_index_step")]
    pub z_index_step: i32,
    #[serde(default = "default_max_set_name_len")]
    pub max_set_name_len: usize,
    /// Target NFT count given to newly created sets.
    #[serde(default)]
    pub default_nft_count: u32,
}

fn default_probability_epsilon() -> f64 { 0.01 }
fn default_z_index_step() -> i32 { 100 }
fn default_max_set_name_len() -> usize { 16 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            probability_epsilon: default_probability_epsilon(),
            z_index_step: default_z_index_step(),
            max_set_name_len: default_max_set_name_len(),
            default_nft_count: 0,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(crate::error::BackendError::from)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"zIndexStep": 10}"#).unwrap();
        assert_eq!(config.z_index_step, 10);
        assert_eq!(config.max_set_name_len, 16);
        assert!((config.probability_epsilon - 0.01).abs() < f64::EPSILON);
    }

    #[test]
    fn test_missing_file_is_default() {
        let config = EngineConfig::load(Path::new("/nonexistent/traitforge.json")).unwrap();
        assert_eq!(config.z_index_step, 100);
    }
}
