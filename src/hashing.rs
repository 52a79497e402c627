//! Hashing - SHA-256 fingerprints of configuration state
//!
//! A fingerprint identifies a rarity config + set list independent of map
//! ordering, so unchanged state can skip backend recomputation.

use serde::Serialize;
use serde_json::{to_string, Value};
use sha2::{Digest, Sha256};

use crate::model::GlobalRarityRequest;

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Canonical JSON: object keys sorted at every depth, no whitespace.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v: Value = serde_json::to_value(value)?;
    to_string(&sort_value(&v))
}

fn sort_value(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                sorted
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sort_value(v)))
                    .collect(),
            )
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_value).collect()),
        _ => v.clone(),
    }
}

pub fn fingerprint<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(sha256_hex(canonical_json(value)?.as_bytes()))
}

/// Fingerprint of what global rarity is computed from. Creation timestamps
/// do not influence rarity and are left out.
pub fn config_fingerprint(request: &GlobalRarityRequest) -> Result<String, serde_json::Error> {
    let sets: Vec<_> = request
        .sets
        .iter()
        .map(|s| (s.id.as_str(), s.nft_count))
        .collect();
    fingerprint(&(&request.rarity_config, sets))
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RarityConfig, SetId, SetInfo};
    use chrono::{Duration, Utc};
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorted() {
        let obj = json!({"z": 1, "a": 2, "m": {"y": 1, "b": 2}});
        assert_eq!(canonical_json(&obj).unwrap(), r#"{"a":2,"m":{"b":2,"y":1},"z":1}"#);
    }

    #[test]
    fn test_fingerprint_ignores_timestamps() {
        let info = SetInfo {
            id: SetId::from_number(1),
            name: "Set 1".to_string(),
            custom_name: None,
            created_at: Utc::now(),
            nft_count: 10,
            layer_order: vec![],
        };
        let mut later = info.clone();
        later.created_at = info.created_at + Duration::hours(1);

        let a = GlobalRarityRequest { rarity_config: RarityConfig::new(), sets: vec![info] };
        let b = GlobalRarityRequest { rarity_config: RarityConfig::new(), sets: vec![later.clone()] };
        assert_eq!(config_fingerprint(&a).unwrap(), config_fingerprint(&b).unwrap());

        later.nft_count = 11;
        let c = GlobalRarityRequest { rarity_config: RarityConfig::new(), sets: vec![later] };
        assert_ne!(config_fingerprint(&a).unwrap(), config_fingerprint(&c).unwrap());
    }
}
