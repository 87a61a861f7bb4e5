//! Layered configuration.
//!
//! YAML files merge in order (later overrides earlier, objects deep-merge,
//! arrays replace), the merged document is canonicalized (sorted keys,
//! compact JSON) and SHA-256 hashed for audit logging, then deserialized
//! into [`AppConfig`].

use anyhow::{Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;

mod settings;

pub use settings::{
    AppConfig, BrokerConfig, MarketConfig, MarketDataConfig, MarketDataMode, RiskDefaults,
    SchedulerConfig,
};

/// Load + merge YAML files in order, canonicalize, hash, and deserialize.
pub fn load_layered(paths: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());

    for p in paths {
        let s = fs::read_to_string(p).with_context(|| format!("read config: {p}"))?;
        let yaml_val: serde_yaml::Value =
            serde_yaml::from_str(&s).with_context(|| format!("parse yaml: {p}"))?;
        let json_val = serde_json::to_value(yaml_val).context("yaml->json conversion failed")?;
        deep_merge(&mut merged, json_val);
    }

    let canonical = canonicalize_json(&merged);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());

    let config: AppConfig =
        serde_json::from_value(merged).context("config does not match expected schema")?;

    Ok(LoadedConfig {
        config,
        canonical_json: canonical,
        config_hash: hash,
    })
}

/// Defaults-only configuration (no files). Used by tests and by `status`
/// invocations that never touch a broker.
pub fn defaults() -> AppConfig {
    serde_json::from_value(Value::Object(Default::default()))
        .expect("AppConfig defaults must deserialize from an empty object")
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AppConfig,
    pub canonical_json: String,
    pub config_hash: String,
}

/// Deep-merge: objects merge recursively; arrays replaced; scalars overwritten.
fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (k, v) in src_map {
                match dst_map.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        dst_map.insert(k, v);
                    }
                }
            }
        }
        (dst_slot, src_val) => {
            *dst_slot = src_val;
        }
    }
}

/// Canonicalize JSON by sorting all object keys recursively and emitting
/// compact JSON.
fn canonicalize_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("json serialization must not fail")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn later_file_overrides_earlier() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base.yaml");
        let over = dir.path().join("override.yaml");
        writeln!(
            fs::File::create(&base).unwrap(),
            "market_data:\n  mode: STUB\n  symbols: [\"005930\"]"
        )
        .unwrap();
        writeln!(fs::File::create(&over).unwrap(), "market_data:\n  mode: LIVE").unwrap();

        let loaded =
            load_layered(&[base.to_str().unwrap(), over.to_str().unwrap()]).expect("load");
        assert_eq!(loaded.config.market_data.mode, MarketDataMode::Live);
        // Deep merge keeps the symbol list from the base layer.
        assert_eq!(loaded.config.market_data.symbols, vec!["005930"]);
    }

    #[test]
    fn hash_is_stable_under_key_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.yaml");
        let b = dir.path().join("b.yaml");
        writeln!(
            fs::File::create(&a).unwrap(),
            "market:\n  check_enabled: true\nmarket_data:\n  mode: STUB"
        )
        .unwrap();
        writeln!(
            fs::File::create(&b).unwrap(),
            "market_data:\n  mode: STUB\nmarket:\n  check_enabled: true"
        )
        .unwrap();

        let ha = load_layered(&[a.to_str().unwrap()]).unwrap().config_hash;
        let hb = load_layered(&[b.to_str().unwrap()]).unwrap().config_hash;
        assert_eq!(ha, hb);
    }

    #[test]
    fn defaults_deserialize() {
        let cfg = defaults();
        assert_eq!(cfg.market_data.mode, MarketDataMode::Stub);
        assert!(cfg.market.check_enabled);
        assert!(!cfg.risk.allow_short);
        assert_eq!(cfg.broker.token_refresh_lead_ms, 300_000);
    }
}
