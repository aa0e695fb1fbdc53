use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::fs;

use tenon_schemas::{canonical_json, sha256_hex};

/// Leaf strings starting with one of these abort the load with CONFIG_SECRET_DETECTED.
/// Rule books carry identifiers and thresholds only.
const SECRET_PREFIXES: &[&str] = &[
    "sk-",
    "sk_live",
    "sk_test",
    "AKIA",
    "-----BEGIN",
    "ghp_",
    "glpat-",
    "xoxb-",
    "xoxp-",
];

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut docs: Vec<String> = Vec::new();
    for p in paths {
        let raw =
            fs::read_to_string(p).with_context(|| format!("failed to read yaml path: {p}"))?;
        docs.push(raw);
    }
    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_layered_yaml_from_strings(&doc_refs)
}

/// Merges YAML documents in order (later documents override earlier ones) and hashes
/// the canonical JSON of the result.
pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = serde_json::json!({});
    for raw in yaml_docs {
        let v_yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
        let v_json = serde_json::to_value(v_yaml).context("yaml->json conversion failed")?;
        merged = deep_merge(merged, v_json);
    }

    enforce_no_secret_literals(&merged, "")?;

    let canonical_json = canonical_json(&merged)?;
    let config_hash = sha256_hex(canonical_json.as_bytes());
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

/// Objects merge key by key; anything else (arrays included) is replaced wholesale.
fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        (_, b_other) => b_other,
    }
}

fn enforce_no_secret_literals(v: &Value, pointer: &str) -> Result<()> {
    match v {
        Value::Object(map) => {
            for (k, vv) in map {
                let next = format!("{pointer}/{}", k.replace('~', "~0").replace('/', "~1"));
                enforce_no_secret_literals(vv, &next)?;
            }
        }
        Value::Array(arr) => {
            for (i, vv) in arr.iter().enumerate() {
                enforce_no_secret_literals(vv, &format!("{pointer}/{i}"))?;
            }
        }
        Value::String(s) if looks_like_secret(s) => {
            bail!("CONFIG_SECRET_DETECTED leaf={} value=REDACTED", pointer);
        }
        _ => {}
    }
    Ok(())
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    if t.len() < 8 {
        return false;
    }
    SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_layers_override_and_arrays_replace() {
        let a = "x: {keep: 1, over: 1}\nlist: [1, 2, 3]\n";
        let b = "x: {over: 2}\nlist: [9]\n";
        let loaded = load_layered_yaml_from_strings(&[a, b]).unwrap();
        assert_eq!(loaded.canonical_json, r#"{"list":[9],"x":{"keep":1,"over":2}}"#);
    }

    #[test]
    fn secret_literals_abort_the_load() {
        let err = load_layered_yaml_from_strings(&["rules: [{token: sk_live_0123456789}]"])
            .unwrap_err()
            .to_string();
        assert!(err.contains("CONFIG_SECRET_DETECTED"), "{err}");
        assert!(err.contains("/rules/0/token"), "{err}");
        assert!(!err.contains("0123456789"), "value must be redacted");
    }
}
