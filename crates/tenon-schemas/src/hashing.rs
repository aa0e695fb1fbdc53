use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Recursively sort object keys so the JSON rendering is order independent.
pub fn sort_keys(v: &Value) -> Value {
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

/// Compact JSON with recursively sorted keys. Every hash in the core is taken over this form.
pub fn canonical_json<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize for canonical json failed")?;
    serde_json::to_string(&sort_keys(&raw)).context("canonical json stringify failed")
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-256 hex of the canonical JSON of `v`.
pub fn hash_canonical<T: Serialize>(v: &T) -> Result<String> {
    Ok(sha256_hex(canonical_json(v)?.as_bytes()))
}

/// Deterministic id: UUIDv5 over `tenon.<scope>.v1|<parts joined by '|'>`.
///
/// Callers pass parts in a fixed order; list-valued parts must be sorted first.
pub fn derive_id(scope: &str, parts: &[&str]) -> Uuid {
    let name = format!("tenon.{scope}.v1|{}", parts.join("|"));
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_ignores_key_order() {
        let a = json!({"b": 1, "a": {"y": 2, "x": [3, {"k": 1, "j": 2}]}});
        let b = json!({"a": {"x": [3, {"j": 2, "k": 1}], "y": 2}, "b": 1});
        assert_eq!(canonical_json(&a).unwrap(), canonical_json(&b).unwrap());
        assert_eq!(
            canonical_json(&a).unwrap(),
            r#"{"a":{"x":[3,{"j":2,"k":1}],"y":2},"b":1}"#
        );
    }

    #[test]
    fn derive_id_is_stable_and_scoped() {
        let a = derive_id("link", &["x", "y"]);
        let b = derive_id("link", &["x", "y"]);
        let c = derive_id("state", &["x", "y"]);
        assert_eq!(a, b);
        assert_ne!(a, c, "scope must separate id spaces");
        assert_eq!(a.get_version_num(), 5);
    }

    #[test]
    fn sha256_hex_is_64_hex_chars() {
        let h = sha256_hex(b"tenon");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
