use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Identity of one cached enumeration.
///
/// The address is the sha256 of a canonical (recursively key-sorted) JSON
/// encoding, so two runs building the key from differently-ordered query
/// maps address the same entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheKey {
    pub resource_type: String,
    pub account_id: String,
    pub region: String,
    /// Shape of the enumeration query (source filters pushed into the
    /// provider call), not its results.
    pub query: Value,
}

impl CacheKey {
    pub fn new(
        resource_type: impl Into<String>,
        account_id: impl Into<String>,
        region: impl Into<String>,
        query: Value,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            account_id: account_id.into(),
            region: region.into(),
            query,
        }
    }

    /// Hex content address for this key.
    pub fn address(&self) -> String {
        let canonical = serde_json::json!({
            "resource_type": self.resource_type,
            "account_id": self.account_id,
            "region": self.region,
            "query": self.query,
        });
        let mut hasher = Sha256::new();
        hasher.update(canonical_json(&canonical).as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Serialize with object keys sorted recursively.
pub fn canonical_json(value: &Value) -> String {
    serde_json::to_string(&canonicalize(value)).unwrap_or_default()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::with_capacity(map.len());
            for key in keys {
                out.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_address_is_stable_hex() {
        let key = CacheKey::new("vm", "123456789012", "us-east-1", json!({}));
        let addr = key.address();
        assert_eq!(addr.len(), 64);
        assert!(addr.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(addr, key.address());
    }

    #[test]
    fn test_address_ignores_query_key_order() {
        let a = CacheKey::new(
            "vm",
            "123456789012",
            "us-east-1",
            json!({"Filters": [{"Name": "state", "Values": ["running"]}], "MaxResults": 100}),
        );
        let mut swapped = serde_json::Map::new();
        swapped.insert("MaxResults".to_string(), json!(100));
        swapped.insert(
            "Filters".to_string(),
            json!([{"Name": "state", "Values": ["running"]}]),
        );
        let b = CacheKey::new("vm", "123456789012", "us-east-1", Value::Object(swapped));
        assert_eq!(a.address(), b.address());
    }

    #[test]
    fn test_address_differs_by_component() {
        let base = CacheKey::new("vm", "123456789012", "us-east-1", json!({}));
        let other_region = CacheKey::new("vm", "123456789012", "eu-west-1", json!({}));
        let other_type = CacheKey::new("bucket", "123456789012", "us-east-1", json!({}));
        let other_query = CacheKey::new("vm", "123456789012", "us-east-1", json!({"a": 1}));
        assert_ne!(base.address(), other_region.address());
        assert_ne!(base.address(), other_type.address());
        assert_ne!(base.address(), other_query.address());
    }

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let v = json!({"b": {"d": 1, "c": 2}, "a": [{"z": 1, "y": 2}]});
        assert_eq!(
            canonical_json(&v),
            r#"{"a":[{"y":2,"z":1}],"b":{"c":2,"d":1}}"#
        );
    }
}
