//! Policy and fixture file loading.

use anyhow::{Context, Result, bail};
use serde_json::Value;
use std::path::Path;

use warden_provider::testing::StaticSession;

/// Load a YAML or JSON document into a JSON value.
///
/// YAML is a superset of JSON, so one parser covers both.
pub fn load_document(path: &Path) -> Result<Value> {
    let raw =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let value: Value =
        serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(value)
}

/// Build a provider session from an optional fixture document.
///
/// Top-level keys are operation names: an array programs a listing for
/// that operation, a mapping programs a `call` response. Without a
/// fixture every listing is empty.
pub fn session_from_fixture(
    region: &str,
    account_id: &str,
    fixture: Option<&Value>,
) -> Result<StaticSession> {
    let mut session = StaticSession::new(region, account_id);
    let Some(doc) = fixture else {
        return Ok(session);
    };
    let entries = doc
        .as_object()
        .context("fixture must be a mapping of operation name to items")?;
    for (op, value) in entries {
        session = match value {
            Value::Array(items) => session.with_items(op.clone(), items.clone()),
            Value::Object(_) => session.with_response(op.clone(), value.clone()),
            _ => bail!("fixture entry {op:?} must be an array or a mapping"),
        };
    }
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_load_yaml_document() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "policies:\n  - name: p\n    resource: vm").unwrap();
        let doc = load_document(file.path()).unwrap();
        assert_eq!(doc["policies"][0]["name"], "p");
    }

    #[test]
    fn test_load_json_document() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", json!({"policies": []})).unwrap();
        let doc = load_document(file.path()).unwrap();
        assert!(doc["policies"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_fixture_programs_listings_and_responses() {
        let fixture = json!({
            "DescribeInstances": [{"InstanceId": "i-1"}],
            "GetBucketTagging": {"Resources": []}
        });
        assert!(session_from_fixture("us-east-1", "0", Some(&fixture)).is_ok());
        assert!(session_from_fixture("us-east-1", "0", Some(&json!({"Op": 1}))).is_err());
    }
}
