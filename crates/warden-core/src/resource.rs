use crate::error::{CoreError, Result};
use crate::path::{PathExpr, Projected};
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// A provider-surfaced object: an opaque, semi-structured record.
///
/// Resources are nested mappings of string keys to scalar/list/mapping
/// values; the engine never imposes a schema on them beyond the key paths
/// declared by the owning [`ResourceTypeDef`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resource(pub Value);

impl Resource {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Project a key path, returning a scalar string when it resolves to one.
    fn project_string(&self, key: &str) -> Option<String> {
        let expr = PathExpr::parse(key).ok()?;
        match expr.project(&self.0) {
            Projected::One(Value::String(s)) => Some(s),
            Projected::One(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    /// The stable identifier declared by the type descriptor.
    pub fn id(&self, def: &ResourceTypeDef) -> Option<String> {
        self.project_string(&def.id_key)
    }

    pub fn name(&self, def: &ResourceTypeDef) -> Option<String> {
        self.project_string(&def.name_key)
    }

    pub fn arn(&self, def: &ResourceTypeDef) -> Option<String> {
        def.arn_key.as_deref().and_then(|k| self.project_string(k))
    }

    /// Creation timestamp, when the type declares a date key.
    pub fn created_at(&self, def: &ResourceTypeDef) -> Option<Timestamp> {
        let raw = def.date_key.as_deref().and_then(|k| self.project_string(k))?;
        Timestamp::from_str(&raw).ok()
    }

    /// Look up a tag value through the conventional `Tags` array.
    pub fn tag(&self, key: &str) -> Option<&str> {
        let tags = self.0.get("Tags")?.as_array()?;
        tags.iter()
            .find(|t| t.get("Key").and_then(Value::as_str) == Some(key))
            .and_then(|t| t.get("Value").and_then(Value::as_str))
    }

    /// Set or replace a tag in the local record.
    ///
    /// This only updates the in-memory copy; provider-side tagging goes
    /// through actions.
    pub fn set_tag(&mut self, key: &str, value: &str) {
        let obj = match self.0.as_object_mut() {
            Some(obj) => obj,
            None => return,
        };
        let tags = obj
            .entry("Tags")
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Some(items) = tags.as_array_mut() {
            items.retain(|t| t.get("Key").and_then(Value::as_str) != Some(key));
            items.push(serde_json::json!({"Key": key, "Value": value}));
        }
    }

    /// Remove a tag from the local record. Returns true when it was present.
    pub fn remove_tag(&mut self, key: &str) -> bool {
        if let Some(items) = self
            .0
            .get_mut("Tags")
            .and_then(Value::as_array_mut)
        {
            let before = items.len();
            items.retain(|t| t.get("Key").and_then(Value::as_str) != Some(key));
            return items.len() != before;
        }
        false
    }
}

impl From<Value> for Resource {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Descriptor for a registered resource type.
///
/// Declares how to enumerate the type and which key paths inside a record
/// carry its identity, plus the provider operation names the built-in
/// actions need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceTypeDef {
    /// Registry key, e.g. `vm` or `security-group`.
    pub type_name: String,
    /// Path yielding the stable identifier.
    pub id_key: String,
    /// Path yielding a human-readable name.
    pub name_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arn_key: Option<String>,
    /// Path yielding the creation timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_key: Option<String>,
    /// Ordered paths for tabular report output.
    pub default_report_fields: Vec<String>,
    /// Provider list operation for enumeration.
    pub enumerate_op: String,
    /// Optional per-type augmentation operation (tags, attached documents).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub augment_op: Option<String>,
    /// Provider operation used by the `tag` / `mark-for-op` actions.
    pub tag_op: String,
    /// Provider operation used by the `remove-tag` action.
    pub untag_op: String,
}

impl ResourceTypeDef {
    pub fn new(type_name: impl Into<String>, id_key: impl Into<String>) -> Self {
        let id_key = id_key.into();
        Self {
            type_name: type_name.into(),
            name_key: id_key.clone(),
            id_key,
            arn_key: None,
            date_key: None,
            default_report_fields: Vec::new(),
            enumerate_op: String::new(),
            augment_op: None,
            tag_op: "CreateTags".to_string(),
            untag_op: "DeleteTags".to_string(),
        }
    }

    pub fn with_name_key(mut self, key: impl Into<String>) -> Self {
        self.name_key = key.into();
        self
    }

    pub fn with_arn_key(mut self, key: impl Into<String>) -> Self {
        self.arn_key = Some(key.into());
        self
    }

    pub fn with_date_key(mut self, key: impl Into<String>) -> Self {
        self.date_key = Some(key.into());
        self
    }

    pub fn with_report_fields(mut self, fields: &[&str]) -> Self {
        self.default_report_fields = fields.iter().map(|f| (*f).to_string()).collect();
        self
    }

    pub fn with_enumerate_op(mut self, op: impl Into<String>) -> Self {
        self.enumerate_op = op.into();
        self
    }

    pub fn with_augment_op(mut self, op: impl Into<String>) -> Self {
        self.augment_op = Some(op.into());
        self
    }

    pub fn with_tag_ops(mut self, tag: impl Into<String>, untag: impl Into<String>) -> Self {
        self.tag_op = tag.into();
        self.untag_op = untag.into();
        self
    }

    /// Validate that the declared key paths parse.
    pub fn validate(&self) -> Result<()> {
        PathExpr::parse(&self.id_key)?;
        PathExpr::parse(&self.name_key)?;
        if let Some(k) = &self.arn_key {
            PathExpr::parse(k)?;
        }
        if let Some(k) = &self.date_key {
            PathExpr::parse(k)?;
        }
        for field in &self.default_report_fields {
            PathExpr::parse(field)?;
        }
        if self.enumerate_op.is_empty() {
            return Err(CoreError::fatal(format!(
                "resource type {:?} has no enumerate operation",
                self.type_name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vm_def() -> ResourceTypeDef {
        ResourceTypeDef::new("vm", "InstanceId")
            .with_name_key("tag:Name")
            .with_date_key("LaunchTime")
            .with_report_fields(&["InstanceId", "State.Name", "tag:Name"])
            .with_enumerate_op("DescribeInstances")
    }

    #[test]
    fn test_id_and_name() {
        let def = vm_def();
        let r = Resource::new(json!({
            "InstanceId": "i-123",
            "Tags": [{"Key": "Name", "Value": "web-1"}]
        }));
        assert_eq!(r.id(&def), Some("i-123".to_string()));
        assert_eq!(r.name(&def), Some("web-1".to_string()));
        assert!(r.arn(&def).is_none());
    }

    #[test]
    fn test_created_at() {
        let def = vm_def();
        let r = Resource::new(json!({
            "InstanceId": "i-123",
            "LaunchTime": "2023-01-01T00:00:00Z"
        }));
        let ts = r.created_at(&def).unwrap();
        assert_eq!(ts.to_string(), "2023-01-01T00:00:00Z");
    }

    #[test]
    fn test_created_at_missing_or_invalid() {
        let def = vm_def();
        assert!(
            Resource::new(json!({"InstanceId": "i-1"}))
                .created_at(&def)
                .is_none()
        );
        assert!(
            Resource::new(json!({"InstanceId": "i-1", "LaunchTime": "garbage"}))
                .created_at(&def)
                .is_none()
        );
    }

    #[test]
    fn test_tag_lookup() {
        let r = Resource::new(json!({
            "Tags": [{"Key": "env", "Value": "prod"}]
        }));
        assert_eq!(r.tag("env"), Some("prod"));
        assert_eq!(r.tag("owner"), None);
    }

    #[test]
    fn test_set_tag_replaces() {
        let mut r = Resource::new(json!({"InstanceId": "i-1"}));
        r.set_tag("env", "dev");
        r.set_tag("env", "prod");
        assert_eq!(r.tag("env"), Some("prod"));
        assert_eq!(r.0["Tags"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_tag() {
        let mut r = Resource::new(json!({
            "Tags": [{"Key": "env", "Value": "prod"}]
        }));
        assert!(r.remove_tag("env"));
        assert!(!r.remove_tag("env"));
        assert_eq!(r.tag("env"), None);
    }

    #[test]
    fn test_numeric_id_is_stringified() {
        let def = ResourceTypeDef::new("account", "AccountId").with_enumerate_op("ListAccounts");
        let r = Resource::new(json!({"AccountId": 123456789012i64}));
        assert_eq!(r.id(&def), Some("123456789012".to_string()));
    }

    #[test]
    fn test_descriptor_validate() {
        assert!(vm_def().validate().is_ok());

        let missing_op = ResourceTypeDef::new("vm", "InstanceId");
        assert!(missing_op.validate().is_err());

        let bad_path = ResourceTypeDef::new("vm", "a..b").with_enumerate_op("Describe");
        assert!(bad_path.validate().is_err());
    }

    #[test]
    fn test_descriptor_serde_roundtrip() {
        let def = vm_def();
        let json = serde_json::to_value(&def).unwrap();
        let back: ResourceTypeDef = serde_json::from_value(json).unwrap();
        assert_eq!(def, back);
    }
}
