//! Policy document model.
//!
//! A policy is immutable after load. Filters and actions are kept as raw
//! specifications here; they are compiled against the resource type's
//! registries when the policy runs, after schema validation has passed.

use serde_json::{Map, Value, json};
use warden_core::{CoreError, Result};

/// How the policy is triggered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyMode {
    /// Enumerate-and-filter on demand, optionally on a schedule owned by an
    /// external scheduler.
    Pull { schedule: Option<String> },
    /// Driven by provider events; resources arrive by id.
    Event { events: Vec<String> },
}

impl Default for PolicyMode {
    fn default() -> Self {
        Self::Pull { schedule: None }
    }
}

impl PolicyMode {
    fn from_value(spec: &Value) -> Result<Self> {
        let obj = spec
            .as_object()
            .ok_or_else(|| CoreError::schema_at("mode", "mode must be a mapping"))?;
        match obj.get("type").and_then(Value::as_str) {
            None | Some("pull") => Ok(Self::Pull {
                schedule: obj
                    .get("schedule")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }),
            Some("event") => {
                let events = obj
                    .get("events")
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(Self::Event { events })
            }
            Some(other) => Err(CoreError::schema_at(
                "mode/type",
                format!("unknown mode {other:?}"),
            )),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Self::Pull { schedule: None } => json!({"type": "pull"}),
            Self::Pull {
                schedule: Some(schedule),
            } => json!({"type": "pull", "schedule": schedule}),
            Self::Event { events } => json!({"type": "event", "events": events}),
        }
    }
}

/// One policy: a resource type, a filter chain, and an action chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    pub name: String,
    pub resource: String,
    pub description: Option<String>,
    pub mode: PolicyMode,
    /// Value filters over the synthetic execution-context resource.
    pub conditions: Vec<Value>,
    /// Raw filter specification, compiled at run time.
    pub filters: Value,
    /// Raw action specifications, compiled at run time. Bare-string nodes
    /// are normalized to `{"type": name}` during parse.
    pub actions: Vec<Value>,
    pub tags: Vec<String>,
}

impl Policy {
    pub fn from_value(spec: &Value) -> Result<Self> {
        let obj = spec
            .as_object()
            .ok_or_else(|| CoreError::schema_at("", "policy must be a mapping"))?;

        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::schema_at("name", "policy requires a name"))?
            .to_string();
        let resource = obj
            .get("resource")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::schema_at("resource", "policy requires a resource type"))?
            .to_string();

        let mode = match obj.get("mode") {
            None => PolicyMode::default(),
            Some(spec) => PolicyMode::from_value(spec)?,
        };

        let list_of = |key: &str| -> Result<Vec<Value>> {
            match obj.get(key) {
                None => Ok(Vec::new()),
                Some(Value::Array(items)) => Ok(items.clone()),
                Some(_) => Err(CoreError::schema_at(key, format!("{key} must be a list"))),
            }
        };

        Ok(Self {
            name,
            resource,
            description: obj
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            mode,
            conditions: list_of("conditions")?,
            filters: obj.get("filters").cloned().unwrap_or_else(|| json!([])),
            actions: list_of("actions")?
                .into_iter()
                .map(|spec| match spec {
                    // A bare string names an action invoked without
                    // parameters.
                    Value::String(name) => json!({"type": name}),
                    other => other,
                })
                .collect(),
            tags: obj
                .get("tags")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    /// Serialize back to the document form. Re-parsing the result yields an
    /// equivalent policy.
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("name".into(), json!(self.name));
        obj.insert("resource".into(), json!(self.resource));
        if let Some(d) = &self.description {
            obj.insert("description".into(), json!(d));
        }
        obj.insert("mode".into(), self.mode.to_value());
        if !self.conditions.is_empty() {
            obj.insert("conditions".into(), json!(self.conditions));
        }
        obj.insert("filters".into(), self.filters.clone());
        if !self.actions.is_empty() {
            obj.insert("actions".into(), json!(self.actions));
        }
        if !self.tags.is_empty() {
            obj.insert("tags".into(), json!(self.tags));
        }
        Value::Object(obj)
    }
}

/// A parsed `policies:` document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PolicySet {
    pub policies: Vec<Policy>,
}

impl PolicySet {
    /// Parse a document already converted to a JSON value (the CLI handles
    /// YAML).
    pub fn from_value(doc: &Value) -> Result<Self> {
        let policies = doc
            .get("policies")
            .and_then(Value::as_array)
            .ok_or_else(|| CoreError::schema_at("policies", "document requires a policies list"))?;
        Ok(Self {
            policies: policies.iter().map(Policy::from_value).collect::<Result<_>>()?,
        })
    }

    pub fn to_value(&self) -> Value {
        json!({"policies": self.policies.iter().map(Policy::to_value).collect::<Vec<_>>()})
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_policy_defaults() {
        let p = Policy::from_value(&json!({"name": "unmarked", "resource": "vm"})).unwrap();
        assert_eq!(p.mode, PolicyMode::Pull { schedule: None });
        assert!(p.conditions.is_empty());
        assert_eq!(p.filters, json!([]));
        assert!(p.actions.is_empty());
    }

    #[test]
    fn test_event_mode() {
        let p = Policy::from_value(&json!({
            "name": "on-launch",
            "resource": "vm",
            "mode": {"type": "event", "events": ["RunInstances"]}
        }))
        .unwrap();
        assert_eq!(
            p.mode,
            PolicyMode::Event {
                events: vec!["RunInstances".to_string()]
            }
        );
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let err = Policy::from_value(&json!({
            "name": "p", "resource": "vm", "mode": {"type": "cron"}
        }))
        .unwrap_err();
        assert!(!err.violations().is_empty());
    }

    #[test]
    fn test_missing_name_or_resource() {
        assert!(Policy::from_value(&json!({"resource": "vm"})).is_err());
        assert!(Policy::from_value(&json!({"name": "p"})).is_err());
    }

    #[test]
    fn test_bare_string_action_normalizes() {
        let p = Policy::from_value(&json!({
            "name": "nightly-stop",
            "resource": "vm",
            "actions": ["stop", {"type": "tag", "key": "reviewed", "value": "true"}]
        }))
        .unwrap();
        assert_eq!(p.actions[0], json!({"type": "stop"}));
        assert_eq!(p.actions[1]["type"], "tag");
    }

    #[test]
    fn test_set_roundtrip() {
        let doc = json!({"policies": [{
            "name": "stop-old",
            "resource": "vm",
            "description": "stop instances older than 30 days",
            "mode": {"type": "pull", "schedule": "rate(1 day)"},
            "conditions": [{"type": "value", "key": "region", "op": "eq", "value": "us-east-1"}],
            "filters": [{"type": "value", "key": "LaunchTime", "op": "gt", "value_type": "age", "value": 30}],
            "actions": [{"type": "mark-for-op", "op": "stop", "days": 4}],
            "tags": ["cost"]
        }]});
        let set = PolicySet::from_value(&doc).unwrap();
        let reparsed = PolicySet::from_value(&set.to_value()).unwrap();
        assert_eq!(set, reparsed);
    }

    #[test]
    fn test_document_without_policies_rejected() {
        assert!(PolicySet::from_value(&json!({"rules": []})).is_err());
        assert!(PolicySet::from_value(&json!({"policies": {}})).is_err());
    }
}
