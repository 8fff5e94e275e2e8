//! Composite policy schema: structural validation with `jsonschema`, then a
//! semantic pass for everything a grammar cannot express.
//!
//! The schema is assembled at startup from the registry snapshot: a fixed
//! policy skeleton plus, per resource type, the union of its registered
//! filter and action fragments. Validation is a pure function of the
//! document and that snapshot.

use serde_json::{Map, Value, json};
use std::sync::Arc;

use warden_core::{CoreError, Result, Violation};
use warden_filters::{FilterNode, FilterRegistry, filter_registry};

use crate::catalog::ResourceRegistry;
use crate::policy::Policy;

/// Validates policy documents against the composite schema.
pub struct PolicyValidator {
    validator: jsonschema::Validator,
    registry: Arc<ResourceRegistry>,
    /// Conditions run against the execution context; no typed filters exist
    /// there.
    condition_registry: FilterRegistry,
}

impl PolicyValidator {
    pub fn new(registry: Arc<ResourceRegistry>) -> Result<Self> {
        let schema = composite_schema(&registry);
        let validator = jsonschema::options()
            .build(&schema)
            .map_err(|e| CoreError::fatal(format!("composite schema did not compile: {e}")))?;
        Ok(Self {
            validator,
            registry,
            condition_registry: filter_registry("condition")?,
        })
    }

    /// Validate a whole `policies:` document, surfacing every violation.
    pub fn validate(&self, doc: &Value) -> Result<()> {
        let mut violations: Vec<Violation> = self
            .validator
            .iter_errors(doc)
            .map(|err| Violation::new(err.instance_path().to_string(), err.to_string()))
            .collect();

        // The semantic pass assumes the document shape holds.
        if violations.is_empty() {
            self.semantic(doc, &mut violations);
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(CoreError::schema(violations))
        }
    }

    fn semantic(&self, doc: &Value, violations: &mut Vec<Violation>) {
        let Some(policies) = doc.get("policies").and_then(Value::as_array) else {
            return;
        };

        let mut seen = std::collections::HashSet::new();
        for (i, spec) in policies.iter().enumerate() {
            let at = |field: &str| format!("/policies/{i}/{field}");

            let policy = match Policy::from_value(spec) {
                Ok(p) => p,
                Err(e) => {
                    for v in e.violations() {
                        violations.push(Violation::new(at(&v.path), v.reason.clone()));
                    }
                    continue;
                }
            };

            if !seen.insert(policy.name.clone()) {
                violations.push(Violation::new(
                    at("name"),
                    format!("duplicate policy name {:?}", policy.name),
                ));
            }

            let Some(plugin) = self.registry.get(&policy.resource) else {
                violations.push(Violation::new(
                    at("resource"),
                    format!("unknown resource type {:?}", policy.resource),
                ));
                continue;
            };

            if let Err(e) = FilterNode::parse(&policy.filters, &plugin.filters) {
                for v in e.violations() {
                    violations.push(Violation::new(at("filters"), v.reason.clone()));
                }
            }

            for (j, condition) in policy.conditions.iter().enumerate() {
                if let Err(e) = FilterNode::parse(condition, &self.condition_registry) {
                    for v in e.violations() {
                        violations.push(Violation::new(
                            at(&format!("conditions/{j}")),
                            v.reason.clone(),
                        ));
                    }
                }
            }

            for (j, action) in policy.actions.iter().enumerate() {
                let path = at(&format!("actions/{j}"));
                let Some(name) = action.get("type").and_then(Value::as_str) else {
                    violations.push(Violation::new(path, "action requires a type"));
                    continue;
                };
                let Some(descriptor) = plugin.actions.get(name) else {
                    violations.push(Violation::new(
                        path,
                        format!("unknown action {name:?} for resource {:?}", policy.resource),
                    ));
                    continue;
                };
                if let Err(e) = descriptor.construct(action) {
                    for v in e.violations() {
                        violations.push(Violation::new(path.clone(), v.reason.clone()));
                    }
                }
            }
        }
    }
}

/// Assemble the composite schema from a registry snapshot.
pub fn composite_schema(registry: &ResourceRegistry) -> Value {
    let mut defs = Map::new();
    let mut per_resource = Vec::new();

    for (name, plugin) in registry.snapshot() {
        let filter_ref = json!({"$ref": format!("#/$defs/filter-{name}")});
        let mut filter_variants = vec![
            combinator("and", &filter_ref),
            combinator("or", &filter_ref),
            json!({
                "type": "object",
                "required": ["not"],
                "properties": {"not": {"anyOf": [
                    filter_ref.clone(),
                    {"type": "array", "items": filter_ref.clone(), "minItems": 1, "maxItems": 1}
                ]}},
                "additionalProperties": false
            }),
            // Single-key value shorthand; the semantic pass rejects reserved
            // keys and unknown types that slip through this branch.
            json!({"type": "object", "minProperties": 1, "maxProperties": 1}),
        ];
        for (_, descriptor) in plugin.filters.snapshot() {
            filter_variants.push(descriptor.schema().clone());
        }
        defs.insert(format!("filter-{name}"), json!({"anyOf": filter_variants}));

        let mut action_variants = Vec::new();
        for (action_name, descriptor) in plugin.actions.snapshot() {
            action_variants.push(descriptor.schema().clone());
            // Bare-string form for actions invoked without parameters.
            action_variants.push(json!({"const": action_name}));
        }
        defs.insert(format!("action-{name}"), json!({"anyOf": action_variants}));

        per_resource.push(json!({
            "if": {"properties": {"resource": {"const": name}}},
            "then": {"properties": {
                "filters": {"type": "array", "items": {"$ref": format!("#/$defs/filter-{name}")}},
                "actions": {"type": "array", "items": {"$ref": format!("#/$defs/action-{name}")}}
            }}
        }));
    }

    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "required": ["policies"],
        "properties": {"policies": {"type": "array", "items": {
            "type": "object",
            "required": ["name", "resource"],
            "properties": {
                "name": {"type": "string", "pattern": "^[A-Za-z0-9][A-Za-z0-9._-]*$"},
                "resource": {"enum": registry.names()},
                "description": {"type": "string"},
                "mode": {
                    "type": "object",
                    "properties": {
                        "type": {"enum": ["pull", "event"]},
                        "schedule": {"type": "string"},
                        "events": {"type": "array", "items": {"type": "string"}}
                    },
                    "additionalProperties": false
                },
                "conditions": {"type": "array"},
                "filters": {"type": "array"},
                "actions": {"type": "array"},
                "tags": {"type": "array", "items": {"type": "string"}}
            },
            "additionalProperties": false,
            "allOf": per_resource
        }}},
        "additionalProperties": false,
        "$defs": defs
    })
}

fn combinator(key: &str, filter_ref: &Value) -> Value {
    let mut properties = Map::new();
    properties.insert(
        key.to_string(),
        json!({"type": "array", "items": filter_ref}),
    );
    json!({
        "type": "object",
        "required": [key],
        "properties": properties,
        "additionalProperties": false
    })
}
