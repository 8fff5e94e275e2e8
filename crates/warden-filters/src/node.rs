//! Filter tree: combinators, typed filter dispatch, and the filter registry.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;

use warden_core::{CoreError, PluginRegistry, Resource, Result};

use crate::coerce::Coercion;
use crate::ops::CmpOp;
use crate::value::{FilterContext, ValueFilter};

/// Keys that are never treated as single-key value shorthand.
const RESERVED: [&str; 4] = ["type", "and", "or", "not"];

/// Supplies related resource sets to typed filters during `prepare`.
///
/// The engine's resource manager implements this; tests use a fixture map.
#[async_trait]
pub trait RelatedSource: Send + Sync {
    async fn fetch_all(&self, resource_type: &str) -> Result<Vec<Resource>>;
}

/// A registered filter beyond the built-in `value` node.
///
/// `prepare` runs once per policy run before any `matches` call; filters
/// that need related data fetch and index it there.
#[async_trait]
pub trait TypedFilter: Send + Sync {
    fn name(&self) -> &str;

    async fn prepare(&self, _source: &dyn RelatedSource, _resources: &[Resource]) -> Result<()> {
        Ok(())
    }

    fn matches(&self, resource: &Resource, ctx: &FilterContext) -> bool;
}

type FilterCtor = dyn Fn(&Value) -> Result<Arc<dyn TypedFilter>> + Send + Sync;

/// Registry entry for a typed filter: schema fragment, permission hints,
/// constructor.
pub struct FilterDescriptor {
    schema: Value,
    permissions: Vec<String>,
    ctor: Arc<FilterCtor>,
}

impl FilterDescriptor {
    pub fn new<F>(schema: Value, permissions: &[&str], ctor: F) -> Self
    where
        F: Fn(&Value) -> Result<Arc<dyn TypedFilter>> + Send + Sync + 'static,
    {
        Self {
            schema,
            permissions: permissions.iter().map(|p| (*p).to_string()).collect(),
            ctor: Arc::new(ctor),
        }
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    pub fn permissions(&self) -> &[String] {
        &self.permissions
    }

    pub fn construct(&self, params: &Value) -> Result<Arc<dyn TypedFilter>> {
        (self.ctor)(params)
    }
}

impl fmt::Debug for FilterDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterDescriptor")
            .field("permissions", &self.permissions)
            .finish_non_exhaustive()
    }
}

pub type FilterRegistry = PluginRegistry<FilterDescriptor>;

/// A parsed filter tree.
#[derive(Clone)]
pub enum FilterNode {
    Value(ValueFilter),
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
    Not(Box<FilterNode>),
    Typed {
        name: String,
        filter: Arc<dyn TypedFilter>,
    },
}

impl fmt::Debug for FilterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::And(cs) => f.debug_tuple("And").field(cs).finish(),
            Self::Or(cs) => f.debug_tuple("Or").field(cs).finish(),
            Self::Not(c) => f.debug_tuple("Not").field(c).finish(),
            Self::Typed { name, .. } => f.debug_struct("Typed").field("name", name).finish(),
        }
    }
}

impl FilterNode {
    /// Parse a filter specification. A bare list is an implicit `and`.
    pub fn parse(spec: &Value, registry: &FilterRegistry) -> Result<Self> {
        match spec {
            Value::Array(items) => Ok(Self::And(Self::parse_children(items, registry)?)),
            Value::Object(obj) => {
                if let Some(children) = obj.get("and") {
                    return Ok(Self::And(Self::parse_list(children, registry, "and")?));
                }
                if let Some(children) = obj.get("or") {
                    return Ok(Self::Or(Self::parse_list(children, registry, "or")?));
                }
                if let Some(child) = obj.get("not") {
                    return Ok(Self::Not(Box::new(Self::parse_not(child, registry)?)));
                }
                if let Some(type_name) = obj.get("type") {
                    let name = type_name.as_str().ok_or_else(|| {
                        CoreError::schema_at("type", "filter type must be a string")
                    })?;
                    if name == "value" {
                        return Ok(Self::Value(ValueFilter::from_params(spec)?));
                    }
                    let descriptor = registry.get(name).ok_or_else(|| {
                        CoreError::schema_at("type", format!("unknown filter type {name:?}"))
                    })?;
                    return Ok(Self::Typed {
                        name: name.to_string(),
                        filter: descriptor.construct(spec)?,
                    });
                }
                // Single-key shorthand: {"<path>": <value>} means eq.
                if obj.len() == 1 {
                    let (key, value) = obj.iter().next().unwrap();
                    if !RESERVED.contains(&key.as_str()) {
                        return Ok(Self::Value(ValueFilter::shorthand(key, value.clone())?));
                    }
                }
                Err(CoreError::schema_at(
                    "",
                    "filter must be a value node, a combinator, or a typed filter",
                ))
            }
            _ => Err(CoreError::schema_at("", "filter must be a mapping or a list")),
        }
    }

    fn parse_children(items: &[Value], registry: &FilterRegistry) -> Result<Vec<Self>> {
        items.iter().map(|i| Self::parse(i, registry)).collect()
    }

    fn parse_list(spec: &Value, registry: &FilterRegistry, combinator: &str) -> Result<Vec<Self>> {
        let items = spec.as_array().ok_or_else(|| {
            CoreError::schema_at(combinator, format!("{combinator} requires a list of filters"))
        })?;
        Self::parse_children(items, registry)
    }

    /// `not` takes exactly one child; a list of one is accepted since that
    /// is how real policies are written.
    fn parse_not(spec: &Value, registry: &FilterRegistry) -> Result<Self> {
        match spec {
            Value::Array(items) if items.len() == 1 => Self::parse(&items[0], registry),
            Value::Array(items) => Err(CoreError::schema_at(
                "not",
                format!("not takes exactly one child, got {}", items.len()),
            )),
            other => Self::parse(other, registry),
        }
    }

    /// Evaluate against one resource. Combinators short-circuit.
    pub fn matches(&self, resource: &Resource, ctx: &FilterContext) -> bool {
        match self {
            Self::Value(f) => f.matches(resource, ctx),
            Self::And(children) => children.iter().all(|c| c.matches(resource, ctx)),
            Self::Or(children) => children.iter().any(|c| c.matches(resource, ctx)),
            Self::Not(child) => !child.matches(resource, ctx),
            Self::Typed { filter, .. } => filter.matches(resource, ctx),
        }
    }

    /// All typed filters in the tree, in no particular order.
    pub fn typed_filters(&self) -> Vec<Arc<dyn TypedFilter>> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match node {
                Self::Typed { filter, .. } => out.push(Arc::clone(filter)),
                Self::And(cs) | Self::Or(cs) => stack.extend(cs.iter()),
                Self::Not(c) => stack.push(c.as_ref()),
                Self::Value(_) => {}
            }
        }
        out
    }

    /// Run every typed filter's prefetch once before evaluation.
    pub async fn prepare(&self, source: &dyn RelatedSource, resources: &[Resource]) -> Result<()> {
        for filter in self.typed_filters() {
            filter.prepare(source, resources).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TypedFilter for ValueFilter {
    fn name(&self) -> &str {
        "value"
    }

    fn matches(&self, resource: &Resource, ctx: &FilterContext) -> bool {
        ValueFilter::matches(self, resource, ctx)
    }
}

/// Descriptor for the built-in `value` filter.
///
/// The parser recognizes `value` before any registry lookup; the entry
/// exists so introspection and schema assembly see it like any other
/// registered filter.
pub fn value_descriptor() -> FilterDescriptor {
    FilterDescriptor::new(value_filter_schema(), &[], |params| {
        Ok(Arc::new(ValueFilter::from_params(params)?) as Arc<dyn TypedFilter>)
    })
}

/// A filter registry with the built-in `value` filter already registered.
pub fn filter_registry(kind: &'static str) -> Result<FilterRegistry> {
    let registry = FilterRegistry::new(kind);
    registry.register("value", value_descriptor())?;
    Ok(registry)
}

/// Schema fragment for the built-in `value` node.
pub fn value_filter_schema() -> Value {
    json!({
        "type": "object",
        "required": ["key"],
        "properties": {
            "type": {"enum": ["value"]},
            "key": {"type": "string"},
            "op": {"enum": CmpOp::names()},
            "value": {},
            "value_from": {"type": "object"},
            "value_type": {"enum": Coercion::names()},
            "default": {}
        },
        "additionalProperties": false
    })
}
