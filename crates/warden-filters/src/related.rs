//! Filters over a cross-referenced resource set.
//!
//! A related filter resolves references on the filtered resource (for a
//! vm, its security group ids), looks the targets up in a prefetched
//! index, and applies an embedded value filter to the related resources.

use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use warden_core::{CoreError, PathExpr, Resource, Result};

use crate::coerce::Coercion;
use crate::node::{FilterDescriptor, RelatedSource, TypedFilter};
use crate::ops::CmpOp;
use crate::value::{FilterContext, ValueFilter};

/// How one resource type references another.
#[derive(Debug, Clone)]
pub struct RelatedSpec {
    /// Registered resource type of the referenced set.
    pub related_type: String,
    /// Path on the filtered resource yielding the referenced ids.
    pub reference_path: String,
    /// Path on a related resource yielding its id.
    pub related_id_key: String,
}

impl RelatedSpec {
    pub fn new(
        related_type: impl Into<String>,
        reference_path: impl Into<String>,
        related_id_key: impl Into<String>,
    ) -> Self {
        Self {
            related_type: related_type.into(),
            reference_path: reference_path.into(),
            related_id_key: related_id_key.into(),
        }
    }
}

/// Whether one matching related resource suffices or all must match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchOperator {
    #[default]
    Any,
    All,
}

/// Generic related-resource filter, instantiated per reference edge.
#[derive(Debug)]
pub struct RelatedFilter {
    name: String,
    spec: RelatedSpec,
    reference: PathExpr,
    related_id: PathExpr,
    matcher: Option<ValueFilter>,
    match_operator: MatchOperator,
    match_empty: bool,
    index: ArcSwap<HashMap<String, Resource>>,
}

impl RelatedFilter {
    pub fn from_params(name: impl Into<String>, spec: RelatedSpec, params: &Value) -> Result<Self> {
        let obj = params
            .as_object()
            .ok_or_else(|| CoreError::schema_at("", "related filter must be a mapping"))?;

        let match_operator = match obj.get("match-operator").and_then(Value::as_str) {
            None | Some("any") => MatchOperator::Any,
            Some("all") => MatchOperator::All,
            Some(other) => {
                return Err(CoreError::schema_at(
                    "match-operator",
                    format!("expected any or all, got {other:?}"),
                ));
            }
        };
        let match_empty = obj
            .get("match-empty")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        // The embedded key/op/value parameters form a value filter that is
        // evaluated against the related resources.
        let matcher = if obj.contains_key("key") {
            Some(ValueFilter::from_params(params)?)
        } else {
            None
        };

        Ok(Self {
            name: name.into(),
            reference: PathExpr::parse(&spec.reference_path)?,
            related_id: PathExpr::parse(&spec.related_id_key)?,
            spec,
            matcher,
            match_operator,
            match_empty,
            index: ArcSwap::from_pointee(HashMap::new()),
        })
    }

    /// Registry descriptor for one reference edge.
    pub fn descriptor(name: &'static str, spec: RelatedSpec, permissions: &[&str]) -> FilterDescriptor {
        FilterDescriptor::new(schema(name), permissions, move |params| {
            Ok(Arc::new(RelatedFilter::from_params(name, spec.clone(), params)?)
                as Arc<dyn TypedFilter>)
        })
    }

    fn referenced_ids(&self, resource: &Resource) -> Vec<String> {
        self.reference
            .project(&resource.0)
            .into_values()
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect()
    }

    fn related_matches(&self, related: &Resource, ctx: &FilterContext) -> bool {
        match &self.matcher {
            Some(m) => m.matches(related, ctx),
            None => true,
        }
    }
}

#[async_trait]
impl TypedFilter for RelatedFilter {
    fn name(&self) -> &str {
        &self.name
    }

    /// Fetch the full related set once and index it by id.
    async fn prepare(&self, source: &dyn RelatedSource, _resources: &[Resource]) -> Result<()> {
        let related = source.fetch_all(&self.spec.related_type).await?;
        let mut index = HashMap::with_capacity(related.len());
        for r in related {
            match self.related_id.project(&r.0).into_values().into_iter().next() {
                Some(Value::String(id)) => {
                    index.insert(id, r);
                }
                _ => debug!(
                    related_type = %self.spec.related_type,
                    "related resource without an id, skipping"
                ),
            }
        }
        debug!(
            filter = %self.name,
            related_type = %self.spec.related_type,
            indexed = index.len(),
            "related index built"
        );
        self.index.store(Arc::new(index));
        Ok(())
    }

    fn matches(&self, resource: &Resource, ctx: &FilterContext) -> bool {
        let ids = self.referenced_ids(resource);
        if ids.is_empty() {
            return self.match_empty;
        }
        let index = self.index.load();
        match self.match_operator {
            MatchOperator::Any => ids.iter().any(|id| {
                index
                    .get(id)
                    .is_some_and(|related| self.related_matches(related, ctx))
            }),
            // ALL requires every reference to resolve and match.
            MatchOperator::All => ids.iter().all(|id| {
                index
                    .get(id)
                    .is_some_and(|related| self.related_matches(related, ctx))
            }),
        }
    }
}

fn schema(name: &str) -> Value {
    json!({
        "type": "object",
        "required": ["type"],
        "properties": {
            "type": {"enum": [name]},
            "key": {"type": "string"},
            "op": {"enum": CmpOp::names()},
            "value": {},
            "value_type": {"enum": Coercion::names()},
            "default": {},
            "match-operator": {"enum": ["any", "all"]},
            "match-empty": {"type": "boolean"}
        },
        "additionalProperties": false
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixtureSource {
        groups: Vec<Resource>,
    }

    #[async_trait]
    impl RelatedSource for FixtureSource {
        async fn fetch_all(&self, resource_type: &str) -> Result<Vec<Resource>> {
            assert_eq!(resource_type, "security-group");
            Ok(self.groups.clone())
        }
    }

    fn spec() -> RelatedSpec {
        RelatedSpec::new("security-group", "SecurityGroups[].GroupId", "GroupId")
    }

    fn group(id: &str, cidr: &str) -> Resource {
        Resource(json!({
            "GroupId": id,
            "IpPermissions": [{"CidrIp": [cidr]}]
        }))
    }

    fn vm(groups: &[&str]) -> Resource {
        let refs: Vec<Value> = groups.iter().map(|g| json!({"GroupId": g})).collect();
        Resource(json!({"InstanceId": "i-1", "SecurityGroups": refs}))
    }

    fn open_world_filter() -> RelatedFilter {
        RelatedFilter::from_params(
            "security-group",
            spec(),
            &json!({
                "type": "security-group",
                "key": "IpPermissions[].CidrIp",
                "op": "contains",
                "value": "0.0.0.0/0"
            }),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_matches_through_related_resource() {
        let filter = open_world_filter();
        let source = FixtureSource {
            groups: vec![group("sg-1", "0.0.0.0/0")],
        };
        filter.prepare(&source, &[]).await.unwrap();

        let ctx = FilterContext::new();
        assert!(filter.matches(&vm(&["sg-1"]), &ctx));

        // Same reference, closed ingress: no longer selected.
        let closed = FixtureSource {
            groups: vec![group("sg-1", "10.0.0.0/8")],
        };
        filter.prepare(&closed, &[]).await.unwrap();
        assert!(!filter.matches(&vm(&["sg-1"]), &ctx));
    }

    #[tokio::test]
    async fn test_match_operator_all() {
        let filter = RelatedFilter::from_params(
            "security-group",
            spec(),
            &json!({
                "type": "security-group",
                "key": "IpPermissions[].CidrIp",
                "op": "contains",
                "value": "0.0.0.0/0",
                "match-operator": "all"
            }),
        )
        .unwrap();
        let source = FixtureSource {
            groups: vec![group("sg-1", "0.0.0.0/0"), group("sg-2", "10.0.0.0/8")],
        };
        filter.prepare(&source, &[]).await.unwrap();

        let ctx = FilterContext::new();
        assert!(filter.matches(&vm(&["sg-1"]), &ctx));
        assert!(!filter.matches(&vm(&["sg-1", "sg-2"]), &ctx));
    }

    #[tokio::test]
    async fn test_match_empty() {
        let params = json!({
            "type": "security-group",
            "key": "IpPermissions[].CidrIp",
            "op": "contains",
            "value": "0.0.0.0/0",
            "match-empty": true
        });
        let filter = RelatedFilter::from_params("security-group", spec(), &params).unwrap();
        filter
            .prepare(&FixtureSource { groups: vec![] }, &[])
            .await
            .unwrap();

        let ctx = FilterContext::new();
        // No references at all: selected because match-empty is set.
        assert!(filter.matches(&vm(&[]), &ctx));

        let strict = open_world_filter();
        strict
            .prepare(&FixtureSource { groups: vec![] }, &[])
            .await
            .unwrap();
        assert!(!strict.matches(&vm(&[]), &ctx));
    }

    #[tokio::test]
    async fn test_unresolved_reference_does_not_match() {
        let filter = open_world_filter();
        filter
            .prepare(
                &FixtureSource {
                    groups: vec![group("sg-1", "0.0.0.0/0")],
                },
                &[],
            )
            .await
            .unwrap();
        assert!(!filter.matches(&vm(&["sg-404"]), &FilterContext::new()));
    }

    #[tokio::test]
    async fn test_no_embedded_matcher_selects_on_reference() {
        let filter = RelatedFilter::from_params(
            "security-group",
            spec(),
            &json!({"type": "security-group"}),
        )
        .unwrap();
        filter
            .prepare(
                &FixtureSource {
                    groups: vec![group("sg-1", "10.0.0.0/8")],
                },
                &[],
            )
            .await
            .unwrap();
        assert!(filter.matches(&vm(&["sg-1"]), &FilterContext::new()));
    }

    #[test]
    fn test_bad_match_operator_rejected() {
        let err = RelatedFilter::from_params(
            "security-group",
            spec(),
            &json!({"type": "security-group", "match-operator": "some"}),
        )
        .unwrap_err();
        assert!(!err.violations().is_empty());
    }
}
