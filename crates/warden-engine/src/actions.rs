//! Actions and the action registry.
//!
//! Built-ins cover the tag lifecycle (`tag`, `remove-tag`, `mark-for-op`)
//! and `notify`. Per-resource-type mutating actions register through the
//! same descriptor mechanism. An action receives whole batches; the
//! executor owns partitioning, concurrency and outcome aggregation.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::fmt;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tracing::info;

use warden_core::{CoreError, PluginRegistry, Resource, ResourceTypeDef, Result, Timestamp};
use warden_filters::{DEFAULT_MARK_TAG, Marker};
use warden_provider::{ProviderSession, RetryPolicy, with_retry};

/// Everything an action needs at run time.
pub struct ActionContext<'a> {
    pub session: &'a dyn ProviderSession,
    pub descriptor: &'a ResourceTypeDef,
    pub retry: &'a RetryPolicy,
    pub policy: &'a str,
    pub dry_run: bool,
    pub now: OffsetDateTime,
}

impl ActionContext<'_> {
    /// Stable ids of a batch, in batch order.
    pub fn ids(&self, batch: &[Resource]) -> Vec<String> {
        batch
            .iter()
            .filter_map(|r| r.id(self.descriptor))
            .collect()
    }
}

/// A mutating operation applied to filtered resources.
///
/// `run` receives one batch; a batch-level provider failure fails every
/// resource in it. Dry-run must issue zero provider calls.
#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, batch: &[Resource], ctx: &ActionContext<'_>) -> Result<()>;
}

type ActionCtor = dyn Fn(&Value) -> Result<Arc<dyn Action>> + Send + Sync;

/// Registry entry for an action: schema fragment, permission hints,
/// constructor. Construction validates the parameters.
pub struct ActionDescriptor {
    schema: Value,
    permissions: Vec<String>,
    ctor: Arc<ActionCtor>,
}

impl ActionDescriptor {
    pub fn new<F>(schema: Value, permissions: &[&str], ctor: F) -> Self
    where
        F: Fn(&Value) -> Result<Arc<dyn Action>> + Send + Sync + 'static,
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

    pub fn construct(&self, params: &Value) -> Result<Arc<dyn Action>> {
        (self.ctor)(params)
    }
}

impl fmt::Debug for ActionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDescriptor")
            .field("permissions", &self.permissions)
            .finish_non_exhaustive()
    }
}

pub type ActionRegistry = PluginRegistry<ActionDescriptor>;

/// External delivery channel for `notify` payloads.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn publish(&self, payload: &Value) -> Result<()>;
}

/// Default transport: structured log line, nothing leaves the process.
#[derive(Debug, Default)]
pub struct LogTransport;

#[async_trait]
impl MessageTransport for LogTransport {
    async fn publish(&self, payload: &Value) -> Result<()> {
        info!(payload = %payload, "notification");
        Ok(())
    }
}

/// `{type: tag, key, value}` or `{type: tag, tags: {k: v}}`.
pub struct TagAction {
    tags: Vec<(String, String)>,
}

impl TagAction {
    pub fn from_params(params: &Value) -> Result<Self> {
        let obj = require_object(params)?;
        let mut tags = Vec::new();
        if let Some(map) = obj.get("tags").and_then(Value::as_object) {
            for (k, v) in map {
                let value = v
                    .as_str()
                    .ok_or_else(|| CoreError::schema_at("tags", "tag values must be strings"))?;
                tags.push((k.clone(), value.to_string()));
            }
        }
        if let (Some(k), Some(v)) = (
            obj.get("key").and_then(Value::as_str),
            obj.get("value").and_then(Value::as_str),
        ) {
            tags.push((k.to_string(), v.to_string()));
        }
        if tags.is_empty() {
            return Err(CoreError::schema_at(
                "",
                "tag action requires key/value or a tags mapping",
            ));
        }
        Ok(Self { tags })
    }

    pub fn descriptor() -> ActionDescriptor {
        let schema = json!({
            "type": "object",
            "required": ["type"],
            "properties": {
                "type": {"enum": ["tag"]},
                "key": {"type": "string"},
                "value": {"type": "string"},
                "tags": {"type": "object", "additionalProperties": {"type": "string"}}
            },
            "additionalProperties": false
        });
        ActionDescriptor::new(schema, &["tag:Create"], |params| {
            Ok(Arc::new(TagAction::from_params(params)?) as Arc<dyn Action>)
        })
    }
}

#[async_trait]
impl Action for TagAction {
    fn name(&self) -> &str {
        "tag"
    }

    async fn run(&self, batch: &[Resource], ctx: &ActionContext<'_>) -> Result<()> {
        let ids = ctx.ids(batch);
        let tags: Vec<Value> = self
            .tags
            .iter()
            .map(|(k, v)| json!({"Key": k, "Value": v}))
            .collect();
        if ctx.dry_run {
            info!(policy = ctx.policy, resources = ids.len(), op = %ctx.descriptor.tag_op, "dry-run: would tag");
            return Ok(());
        }
        let params = json!({"Resources": ids, "Tags": tags});
        let op = ctx.descriptor.tag_op.as_str();
        with_retry(ctx.retry, op, || ctx.session.call(op, &params)).await?;
        Ok(())
    }
}

/// `{type: remove-tag, tags: [keys]}`.
pub struct RemoveTagAction {
    keys: Vec<String>,
}

impl RemoveTagAction {
    pub fn from_params(params: &Value) -> Result<Self> {
        let obj = require_object(params)?;
        let keys: Vec<String> = obj
            .get("tags")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if keys.is_empty() {
            return Err(CoreError::schema_at(
                "tags",
                "remove-tag requires a list of tag keys",
            ));
        }
        Ok(Self { keys })
    }

    pub fn descriptor() -> ActionDescriptor {
        let schema = json!({
            "type": "object",
            "required": ["type", "tags"],
            "properties": {
                "type": {"enum": ["remove-tag"]},
                "tags": {"type": "array", "items": {"type": "string"}, "minItems": 1}
            },
            "additionalProperties": false
        });
        ActionDescriptor::new(schema, &["tag:Delete"], |params| {
            Ok(Arc::new(RemoveTagAction::from_params(params)?) as Arc<dyn Action>)
        })
    }
}

#[async_trait]
impl Action for RemoveTagAction {
    fn name(&self) -> &str {
        "remove-tag"
    }

    async fn run(&self, batch: &[Resource], ctx: &ActionContext<'_>) -> Result<()> {
        let ids = ctx.ids(batch);
        if ctx.dry_run {
            info!(policy = ctx.policy, resources = ids.len(), keys = ?self.keys, "dry-run: would remove tags");
            return Ok(());
        }
        let params = json!({"Resources": ids, "Keys": self.keys});
        let op = ctx.descriptor.untag_op.as_str();
        with_retry(ctx.retry, op, || ctx.session.call(op, &params)).await?;
        Ok(())
    }
}

/// `{type: mark-for-op, op, days?, tag?, message?}`.
///
/// Writes the marker tag the `marked-for-op` filter reads back.
pub struct MarkForOpAction {
    op: String,
    days: i64,
    tag: String,
    message: String,
}

impl MarkForOpAction {
    pub fn from_params(params: &Value) -> Result<Self> {
        let obj = require_object(params)?;
        let op = obj
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::schema_at("op", "mark-for-op requires an op name"))?
            .to_string();
        let days = match obj.get("days") {
            None => 0,
            Some(v) => v
                .as_i64()
                .filter(|n| *n >= 0)
                .ok_or_else(|| CoreError::schema_at("days", "days must be a non-negative integer"))?,
        };
        Ok(Self {
            op,
            days,
            tag: obj
                .get("tag")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_MARK_TAG)
                .to_string(),
            message: obj
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Resource does not meet policy")
                .to_string(),
        })
    }

    pub fn descriptor() -> ActionDescriptor {
        let schema = json!({
            "type": "object",
            "required": ["type", "op"],
            "properties": {
                "type": {"enum": ["mark-for-op"]},
                "op": {"type": "string"},
                "days": {"type": "integer", "minimum": 0},
                "tag": {"type": "string"},
                "message": {"type": "string"}
            },
            "additionalProperties": false
        });
        ActionDescriptor::new(schema, &["tag:Create"], |params| {
            Ok(Arc::new(MarkForOpAction::from_params(params)?) as Arc<dyn Action>)
        })
    }

    fn marker(&self, now: OffsetDateTime) -> Marker {
        let date = Timestamp::new(now + Duration::days(self.days));
        Marker::new(&self.message, &self.op, date)
    }
}

#[async_trait]
impl Action for MarkForOpAction {
    fn name(&self) -> &str {
        "mark-for-op"
    }

    async fn run(&self, batch: &[Resource], ctx: &ActionContext<'_>) -> Result<()> {
        let ids = ctx.ids(batch);
        let marker = self.marker(ctx.now);
        if ctx.dry_run {
            info!(
                policy = ctx.policy,
                resources = ids.len(),
                marker = %marker.encode(),
                "dry-run: would mark"
            );
            return Ok(());
        }
        let params = json!({
            "Resources": ids,
            "Tags": [{"Key": self.tag, "Value": marker.encode()}]
        });
        let op = ctx.descriptor.tag_op.as_str();
        with_retry(ctx.retry, op, || ctx.session.call(op, &params)).await?;
        Ok(())
    }
}

/// `{type: notify, to: [...], subject?, ...}`.
///
/// Builds a structured payload and hands it to the configured transport.
pub struct NotifyAction {
    params: Map<String, Value>,
    transport: Arc<dyn MessageTransport>,
}

impl NotifyAction {
    pub fn from_params(params: &Value, transport: Arc<dyn MessageTransport>) -> Result<Self> {
        let obj = require_object(params)?;
        if obj
            .get("to")
            .and_then(Value::as_array)
            .is_none_or(|to| to.is_empty())
        {
            return Err(CoreError::schema_at(
                "to",
                "notify requires at least one recipient",
            ));
        }
        let mut params = obj.clone();
        params.remove("type");
        Ok(Self { params, transport })
    }

    pub fn descriptor(transport: Arc<dyn MessageTransport>) -> ActionDescriptor {
        let schema = json!({
            "type": "object",
            "required": ["type", "to"],
            "properties": {
                "type": {"enum": ["notify"]},
                "to": {"type": "array", "items": {"type": "string"}, "minItems": 1},
                "subject": {"type": "string"},
                "template": {"type": "string"}
            },
            "additionalProperties": true
        });
        ActionDescriptor::new(schema, &[], move |params| {
            Ok(Arc::new(NotifyAction::from_params(params, Arc::clone(&transport))?)
                as Arc<dyn Action>)
        })
    }
}

#[async_trait]
impl Action for NotifyAction {
    fn name(&self) -> &str {
        "notify"
    }

    async fn run(&self, batch: &[Resource], ctx: &ActionContext<'_>) -> Result<()> {
        if ctx.dry_run {
            info!(policy = ctx.policy, resources = batch.len(), "dry-run: would notify");
            return Ok(());
        }
        let payload = json!({
            "policy": ctx.policy,
            "account_id": ctx.session.account_id(),
            "region": ctx.session.region(),
            "resource_type": ctx.descriptor.type_name,
            "resources": ctx.ids(batch),
            "params": Value::Object(self.params.clone()),
        });
        self.transport.publish(&payload).await
    }
}

/// The actions present in every resource type's registry.
pub fn register_builtin_actions(
    registry: &ActionRegistry,
    transport: Arc<dyn MessageTransport>,
) -> Result<()> {
    registry.register("tag", TagAction::descriptor())?;
    registry.register("remove-tag", RemoveTagAction::descriptor())?;
    registry.register("mark-for-op", MarkForOpAction::descriptor())?;
    registry.register("notify", NotifyAction::descriptor(transport))?;
    Ok(())
}

fn require_object(params: &Value) -> Result<&Map<String, Value>> {
    params
        .as_object()
        .ok_or_else(|| CoreError::schema_at("", "action parameters must be a mapping"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use tokio_test::block_on;
    use warden_provider::testing::StaticSession;

    fn vm_def() -> ResourceTypeDef {
        ResourceTypeDef::new("vm", "InstanceId").with_enumerate_op("DescribeInstances")
    }

    fn batch() -> Vec<Resource> {
        vec![
            Resource(json!({"InstanceId": "i-1"})),
            Resource(json!({"InstanceId": "i-2"})),
        ]
    }

    fn run_action(action: &dyn Action, session: &StaticSession, dry_run: bool) -> Result<()> {
        let descriptor = vm_def();
        let retry = RetryPolicy::fast();
        let ctx = ActionContext {
            session,
            descriptor: &descriptor,
            retry: &retry,
            policy: "test-policy",
            dry_run,
            now: datetime!(2023-03-01 00:00:00 UTC),
        };
        block_on(action.run(&batch(), &ctx))
    }

    #[test]
    fn test_tag_action_calls_tag_op() {
        let session = StaticSession::new("us-east-1", "123456789012");
        let action = TagAction::from_params(&json!({"key": "owner", "value": "infra"})).unwrap();
        run_action(&action, &session, false).unwrap();

        let calls = session.calls_for("CreateTags");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0]["Resources"], json!(["i-1", "i-2"]));
        assert_eq!(calls[0]["Tags"][0]["Key"], "owner");
    }

    #[test]
    fn test_tag_action_tags_mapping() {
        let action =
            TagAction::from_params(&json!({"tags": {"env": "prod", "owner": "infra"}})).unwrap();
        let session = StaticSession::new("us-east-1", "123456789012");
        run_action(&action, &session, false).unwrap();
        assert_eq!(session.calls_for("CreateTags")[0]["Tags"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_dry_run_issues_no_calls() {
        let session = StaticSession::new("us-east-1", "123456789012");
        let tag = TagAction::from_params(&json!({"key": "a", "value": "b"})).unwrap();
        let remove = RemoveTagAction::from_params(&json!({"tags": ["a"]})).unwrap();
        let mark = MarkForOpAction::from_params(&json!({"op": "stop", "days": 4})).unwrap();

        run_action(&tag, &session, true).unwrap();
        run_action(&remove, &session, true).unwrap();
        run_action(&mark, &session, true).unwrap();
        assert_eq!(session.call_count(), 0);
    }

    #[test]
    fn test_remove_tag_calls_untag_op() {
        let session = StaticSession::new("us-east-1", "123456789012");
        let action = RemoveTagAction::from_params(&json!({"tags": ["env"]})).unwrap();
        run_action(&action, &session, false).unwrap();
        assert_eq!(session.calls_for("DeleteTags")[0]["Keys"], json!(["env"]));
    }

    #[test]
    fn test_mark_for_op_encodes_marker() {
        let session = StaticSession::new("us-east-1", "123456789012");
        let action = MarkForOpAction::from_params(&json!({"op": "stop", "days": 4})).unwrap();
        run_action(&action, &session, false).unwrap();

        let tag = &session.calls_for("CreateTags")[0]["Tags"][0];
        assert_eq!(tag["Key"], DEFAULT_MARK_TAG);
        let marker = Marker::decode(tag["Value"].as_str().unwrap()).unwrap();
        assert_eq!(marker.op, "stop");
        assert_eq!(marker.date.to_tag_date(), "2023/03/05");
    }

    #[test]
    fn test_notify_hands_payload_to_transport() {
        use std::sync::Mutex;

        #[derive(Default)]
        struct Capture(Mutex<Vec<Value>>);

        #[async_trait]
        impl MessageTransport for Capture {
            async fn publish(&self, payload: &Value) -> Result<()> {
                self.0.lock().expect("capture lock").push(payload.clone());
                Ok(())
            }
        }

        let transport = Arc::new(Capture::default());
        let action = NotifyAction::from_params(
            &json!({"type": "notify", "to": ["ops@example.com"], "subject": "open groups"}),
            transport.clone(),
        )
        .unwrap();

        let session = StaticSession::new("us-east-1", "123456789012");
        run_action(&action, &session, false).unwrap();
        assert_eq!(session.call_count(), 0);

        let sent = transport.0.lock().expect("capture lock").clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["policy"], "test-policy");
        assert_eq!(sent[0]["resources"], json!(["i-1", "i-2"]));
        assert_eq!(sent[0]["params"]["subject"], "open groups");
    }

    #[test]
    fn test_invalid_params_rejected() {
        assert!(TagAction::from_params(&json!({})).is_err());
        assert!(RemoveTagAction::from_params(&json!({"tags": []})).is_err());
        assert!(MarkForOpAction::from_params(&json!({"days": 4})).is_err());
        assert!(MarkForOpAction::from_params(&json!({"op": "stop", "days": -1})).is_err());
        assert!(
            NotifyAction::from_params(&json!({"to": []}), Arc::new(LogTransport)).is_err()
        );
    }

    #[test]
    fn test_registry_has_builtins() {
        let registry = ActionRegistry::new("action");
        register_builtin_actions(&registry, Arc::new(LogTransport)).unwrap();
        assert_eq!(
            registry.names(),
            vec!["mark-for-op", "notify", "remove-tag", "tag"]
        );
    }
}
