//! Per-resource-type managers: enumeration, augmentation, caching.
//!
//! A manager exists per (resource_type, account, region) tuple, created on
//! first reference through the run's [`ManagerTable`] and dropped with it.
//! The table also serves related filters: it is the run's
//! [`RelatedSource`], so related sets flow through the same cache.

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{StreamExt, stream};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use warden_cache::{CacheKey, SharedCache};
use warden_core::{CoreError, Resource, Result};
use warden_filters::RelatedSource;
use warden_provider::{ProviderSession, list_all, with_retry};

use crate::catalog::{ResourcePlugin, ResourceRegistry};
use crate::executor::ExecutionConfig;

/// Façade over one resource type in one account+region.
pub struct ResourceManager {
    plugin: Arc<ResourcePlugin>,
    session: Arc<dyn ProviderSession>,
    cache: SharedCache,
    config: ExecutionConfig,
}

impl ResourceManager {
    pub fn new(
        plugin: Arc<ResourcePlugin>,
        session: Arc<dyn ProviderSession>,
        cache: SharedCache,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            plugin,
            session,
            cache,
            config,
        }
    }

    pub fn plugin(&self) -> &ResourcePlugin {
        &self.plugin
    }

    pub fn session(&self) -> &dyn ProviderSession {
        self.session.as_ref()
    }

    fn cache_key(&self) -> CacheKey {
        CacheKey::new(
            &self.plugin.descriptor.type_name,
            self.session.account_id(),
            self.session.region(),
            json!({}),
        )
    }

    /// The cached-or-enumerated resource set, sorted by id.
    pub async fn resources(&self) -> Result<Vec<Resource>> {
        let descriptor = &self.plugin.descriptor;
        let key = self.cache_key();

        if let Some(values) = self.cache.load(&key) {
            debug!(
                resource_type = %descriptor.type_name,
                count = values.len(),
                "resource cache hit"
            );
            let mut resources: Vec<Resource> = values.into_iter().map(Resource::new).collect();
            self.sort(&mut resources);
            return Ok(resources);
        }

        let items = list_all(
            self.session.as_ref(),
            &self.config.retry,
            &descriptor.enumerate_op,
            &json!({}),
        )
        .await
        .map_err(CoreError::from)?;
        debug!(
            resource_type = %descriptor.type_name,
            count = items.len(),
            "enumerated resources"
        );

        let mut resources: Vec<Resource> = items.into_iter().map(Resource::new).collect();
        self.augment(&mut resources).await;

        let values: Vec<Value> = resources.iter().map(|r| r.0.clone()).collect();
        if let Err(err) = self.cache.store(&key, &values) {
            // The cache is an optimization; enumeration already succeeded.
            warn!(resource_type = %descriptor.type_name, error = %err, "cache store failed");
        }

        self.sort(&mut resources);
        Ok(resources)
    }

    /// Single-resource lookup for event-driven policies.
    pub async fn get_resource(&self, id: &str) -> Result<Option<Resource>> {
        let descriptor = &self.plugin.descriptor;
        Ok(self
            .resources()
            .await?
            .into_iter()
            .find(|r| r.id(descriptor).as_deref() == Some(id)))
    }

    fn sort(&self, resources: &mut [Resource]) {
        let descriptor = &self.plugin.descriptor;
        resources.sort_by_cached_key(|r| r.id(descriptor).unwrap_or_default());
    }

    /// Per-type augmentation hook: fetch additional attributes in parallel
    /// batches and merge them in by id. Partial failures are logged and
    /// enumeration continues.
    async fn augment(&self, resources: &mut [Resource]) {
        let descriptor = &self.plugin.descriptor;
        let Some(op) = descriptor.augment_op.as_deref() else {
            return;
        };

        let batch_size = self.config.batch_size.clamp(1, 20);
        let id_batches: Vec<Vec<String>> = resources
            .chunks(batch_size)
            .map(|chunk| chunk.iter().filter_map(|r| r.id(descriptor)).collect())
            .collect();

        let responses: Vec<std::result::Result<Value, _>> =
            stream::iter(id_batches.into_iter().map(|ids| async move {
                let params = json!({"Ids": ids});
                with_retry(&self.config.retry, op, || self.session.call(op, &params)).await
            }))
            .buffer_unordered(self.config.workers.max(1))
            .collect()
            .await;

        let mut by_id: HashMap<String, usize> = HashMap::new();
        for (i, r) in resources.iter().enumerate() {
            if let Some(id) = r.id(descriptor) {
                by_id.insert(id, i);
            }
        }

        for response in responses {
            let records = match response {
                Ok(value) => value
                    .get("Resources")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default(),
                Err(err) => {
                    warn!(
                        resource_type = %descriptor.type_name,
                        error = %err,
                        "augmentation batch failed, continuing"
                    );
                    continue;
                }
            };
            for record in records {
                let Some(id) = Resource::new(record.clone()).id(descriptor) else {
                    continue;
                };
                let Some(&slot) = by_id.get(&id) else {
                    continue;
                };
                merge_attributes(&mut resources[slot], &record);
            }
        }
    }
}

/// Shallow-merge augmentation attributes into the enumerated record.
fn merge_attributes(resource: &mut Resource, extra: &Value) {
    let (Some(target), Some(source)) = (resource.0.as_object_mut(), extra.as_object()) else {
        return;
    };
    for (k, v) in source {
        target.insert(k.clone(), v.clone());
    }
}

/// Run-scoped table of managers, created on first reference.
pub struct ManagerTable {
    registry: Arc<ResourceRegistry>,
    session: Arc<dyn ProviderSession>,
    cache: SharedCache,
    config: ExecutionConfig,
    managers: DashMap<String, Arc<ResourceManager>>,
}

impl ManagerTable {
    pub fn new(
        registry: Arc<ResourceRegistry>,
        session: Arc<dyn ProviderSession>,
        cache: SharedCache,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            registry,
            session,
            cache,
            config,
            managers: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn session(&self) -> &dyn ProviderSession {
        self.session.as_ref()
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn get(&self, resource_type: &str) -> Result<Arc<ResourceManager>> {
        if let Some(existing) = self.managers.get(resource_type) {
            return Ok(Arc::clone(existing.value()));
        }
        let plugin = self
            .registry
            .get(resource_type)
            .ok_or_else(|| CoreError::fatal(format!("unknown resource type {resource_type:?}")))?;
        let manager = Arc::new(ResourceManager::new(
            plugin,
            Arc::clone(&self.session),
            Arc::clone(&self.cache),
            self.config.clone(),
        ));
        self.managers
            .insert(resource_type.to_string(), Arc::clone(&manager));
        Ok(manager)
    }
}

#[async_trait]
impl RelatedSource for ManagerTable {
    async fn fetch_all(&self, resource_type: &str) -> Result<Vec<Resource>> {
        self.get(resource_type)?.resources().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::LogTransport;
    use crate::catalog::register_builtin;
    use tokio_test::block_on;
    use warden_cache::{MemoryCache, NoCache};
    use warden_provider::RetryPolicy;
    use warden_provider::testing::StaticSession;

    fn table(session: &Arc<StaticSession>, cache: SharedCache) -> ManagerTable {
        let registry = Arc::new(ResourceRegistry::new("resource"));
        register_builtin(&registry, Arc::new(LogTransport)).unwrap();
        let config = ExecutionConfig {
            retry: RetryPolicy::fast(),
            ..ExecutionConfig::default()
        };
        ManagerTable::new(registry, Arc::clone(session) as Arc<dyn ProviderSession>, cache, config)
    }

    #[test]
    fn test_enumeration_sorted_by_id() {
        let session = Arc::new(StaticSession::new("us-east-1", "123456789012").with_pages(
            "DescribeInstances",
            vec![
                vec![json!({"InstanceId": "i-2"}), json!({"InstanceId": "i-3"})],
                vec![json!({"InstanceId": "i-1"})],
            ],
        ));
        let table = table(&session, Arc::new(NoCache::new()));
        let manager = table.get("vm").unwrap();

        let resources = block_on(manager.resources()).unwrap();
        let ids: Vec<_> = resources
            .iter()
            .map(|r| r.id(&manager.plugin().descriptor).unwrap())
            .collect();
        assert_eq!(ids, vec!["i-1", "i-2", "i-3"]);
    }

    #[test]
    fn test_cache_hit_skips_enumeration() {
        let session = Arc::new(
            StaticSession::new("us-east-1", "123456789012")
                .with_items("DescribeInstances", vec![json!({"InstanceId": "i-1"})]),
        );
        let table = table(&session, Arc::new(MemoryCache::new()));
        let manager = table.get("vm").unwrap();

        block_on(manager.resources()).unwrap();
        block_on(manager.resources()).unwrap();
        // Second read is served from cache: one page listed in total.
        assert_eq!(session.list_calls(), 1);
    }

    #[test]
    fn test_get_resource_by_id() {
        let session = Arc::new(StaticSession::new("us-east-1", "123456789012").with_items(
            "DescribeInstances",
            vec![json!({"InstanceId": "i-1"}), json!({"InstanceId": "i-2"})],
        ));
        let table = table(&session, Arc::new(NoCache::new()));
        let manager = table.get("vm").unwrap();

        let found = block_on(manager.get_resource("i-2")).unwrap();
        assert!(found.is_some());
        assert!(block_on(manager.get_resource("i-9")).unwrap().is_none());
    }

    #[test]
    fn test_manager_created_once_per_type() {
        let session = Arc::new(StaticSession::new("us-east-1", "123456789012"));
        let table = table(&session, Arc::new(NoCache::new()));
        let a = table.get("vm").unwrap();
        let b = table.get("vm").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(table.get("database").is_err());
    }

    #[test]
    fn test_augmentation_merges_by_id() {
        let session = Arc::new(
            StaticSession::new("us-east-1", "123456789012")
                .with_items(
                    "ListBuckets",
                    vec![json!({"Name": "logs"}), json!({"Name": "assets"})],
                )
                .with_response(
                    "GetBucketTagging",
                    json!({"Resources": [
                        {"Name": "logs", "Tags": [{"Key": "env", "Value": "prod"}]}
                    ]}),
                ),
        );
        let table = table(&session, Arc::new(NoCache::new()));
        let manager = table.get("bucket").unwrap();

        let resources = block_on(manager.resources()).unwrap();
        let logs = resources.iter().find(|r| r.0["Name"] == "logs").unwrap();
        assert_eq!(logs.tag("env"), Some("prod"));
        // The other bucket is untouched by the partial augmentation response.
        let assets = resources.iter().find(|r| r.0["Name"] == "assets").unwrap();
        assert!(assets.tag("env").is_none());
    }

    #[test]
    fn test_augmentation_failure_is_partial() {
        let session = Arc::new(
            StaticSession::new("us-east-1", "123456789012")
                .with_items("ListBuckets", vec![json!({"Name": "logs"})]),
        );
        session.fail_next(
            "GetBucketTagging",
            warden_provider::SessionError::Fatal("denied".into()),
        );
        let table = table(&session, Arc::new(NoCache::new()));
        let manager = table.get("bucket").unwrap();

        // Enumeration still succeeds with unaugmented records.
        let resources = block_on(manager.resources()).unwrap();
        assert_eq!(resources.len(), 1);
    }

    #[test]
    fn test_related_source_goes_through_managers() {
        let session = Arc::new(
            StaticSession::new("us-east-1", "123456789012")
                .with_items("DescribeSecurityGroups", vec![json!({"GroupId": "sg-1"})]),
        );
        let table = table(&session, Arc::new(NoCache::new()));

        let related = block_on(table.fetch_all("security-group")).unwrap();
        assert_eq!(related.len(), 1);
    }
}
