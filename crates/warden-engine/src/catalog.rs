//! Resource type catalog.
//!
//! Registration is explicit and happens during startup; nothing registers
//! itself as an import side effect. Each resource type carries its own
//! filter and action registries, pre-populated with the universal plugins.

use std::sync::Arc;

use warden_core::{PluginRegistry, ResourceTypeDef, Result};
use warden_filters::{FilterRegistry, MarkedForOpFilter, RelatedFilter, RelatedSpec, filter_registry};

use crate::actions::{ActionRegistry, MessageTransport, register_builtin_actions};

/// One registered resource type: its descriptor plus the filters and
/// actions valid for it.
#[derive(Debug)]
pub struct ResourcePlugin {
    pub descriptor: ResourceTypeDef,
    pub filters: Arc<FilterRegistry>,
    pub actions: Arc<ActionRegistry>,
}

impl ResourcePlugin {
    /// A plugin with the universal filters and actions already registered.
    pub fn new(descriptor: ResourceTypeDef, transport: Arc<dyn MessageTransport>) -> Result<Self> {
        descriptor.validate()?;
        let filters = filter_registry("filter")?;
        filters.register("marked-for-op", MarkedForOpFilter::descriptor())?;
        let actions = ActionRegistry::new("action");
        register_builtin_actions(&actions, transport)?;
        Ok(Self {
            descriptor,
            filters: Arc::new(filters),
            actions: Arc::new(actions),
        })
    }
}

pub type ResourceRegistry = PluginRegistry<ResourcePlugin>;

/// Register the data-like resource types the engine ships with.
pub fn register_builtin(
    registry: &ResourceRegistry,
    transport: Arc<dyn MessageTransport>,
) -> Result<()> {
    let vm = ResourcePlugin::new(
        ResourceTypeDef::new("vm", "InstanceId")
            .with_name_key("tag:Name")
            .with_date_key("LaunchTime")
            .with_report_fields(&["InstanceId", "tag:Name", "State.Name", "LaunchTime"])
            .with_enumerate_op("DescribeInstances"),
        Arc::clone(&transport),
    )?;
    vm.filters.register(
        "security-group",
        RelatedFilter::descriptor(
            "security-group",
            RelatedSpec::new("security-group", "SecurityGroups[].GroupId", "GroupId"),
            &["sg:Describe"],
        ),
    )?;
    registry.register("vm", vm)?;

    registry.register(
        "security-group",
        ResourcePlugin::new(
            ResourceTypeDef::new("security-group", "GroupId")
                .with_name_key("GroupName")
                .with_report_fields(&["GroupId", "GroupName", "VpcId"])
                .with_enumerate_op("DescribeSecurityGroups"),
            Arc::clone(&transport),
        )?,
    )?;

    registry.register(
        "bucket",
        ResourcePlugin::new(
            ResourceTypeDef::new("bucket", "Name")
                .with_date_key("CreationDate")
                .with_report_fields(&["Name", "CreationDate"])
                .with_enumerate_op("ListBuckets")
                .with_augment_op("GetBucketTagging")
                .with_tag_ops("PutBucketTagging", "DeleteBucketTagging"),
            transport,
        )?,
    )?;

    Ok(())
}
