//! Policy evaluation pipeline.
//!
//! A policy document is validated against a composite schema assembled
//! from the resource catalog, then each policy runs through a fixed stage
//! sequence: conditions, enumeration, filtering, actions, report. The
//! runner owns the sequencing; managers own enumeration and caching; the
//! executor owns batched action dispatch.

pub mod actions;
pub mod catalog;
pub mod executor;
pub mod manager;
pub mod metrics;
pub mod policy;
pub mod report;
pub mod runner;
pub mod schema;

pub use actions::{
    Action, ActionContext, ActionDescriptor, ActionRegistry, LogTransport, MessageTransport,
};
pub use catalog::{ResourcePlugin, ResourceRegistry, register_builtin};
pub use executor::{ActionExecutor, ActionFailure, BatchOutcome, DEADLINE_GRACE, ExecutionConfig};
pub use manager::{ManagerTable, ResourceManager};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use policy::{Policy, PolicyMode, PolicySet};
pub use report::{ActionReport, PolicyReport, ReportError, Stage, report_rows};
pub use runner::{PolicyRunner, RunState};
pub use schema::PolicyValidator;
