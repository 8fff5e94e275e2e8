//! Structured per-policy run reports.

use serde::Serialize;
use serde_json::Value;

use warden_core::{ErrorKind, PathExpr, Resource, ResourceTypeDef};

use crate::executor::BatchOutcome;
use crate::runner::RunState;

/// Stage names as they appear in failure summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validate,
    Enumerate,
    Filter,
    Act,
}

/// What went wrong, and where, when a policy fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportError {
    pub stage: Stage,
    pub error_kind: ErrorKind,
    pub message: String,
    /// Set for `Forbidden` failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission: Option<String>,
}

/// Outcome of one action in the policy's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionReport {
    pub action: String,
    #[serde(flatten)]
    pub outcome: BatchOutcome,
}

/// The run summary a policy emits.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyReport {
    pub policy: String,
    pub resource_type: String,
    pub state: RunState,
    pub matched: usize,
    pub resource_ids: Vec<String>,
    /// Matched resources projected through the type's report fields.
    pub rows: Vec<Vec<Value>>,
    pub actions: Vec<ActionReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ReportError>,
}

impl PolicyReport {
    pub fn new(policy: &str, resource_type: &str) -> Self {
        Self {
            policy: policy.to_string(),
            resource_type: resource_type.to_string(),
            state: RunState::Loaded,
            matched: 0,
            resource_ids: Vec::new(),
            rows: Vec::new(),
            actions: Vec::new(),
            error: None,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }

    /// True when every action outcome is clean.
    pub fn actions_clean(&self) -> bool {
        self.actions.iter().all(|a| a.outcome.is_clean())
    }
}

/// Project matched resources through `default_report_fields`.
///
/// Fields that do not resolve on a resource become nulls so rows stay
/// rectangular.
pub fn report_rows(descriptor: &ResourceTypeDef, resources: &[Resource]) -> Vec<Vec<Value>> {
    let fields: Vec<PathExpr> = descriptor
        .default_report_fields
        .iter()
        .filter_map(|f| PathExpr::parse(f).ok())
        .collect();
    resources
        .iter()
        .map(|r| {
            fields
                .iter()
                .map(|f| {
                    f.project(&r.0)
                        .into_values()
                        .into_iter()
                        .next()
                        .unwrap_or(Value::Null)
                })
                .collect()
        })
        .collect()
}
