//! Policy runner: the stage machine that takes a policy from document to
//! report.
//!
//! States advance monotonically; `skipped` and `failed` are terminal. A
//! fatal error aborts the policy it belongs to, and the outer loop carries
//! on with the next policy in the set.

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

use warden_core::{CoreError, Resource, Result, Timestamp};
use warden_filters::{FilterContext, FilterNode, FilterRegistry, filter_registry};
use warden_provider::ProviderSession;

use crate::actions::ActionContext;
use crate::executor::ActionExecutor;
use crate::manager::ManagerTable;
use crate::metrics::EngineMetrics;
use crate::policy::{Policy, PolicySet};
use crate::report::{ActionReport, PolicyReport, ReportError, Stage, report_rows};
use crate::schema::PolicyValidator;

/// Where a policy run currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Loaded,
    Validated,
    Conditioned,
    Enumerated,
    Filtered,
    Acted,
    Reported,
    Skipped,
    Failed,
}

pub struct PolicyRunner {
    table: Arc<ManagerTable>,
    validator: Arc<PolicyValidator>,
    metrics: Arc<EngineMetrics>,
}

impl PolicyRunner {
    pub fn new(
        table: Arc<ManagerTable>,
        validator: Arc<PolicyValidator>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            table,
            validator,
            metrics,
        }
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Run every policy in the set, in order. A failing policy never stops
    /// the ones after it.
    pub async fn run_set(&self, set: &PolicySet) -> Vec<PolicyReport> {
        let mut reports = Vec::with_capacity(set.len());
        for policy in &set.policies {
            let report = self.run_policy(policy).await;
            if report.is_failure() {
                self.metrics.record_policy_failure();
                warn!(
                    policy = %report.policy,
                    state = ?report.state,
                    "policy failed, continuing with next"
                );
            }
            reports.push(report);
        }
        reports
    }

    pub async fn run_policy(&self, policy: &Policy) -> PolicyReport {
        let mut report = PolicyReport::new(&policy.name, &policy.resource);
        let ctx = FilterContext::new();

        let doc = json!({"policies": [policy.to_value()]});
        if let Err(err) = self.validator.validate(&doc) {
            return fail(report, Stage::Validate, &err);
        }
        report.state = RunState::Validated;

        match self.conditions_hold(policy, &ctx) {
            Ok(true) => report.state = RunState::Conditioned,
            Ok(false) => {
                info!(policy = %policy.name, "conditions not met, skipping");
                report.state = RunState::Skipped;
                return report;
            }
            Err(err) => return fail(report, Stage::Validate, &err),
        }

        let manager = match self.table.get(&policy.resource) {
            Ok(manager) => manager,
            Err(err) => return fail(report, Stage::Enumerate, &err),
        };
        let resources = match manager.resources().await {
            Ok(resources) => resources,
            Err(err) => return fail(report, Stage::Enumerate, &err),
        };
        self.metrics.record_enumerated(resources.len());
        report.state = RunState::Enumerated;

        // Filters are compiled and evaluated exactly once per run; whatever
        // actions change afterwards does not re-trigger filtering.
        let matched = match self.filter(policy, &manager.plugin().filters, resources, &ctx).await
        {
            Ok(matched) => matched,
            Err(err) => return fail(report, Stage::Filter, &err),
        };
        self.metrics.record_matched(matched.len());
        report.state = RunState::Filtered;
        report.matched = matched.len();
        let descriptor = &manager.plugin().descriptor;
        report.resource_ids = matched
            .iter()
            .filter_map(|r| r.id(descriptor))
            .collect();
        report.rows = report_rows(descriptor, &matched);

        if !policy.actions.is_empty() && !matched.is_empty() {
            let config = self.table.config();
            let deadline = config.deadline.map(|d| Instant::now() + d);
            let executor = ActionExecutor::new(config.clone());
            let action_ctx = ActionContext {
                session: manager.session(),
                descriptor,
                retry: &config.retry,
                policy: &policy.name,
                dry_run: config.dry_run,
                now: ctx.now,
            };

            // Actions are strictly sequential: N+1 starts only after every
            // batch of N completed.
            for spec in &policy.actions {
                let name = spec
                    .get("type")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default();
                let action = match manager
                    .plugin()
                    .actions
                    .get(name)
                    .ok_or_else(|| CoreError::fatal(format!("unknown action {name:?}")))
                    .and_then(|d| d.construct(spec))
                {
                    Ok(action) => action,
                    Err(err) => return fail(report, Stage::Act, &err),
                };

                let outcome = executor
                    .run(action.as_ref(), &matched, &action_ctx, deadline)
                    .await;
                self.metrics
                    .record_action_outcomes(outcome.succeeded.len(), outcome.failed.len());
                report.actions.push(ActionReport {
                    action: name.to_string(),
                    outcome,
                });
            }
            report.state = RunState::Acted;
        }

        report.state = RunState::Reported;
        info!(
            policy = %policy.name,
            matched = report.matched,
            actions = report.actions.len(),
            "policy run complete"
        );
        report
    }

    async fn filter(
        &self,
        policy: &Policy,
        registry: &FilterRegistry,
        resources: Vec<Resource>,
        ctx: &FilterContext,
    ) -> Result<Vec<Resource>> {
        let node = FilterNode::parse(&policy.filters, registry)?;
        node.prepare(self.table.as_ref(), &resources).await?;
        Ok(resources
            .into_iter()
            .filter(|r| node.matches(r, ctx))
            .collect())
    }

    /// Conditions are value filters over a synthetic execution-context
    /// resource; the policy is skipped when any of them fails.
    fn conditions_hold(&self, policy: &Policy, ctx: &FilterContext) -> Result<bool> {
        if policy.conditions.is_empty() {
            return Ok(true);
        }
        let synthetic = execution_context(policy, self.table.session(), ctx);
        let registry = filter_registry("condition")?;
        for spec in &policy.conditions {
            let node = FilterNode::parse(spec, &registry)?;
            if !node.matches(&synthetic, ctx) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn execution_context(policy: &Policy, session: &dyn ProviderSession, ctx: &FilterContext) -> Resource {
    Resource(json!({
        "region": session.region(),
        "account_id": session.account_id(),
        "now": Timestamp::new(ctx.now).to_string(),
        "policy": policy.name,
    }))
}

fn fail(mut report: PolicyReport, stage: Stage, err: &CoreError) -> PolicyReport {
    report.state = RunState::Failed;
    report.error = Some(ReportError {
        stage,
        error_kind: err.kind(),
        message: err.to_string(),
        permission: err.permission().map(str::to_string),
    });
    report
}
