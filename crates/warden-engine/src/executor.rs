//! Bounded-concurrency action dispatch.
//!
//! The executor partitions the filtered set into batches, runs them on a
//! fixed-size worker pool, and aggregates per-resource outcomes. Batches
//! are independent; one failing never cancels its siblings. The aggregated
//! report is stable because outcomes carry ids and are sorted before they
//! leave the executor.

use futures_util::{StreamExt, stream};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use warden_core::{ErrorKind, Resource};
use warden_provider::RetryPolicy;

use crate::actions::{Action, ActionContext};

/// Extra time a policy deadline is allowed to overrun before dispatch is
/// cut off.
pub const DEADLINE_GRACE: Duration = Duration::from_secs(5);

/// Per-run execution settings.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Upper bound on per-batch resource count.
    pub batch_size: usize,
    /// Worker pool size for batches within one action.
    pub workers: usize,
    /// Timeout around each provider-touching batch.
    pub call_timeout: Duration,
    /// Overall policy deadline, if any.
    pub deadline: Option<Duration>,
    pub dry_run: bool,
    pub retry: RetryPolicy,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            workers: 3,
            call_timeout: Duration::from_secs(120),
            deadline: None,
            dry_run: false,
            retry: RetryPolicy::default(),
        }
    }
}

/// One resource that an action failed on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionFailure {
    pub id: String,
    pub error_kind: ErrorKind,
    pub message: String,
}

/// Aggregated outcome of one action over the whole filtered set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub succeeded: Vec<String>,
    pub failed: Vec<ActionFailure>,
}

impl BatchOutcome {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn normalize(&mut self) {
        self.succeeded.sort();
        self.failed.sort_by(|a, b| a.id.cmp(&b.id));
    }
}

/// Runs one action over a filtered resource set.
pub struct ActionExecutor {
    config: ExecutionConfig,
}

impl ActionExecutor {
    pub fn new(config: ExecutionConfig) -> Self {
        Self { config }
    }

    pub async fn run(
        &self,
        action: &dyn Action,
        resources: &[Resource],
        ctx: &ActionContext<'_>,
        deadline: Option<Instant>,
    ) -> BatchOutcome {
        let outcome = Arc::new(Mutex::new(BatchOutcome::default()));
        let batch_size = self.config.batch_size.max(1);
        let batches: Vec<Vec<Resource>> = resources
            .chunks(batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        debug!(
            action = action.name(),
            policy = ctx.policy,
            resources = resources.len(),
            batches = batches.len(),
            "dispatching action"
        );

        let dispatch = stream::iter(batches.into_iter().map(|batch| {
            let outcome = Arc::clone(&outcome);
            async move {
                let ids = ctx.ids(&batch);
                let result =
                    tokio::time::timeout(self.config.call_timeout, action.run(&batch, ctx)).await;
                let mut guard = outcome.lock().expect("outcome lock");
                match result {
                    Ok(Ok(())) => guard.succeeded.extend(ids),
                    Ok(Err(err)) => {
                        let kind = err.kind();
                        let message = err.to_string();
                        for id in ids {
                            guard.failed.push(ActionFailure {
                                id,
                                error_kind: kind,
                                message: message.clone(),
                            });
                        }
                    }
                    Err(_) => {
                        for id in ids {
                            guard.failed.push(ActionFailure {
                                id,
                                error_kind: ErrorKind::Timeout,
                                message: "action call timed out".to_string(),
                            });
                        }
                    }
                }
            }
        }))
        .buffer_unordered(self.config.workers.max(1))
        .collect::<Vec<()>>();

        match deadline {
            None => {
                dispatch.await;
            }
            Some(deadline) => {
                if tokio::time::timeout_at(deadline + DEADLINE_GRACE, dispatch)
                    .await
                    .is_err()
                {
                    // Whatever has no recorded outcome by the cutoff timed out.
                    let mut guard = outcome.lock().expect("outcome lock");
                    for resource in resources {
                        let Some(id) = resource.id(ctx.descriptor) else {
                            continue;
                        };
                        let seen = guard.succeeded.contains(&id)
                            || guard.failed.iter().any(|f| f.id == id);
                        if !seen {
                            guard.failed.push(ActionFailure {
                                id,
                                error_kind: ErrorKind::Timeout,
                                message: "policy deadline exceeded".to_string(),
                            });
                        }
                    }
                }
            }
        }

        let mut result = outcome.lock().expect("outcome lock").clone();
        result.normalize();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::TagAction;
    use async_trait::async_trait;
    use serde_json::json;
    use time::macros::datetime;
    use tokio_test::block_on;
    use warden_core::{CoreError, Result, ResourceTypeDef};
    use warden_provider::SessionError;
    use warden_provider::testing::StaticSession;

    fn vm_def() -> ResourceTypeDef {
        ResourceTypeDef::new("vm", "InstanceId").with_enumerate_op("DescribeInstances")
    }

    fn fleet(n: usize) -> Vec<Resource> {
        (0..n)
            .map(|i| Resource(json!({"InstanceId": format!("i-{i:02}")})))
            .collect()
    }

    fn context<'a>(
        session: &'a StaticSession,
        descriptor: &'a ResourceTypeDef,
        retry: &'a RetryPolicy,
        dry_run: bool,
    ) -> ActionContext<'a> {
        ActionContext {
            session,
            descriptor,
            retry,
            policy: "test-policy",
            dry_run,
            now: datetime!(2023-03-01 00:00:00 UTC),
        }
    }

    #[test]
    fn test_partitions_by_batch_size() {
        let session = StaticSession::new("us-east-1", "123456789012");
        let descriptor = vm_def();
        let retry = RetryPolicy::fast();
        let ctx = context(&session, &descriptor, &retry, false);
        let action = TagAction::from_params(&json!({"key": "a", "value": "b"})).unwrap();

        let executor = ActionExecutor::new(ExecutionConfig {
            batch_size: 3,
            ..ExecutionConfig::default()
        });
        let outcome = block_on(executor.run(&action, &fleet(7), &ctx, None));

        assert_eq!(outcome.succeeded.len(), 7);
        assert!(outcome.is_clean());
        // 7 resources in batches of 3 is three provider calls.
        assert_eq!(session.calls_for("CreateTags").len(), 3);
    }

    #[test]
    fn test_outcome_sorted_by_id() {
        let session = StaticSession::new("us-east-1", "123456789012");
        let descriptor = vm_def();
        let retry = RetryPolicy::fast();
        let ctx = context(&session, &descriptor, &retry, false);
        let action = TagAction::from_params(&json!({"key": "a", "value": "b"})).unwrap();

        let executor = ActionExecutor::new(ExecutionConfig {
            batch_size: 1,
            workers: 4,
            ..ExecutionConfig::default()
        });
        let outcome = block_on(executor.run(&action, &fleet(6), &ctx, None));
        let mut expected = outcome.succeeded.clone();
        expected.sort();
        assert_eq!(outcome.succeeded, expected);
    }

    #[test]
    fn test_failed_batch_does_not_cancel_siblings() {
        let session = StaticSession::new("us-east-1", "123456789012");
        session.fail_next("CreateTags", SessionError::Fatal("boom".into()));
        let descriptor = vm_def();
        let retry = RetryPolicy::fast();
        let ctx = context(&session, &descriptor, &retry, false);
        let action = TagAction::from_params(&json!({"key": "a", "value": "b"})).unwrap();

        // One worker keeps batch order deterministic for the scripted failure.
        let executor = ActionExecutor::new(ExecutionConfig {
            batch_size: 2,
            workers: 1,
            ..ExecutionConfig::default()
        });
        let outcome = block_on(executor.run(&action, &fleet(6), &ctx, None));

        assert_eq!(outcome.failed.len(), 2);
        assert_eq!(outcome.succeeded.len(), 4);
        assert_eq!(outcome.failed[0].error_kind, ErrorKind::Fatal);
        assert_eq!(outcome.failed[0].id, "i-00");
    }

    struct StallingAction;

    #[async_trait]
    impl Action for StallingAction {
        fn name(&self) -> &str {
            "stall"
        }

        async fn run(&self, _batch: &[Resource], _ctx: &ActionContext<'_>) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(CoreError::fatal("unreachable"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_call_timeout() {
        let session = StaticSession::new("us-east-1", "123456789012");
        let descriptor = vm_def();
        let retry = RetryPolicy::fast();
        let ctx = context(&session, &descriptor, &retry, false);

        let executor = ActionExecutor::new(ExecutionConfig {
            call_timeout: Duration::from_secs(1),
            ..ExecutionConfig::default()
        });
        let outcome = executor.run(&StallingAction, &fleet(2), &ctx, None).await;

        assert!(outcome.succeeded.is_empty());
        assert_eq!(outcome.failed.len(), 2);
        assert_eq!(outcome.failed[0].error_kind, ErrorKind::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_marks_remaining_as_timeout() {
        let session = StaticSession::new("us-east-1", "123456789012");
        let descriptor = vm_def();
        let retry = RetryPolicy::fast();
        let ctx = context(&session, &descriptor, &retry, false);

        let executor = ActionExecutor::new(ExecutionConfig {
            batch_size: 1,
            workers: 1,
            call_timeout: Duration::from_secs(7200),
            ..ExecutionConfig::default()
        });
        let deadline = Instant::now() + Duration::from_secs(1);
        let outcome = executor
            .run(&StallingAction, &fleet(3), &ctx, Some(deadline))
            .await;

        assert_eq!(outcome.failed.len(), 3);
        assert!(
            outcome
                .failed
                .iter()
                .all(|f| f.error_kind == ErrorKind::Timeout)
        );
    }
}
