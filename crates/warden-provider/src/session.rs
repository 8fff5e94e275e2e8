//! Provider session interface.
//!
//! The engine talks to cloud providers exclusively through
//! [`ProviderSession`]; SDK adapters implement it externally. List
//! operations are assumed idempotent, `call` may not be and is surfaced
//! as-is to actions. Sessions map provider failures onto [`SessionError`]
//! before they reach the core; the engine never parses provider error
//! strings.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use warden_core::{CoreError, ErrorKind};

use crate::retry::{RetryPolicy, with_retry};

/// One page of a paginated list operation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Page {
    pub items: Vec<Value>,
    /// Empty or missing token terminates pagination.
    pub next_token: Option<String>,
}

impl Page {
    pub fn new(items: Vec<Value>, next_token: Option<String>) -> Self {
        Self { items, next_token }
    }

    /// A final page with no continuation.
    pub fn last(items: Vec<Value>) -> Self {
        Self {
            items,
            next_token: None,
        }
    }

    pub fn is_last(&self) -> bool {
        match &self.next_token {
            None => true,
            Some(token) => token.is_empty(),
        }
    }
}

/// Normalized session-layer failure.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("throttled: {0}")]
    Throttled(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden ({permission}): {message}")]
    Forbidden { permission: String, message: String },

    #[error("{0}")]
    Fatal(String),
}

impl SessionError {
    pub fn forbidden(permission: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Forbidden {
            permission: permission.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Throttled(_) => ErrorKind::Throttled,
            Self::Transient(_) => ErrorKind::Transient,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::Fatal(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl From<SessionError> for CoreError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Throttled(m) => CoreError::Throttled(m),
            SessionError::Transient(m) => CoreError::Transient(m),
            SessionError::NotFound(m) => CoreError::NotFound(m),
            SessionError::Forbidden {
                permission,
                message,
            } => CoreError::forbidden(permission, message),
            SessionError::Fatal(m) => CoreError::fatal(m),
        }
    }
}

/// Credentialed access to one provider account+region.
///
/// Implementations must be thread-safe; the engine shares one session per
/// resource manager across its worker pool. Retry for throttling and 5xx
/// lives in the engine's use of [`with_retry`], not in implementations.
#[async_trait]
pub trait ProviderSession: Send + Sync {
    /// Fetch one page of a list operation.
    async fn list(
        &self,
        op: &str,
        params: &Value,
        next_token: Option<&str>,
    ) -> Result<Page, SessionError>;

    /// Invoke a (possibly mutating) provider operation.
    async fn call(&self, op: &str, params: &Value) -> Result<Value, SessionError>;

    fn region(&self) -> &str;

    fn account_id(&self) -> &str;
}

/// Drain a paginated list operation in page order.
pub async fn list_all(
    session: &dyn ProviderSession,
    policy: &RetryPolicy,
    op: &str,
    params: &Value,
) -> Result<Vec<Value>, SessionError> {
    let mut all = Vec::new();
    let mut token: Option<String> = None;

    loop {
        let page = with_retry(policy, op, || {
            session.list(op, params, token.as_deref())
        })
        .await?;
        let last = page.is_last();
        let Page { items, next_token } = page;
        all.extend(items);
        if last {
            break;
        }
        token = next_token;
    }

    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticSession;
    use serde_json::json;
    use tokio_test::block_on;

    #[test]
    fn test_page_is_last() {
        assert!(Page::last(vec![]).is_last());
        assert!(Page::new(vec![], Some(String::new())).is_last());
        assert!(!Page::new(vec![], Some("2".to_string())).is_last());
    }

    #[test]
    fn test_session_error_kinds() {
        assert_eq!(
            SessionError::Throttled("slow down".into()).kind(),
            ErrorKind::Throttled
        );
        assert!(SessionError::Transient("reset".into()).is_retryable());
        assert!(!SessionError::NotFound("gone".into()).is_retryable());

        let err = SessionError::forbidden("ec2:DescribeInstances", "denied");
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        let core: CoreError = err.into();
        assert_eq!(core.permission(), Some("ec2:DescribeInstances"));
    }

    #[test]
    fn test_list_all_concatenates_pages_in_order() {
        let session = StaticSession::new("us-east-1", "123456789012").with_pages(
            "DescribeInstances",
            vec![
                vec![json!({"InstanceId": "i-1"}), json!({"InstanceId": "i-2"})],
                vec![json!({"InstanceId": "i-3"})],
            ],
        );

        let items = block_on(list_all(
            &session,
            &RetryPolicy::fast(),
            "DescribeInstances",
            &json!({}),
        ))
        .unwrap();

        assert_eq!(items.len(), 3);
        assert_eq!(items[0]["InstanceId"], "i-1");
        assert_eq!(items[2]["InstanceId"], "i-3");
        assert_eq!(session.list_calls(), 2);
    }

    #[test]
    fn test_list_all_retries_throttling() {
        let session = StaticSession::new("us-east-1", "123456789012")
            .with_items("DescribeInstances", vec![json!({"InstanceId": "i-1"})]);
        session.fail_next(
            "DescribeInstances",
            SessionError::Throttled("rate exceeded".into()),
        );

        let items = block_on(list_all(
            &session,
            &RetryPolicy::fast(),
            "DescribeInstances",
            &json!({}),
        ))
        .unwrap();

        assert_eq!(items.len(), 1);
        // One throttled attempt plus the successful one.
        assert_eq!(session.list_calls(), 2);
    }

    #[test]
    fn test_list_all_surfaces_fatal_immediately() {
        let session = StaticSession::new("us-east-1", "123456789012")
            .with_items("DescribeInstances", vec![json!({"InstanceId": "i-1"})]);
        session.fail_next(
            "DescribeInstances",
            SessionError::forbidden("ec2:DescribeInstances", "denied"),
        );

        let err = block_on(list_all(
            &session,
            &RetryPolicy::fast(),
            "DescribeInstances",
            &json!({}),
        ))
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert_eq!(session.list_calls(), 1);
    }
}
