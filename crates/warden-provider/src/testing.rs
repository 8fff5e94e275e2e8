//! In-memory provider session for tests.
//!
//! Used across the workspace to exercise enumeration, caching and action
//! execution without a cloud behind them. Pages and call responses are
//! programmed up front; failures can be scripted per operation and the
//! session counts every list/call it receives.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::session::{Page, ProviderSession, SessionError};

#[derive(Debug, Default)]
pub struct StaticSession {
    region: String,
    account_id: String,
    pages: DashMap<String, Vec<Vec<Value>>>,
    responses: DashMap<String, Value>,
    failures: Mutex<std::collections::HashMap<String, VecDeque<SessionError>>>,
    list_calls: AtomicUsize,
    call_calls: AtomicUsize,
    call_log: Mutex<Vec<(String, Value)>>,
}

impl StaticSession {
    pub fn new(region: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            account_id: account_id.into(),
            ..Self::default()
        }
    }

    /// Program a multi-page listing for an operation.
    pub fn with_pages(self, op: impl Into<String>, pages: Vec<Vec<Value>>) -> Self {
        self.pages.insert(op.into(), pages);
        self
    }

    /// Program a single-page listing for an operation.
    pub fn with_items(self, op: impl Into<String>, items: Vec<Value>) -> Self {
        self.pages.insert(op.into(), vec![items]);
        self
    }

    /// Program the response for a `call` operation.
    pub fn with_response(self, op: impl Into<String>, response: Value) -> Self {
        self.responses.insert(op.into(), response);
        self
    }

    /// Script the next invocation of `op` (list or call) to fail.
    pub fn fail_next(&self, op: impl Into<String>, err: SessionError) {
        self.failures
            .lock()
            .expect("failure script lock")
            .entry(op.into())
            .or_default()
            .push_back(err);
    }

    /// Number of `list` invocations received (pages, not operations).
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of `call` invocations received.
    pub fn call_count(&self) -> usize {
        self.call_calls.load(Ordering::SeqCst)
    }

    /// Every `call` received, in order, with its parameters.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.call_log.lock().expect("call log lock").clone()
    }

    /// Calls received for one operation.
    pub fn calls_for(&self, op: &str) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|(name, _)| name == op)
            .map(|(_, params)| params)
            .collect()
    }

    fn take_scripted_failure(&self, op: &str) -> Option<SessionError> {
        self.failures
            .lock()
            .expect("failure script lock")
            .get_mut(op)
            .and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl ProviderSession for StaticSession {
    async fn list(
        &self,
        op: &str,
        _params: &Value,
        next_token: Option<&str>,
    ) -> Result<Page, SessionError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = self.take_scripted_failure(op) {
            return Err(err);
        }

        let pages = self
            .pages
            .get(op)
            .map(|p| p.value().clone())
            .unwrap_or_default();

        let index: usize = match next_token {
            None => 0,
            Some(token) => token
                .parse()
                .map_err(|_| SessionError::Fatal(format!("bad continuation token {token:?}")))?,
        };

        let items = pages.get(index).cloned().unwrap_or_default();
        let next = if index + 1 < pages.len() {
            Some((index + 1).to_string())
        } else {
            None
        };
        Ok(Page::new(items, next))
    }

    async fn call(&self, op: &str, params: &Value) -> Result<Value, SessionError> {
        self.call_calls.fetch_add(1, Ordering::SeqCst);
        self.call_log
            .lock()
            .expect("call log lock")
            .push((op.to_string(), params.clone()));

        if let Some(err) = self.take_scripted_failure(op) {
            return Err(err);
        }

        Ok(self
            .responses
            .get(op)
            .map(|r| r.value().clone())
            .unwrap_or_else(|| Value::Object(serde_json::Map::new())))
    }

    fn region(&self) -> &str {
        &self.region
    }

    fn account_id(&self) -> &str {
        &self.account_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::block_on;

    #[test]
    fn test_pagination_tokens() {
        let session = StaticSession::new("eu-west-1", "111111111111")
            .with_pages("List", vec![vec![json!(1)], vec![json!(2)]]);

        block_on(async {
            let first = session.list("List", &json!({}), None).await.unwrap();
            assert_eq!(first.items, vec![json!(1)]);
            assert_eq!(first.next_token.as_deref(), Some("1"));

            let second = session.list("List", &json!({}), Some("1")).await.unwrap();
            assert_eq!(second.items, vec![json!(2)]);
            assert!(second.is_last());
        });
    }

    #[test]
    fn test_unknown_op_lists_empty() {
        let session = StaticSession::new("eu-west-1", "111111111111");
        let page = block_on(session.list("Nope", &json!({}), None)).unwrap();
        assert!(page.items.is_empty());
        assert!(page.is_last());
    }

    #[test]
    fn test_call_logging() {
        let session = StaticSession::new("eu-west-1", "111111111111")
            .with_response("CreateTags", json!({"ok": true}));

        let response =
            block_on(session.call("CreateTags", &json!({"Resources": ["i-1"]}))).unwrap();
        assert_eq!(response["ok"], true);
        assert_eq!(session.call_count(), 1);
        assert_eq!(session.calls_for("CreateTags").len(), 1);
        assert_eq!(session.calls_for("DeleteTags").len(), 0);
    }

    #[test]
    fn test_scripted_failures_are_consumed_in_order() {
        let session = StaticSession::new("eu-west-1", "111111111111");
        session.fail_next("Op", SessionError::Throttled("first".into()));
        session.fail_next("Op", SessionError::Transient("second".into()));

        block_on(async {
            assert!(matches!(
                session.call("Op", &json!({})).await,
                Err(SessionError::Throttled(_))
            ));
            assert!(matches!(
                session.call("Op", &json!({})).await,
                Err(SessionError::Transient(_))
            ));
            assert!(session.call("Op", &json!({})).await.is_ok());
        });
    }
}
