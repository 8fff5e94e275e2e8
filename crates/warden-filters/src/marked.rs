//! Marker tag codec and the `marked-for-op` filter.
//!
//! The `mark-for-op` action writes a tag of the form
//! `"<message>: <op>@<YYYY/MM/DD>"`; this filter selects resources whose
//! marker names the op and whose date has come due.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::str::FromStr;
use std::sync::Arc;
use time::Duration;

use warden_core::{CoreError, Resource, Result, Timestamp};

use crate::node::{FilterDescriptor, TypedFilter};
use crate::value::FilterContext;

/// Tag key used by `mark-for-op` / `marked-for-op` unless overridden.
pub const DEFAULT_MARK_TAG: &str = "warden_status";

/// Decoded marker tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub message: String,
    pub op: String,
    pub date: Timestamp,
}

impl Marker {
    pub fn new(message: impl Into<String>, op: impl Into<String>, date: Timestamp) -> Self {
        Self {
            message: message.into(),
            op: op.into(),
            date,
        }
    }

    pub fn encode(&self) -> String {
        format!("{}: {}@{}", self.message, self.op, self.date.to_tag_date())
    }

    /// Decode a marker tag; anything malformed is `None`, never an error,
    /// since arbitrary tag values share the namespace.
    pub fn decode(tag: &str) -> Option<Self> {
        let (head, date_raw) = tag.rsplit_once('@')?;
        let (message, op) = head.rsplit_once(": ")?;
        if op.is_empty() {
            return None;
        }
        let date = Timestamp::from_str(date_raw).ok()?;
        Some(Self {
            message: message.to_string(),
            op: op.to_string(),
            date,
        })
    }
}

/// `{type: marked-for-op, op, tag?, skew?}`.
pub struct MarkedForOpFilter {
    tag: String,
    op: String,
    skew_days: i64,
}

impl MarkedForOpFilter {
    pub fn from_params(params: &Value) -> Result<Self> {
        let obj = params
            .as_object()
            .ok_or_else(|| CoreError::schema_at("", "marked-for-op must be a mapping"))?;
        let op = obj
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::schema_at("op", "marked-for-op requires an op name"))?
            .to_string();
        let tag = obj
            .get("tag")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_MARK_TAG)
            .to_string();
        let skew_days = match obj.get("skew") {
            None => 0,
            Some(v) => v
                .as_i64()
                .filter(|n| *n >= 0)
                .ok_or_else(|| CoreError::schema_at("skew", "skew must be a non-negative integer"))?,
        };
        Ok(Self { tag, op, skew_days })
    }

    pub fn descriptor() -> FilterDescriptor {
        FilterDescriptor::new(schema(), &[], |params| {
            Ok(Arc::new(MarkedForOpFilter::from_params(params)?) as Arc<dyn TypedFilter>)
        })
    }
}

#[async_trait]
impl TypedFilter for MarkedForOpFilter {
    fn name(&self) -> &str {
        "marked-for-op"
    }

    fn matches(&self, resource: &Resource, ctx: &FilterContext) -> bool {
        let Some(marker) = resource.tag(&self.tag).and_then(Marker::decode) else {
            return false;
        };
        if marker.op != self.op {
            return false;
        }
        // Due when the marked date is within `skew` days of the clock.
        marker.date.0 <= ctx.now + Duration::days(self.skew_days)
    }
}

fn schema() -> Value {
    json!({
        "type": "object",
        "required": ["type", "op"],
        "properties": {
            "type": {"enum": ["marked-for-op"]},
            "op": {"type": "string"},
            "tag": {"type": "string"},
            "skew": {"type": "integer", "minimum": 0}
        },
        "additionalProperties": false
    })
}
