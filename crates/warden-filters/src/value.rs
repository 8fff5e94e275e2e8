//! The built-in `value` filter: path projection, operator, coercion.

use serde_json::{Value, json};
use time::{Duration, OffsetDateTime};

use warden_core::{CoreError, PathExpr, Projected, Resource, Result};

use crate::coerce::{self, Coercion};
use crate::ops::{CmpOp, ListSemantics};

/// Evaluation-time inputs shared by every filter in a run.
///
/// The clock is injected so `age`/`expiration` comparisons and marker-date
/// checks are deterministic under test.
#[derive(Debug, Clone, Copy)]
pub struct FilterContext {
    pub now: OffsetDateTime,
}

impl FilterContext {
    pub fn new() -> Self {
        Self {
            now: OffsetDateTime::now_utc(),
        }
    }

    pub fn at(now: OffsetDateTime) -> Self {
        Self { now }
    }
}

impl Default for FilterContext {
    fn default() -> Self {
        Self::new()
    }
}

/// `{type: value, key, op, value, value_type?, default?}`.
///
/// Projection never fails on a single resource; an unresolvable path is the
/// `absent` sentinel and only the presence operators can match it.
#[derive(Debug, Clone)]
pub struct ValueFilter {
    key: PathExpr,
    op: CmpOp,
    semantics: ListSemantics,
    value: Option<Value>,
    value_type: Option<Coercion>,
    default: Option<Value>,
}

impl ValueFilter {
    /// Build from the parameter mapping of a `type: value` node.
    pub fn from_params(params: &Value) -> Result<Self> {
        let obj = params
            .as_object()
            .ok_or_else(|| CoreError::schema_at("", "value filter must be a mapping"))?;

        if obj.contains_key("value_from") {
            let reason = if obj.contains_key("value") {
                "value and value_from are mutually exclusive"
            } else {
                "value_from requires an external data source, which is not configured"
            };
            return Err(CoreError::schema_at("value_from", reason));
        }

        let key_raw = obj
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::schema_at("key", "value filter requires a string key"))?;
        let key = PathExpr::parse(key_raw)?;

        let (op, semantics) = match obj.get("op") {
            None => (CmpOp::Eq, ListSemantics::Any),
            Some(v) => {
                let name = v
                    .as_str()
                    .ok_or_else(|| CoreError::schema_at("op", "op must be a string"))?;
                CmpOp::parse(name).ok_or_else(|| {
                    CoreError::schema_at("op", format!("unknown operator {name:?}"))
                })?
            }
        };

        let value_type = match obj.get("value_type") {
            None => None,
            Some(v) => {
                let name = v
                    .as_str()
                    .ok_or_else(|| CoreError::schema_at("value_type", "must be a string"))?;
                Some(Coercion::parse(name).ok_or_else(|| {
                    CoreError::schema_at("value_type", format!("unknown coercion {name:?}"))
                })?)
            }
        };

        let filter = Self {
            key,
            op,
            semantics,
            value: obj.get("value").cloned(),
            value_type,
            default: obj.get("default").cloned(),
        };
        filter.validate()?;
        Ok(filter)
    }

    /// Shorthand form `{"<path>": <value>}`.
    pub fn shorthand(path: &str, value: Value) -> Result<Self> {
        Ok(Self {
            key: PathExpr::parse(path)?,
            op: CmpOp::Eq,
            semantics: ListSemantics::Any,
            value: Some(value),
            value_type: None,
            default: None,
        })
    }

    /// Load-time checks beyond what the structural schema can express.
    fn validate(&self) -> Result<()> {
        match self.op {
            CmpOp::Regex | CmpOp::RegexCase | CmpOp::Glob => {
                let Some(pat) = self.value.as_ref().and_then(Value::as_str) else {
                    return Err(CoreError::schema_at(
                        "value",
                        format!("{} requires a string pattern", self.op.as_str()),
                    ));
                };
                let source = if self.op == CmpOp::Glob {
                    crate::ops::glob_to_regex(pat)
                } else {
                    pat.to_string()
                };
                regex::Regex::new(&source).map_err(|e| {
                    CoreError::schema_at("value", format!("pattern does not compile: {e}"))
                })?;
            }
            _ => {}
        }

        // A swapped comparison with a list literal on the right is ambiguous.
        if self.value_type == Some(Coercion::Swap)
            && matches!(self.value, Some(Value::Array(_)))
        {
            return Err(CoreError::schema_at(
                "value_type",
                "swap cannot be used with a list value",
            ));
        }
        Ok(())
    }

    pub fn key(&self) -> &PathExpr {
        &self.key
    }

    pub fn matches(&self, resource: &Resource, ctx: &FilterContext) -> bool {
        let projected = self.key.project(&resource.0);

        if let Some(result) = self.sentinel_result(&projected) {
            return result;
        }

        let projected = match (projected, &self.default) {
            (Projected::Absent, Some(d)) => Projected::One(d.clone()),
            (p, _) => p,
        };
        if projected.is_absent() {
            return false;
        }

        // Bare key (no value): presence check, already satisfied.
        let Some(right) = self.value.clone() else {
            return true;
        };

        self.apply_semantics(projected, &right, ctx)
    }

    /// Presence sentinels: `eq`/`ne` against `absent`/`present`/`not-null`.
    fn sentinel_result(&self, projected: &Projected) -> Option<bool> {
        if !matches!(self.op, CmpOp::Eq | CmpOp::Ne) {
            return None;
        }
        let truth = match self.value.as_ref()?.as_str()? {
            "absent" => projected.is_absent(),
            "present" => !projected.is_absent(),
            "not-null" => match projected {
                Projected::Absent => false,
                Projected::One(v) => !v.is_null(),
                Projected::Many(vs) => vs.iter().any(|v| !v.is_null()),
            },
            _ => return None,
        };
        Some(if self.op == CmpOp::Ne { !truth } else { truth })
    }

    /// Element-wise ANY/ALL over projected lists, whole-list for the list
    /// operators, scalar otherwise.
    fn apply_semantics(&self, projected: Projected, right: &Value, ctx: &FilterContext) -> bool {
        if self.op.is_list_op() {
            let whole = match projected {
                Projected::Absent => return false,
                Projected::One(v) => v,
                Projected::Many(vs) => Value::Array(vs),
            };
            return self.compare(&whole, right, ctx);
        }

        let elements = match projected {
            Projected::Absent => return false,
            Projected::One(Value::Array(items)) => items,
            Projected::Many(items) => items,
            Projected::One(v) => return self.compare(&v, right, ctx),
        };
        match self.semantics {
            ListSemantics::Any => elements.iter().any(|l| self.compare(l, right, ctx)),
            ListSemantics::All => {
                !elements.is_empty() && elements.iter().all(|l| self.compare(l, right, ctx))
            }
        }
    }

    /// One comparison with the configured coercion applied.
    fn compare(&self, left: &Value, right: &Value, ctx: &FilterContext) -> bool {
        match self.value_type {
            None => self.op.apply(left, right),
            Some(Coercion::Swap) => self.op.apply(right, left),
            Some(Coercion::Normalize) => self
                .op
                .apply(&coerce::normalize(left), &coerce::normalize(right)),
            Some(Coercion::Integer) => {
                match (coerce::to_integer(left), coerce::to_integer(right)) {
                    (Some(l), Some(r)) => self.op.apply(&json!(l), &json!(r)),
                    _ => false,
                }
            }
            Some(Coercion::Size) => match (coerce::parse_size(left), coerce::parse_size(right)) {
                (Some(l), Some(r)) => self.op.apply(&json!(l), &json!(r)),
                _ => false,
            },
            Some(Coercion::Age) => {
                let Some(ts) = coerce::to_timestamp(left) else {
                    return false;
                };
                self.op.apply(&json!(ts.age_days(ctx.now)), right)
            }
            Some(Coercion::Expiration) => {
                let (Some(ts), Some(days)) = (coerce::to_timestamp(left), right.as_f64()) else {
                    return false;
                };
                let threshold = ctx.now + Duration::seconds((days * 86_400.0) as i64);
                self.op
                    .apply(&json!(ts.unix()), &json!(threshold.unix_timestamp()))
            }
            Some(Coercion::Date) => {
                match (coerce::to_timestamp(left), coerce::to_timestamp(right)) {
                    (Some(l), Some(r)) => self.op.apply(&json!(l.unix()), &json!(r.unix())),
                    _ => false,
                }
            }
            Some(Coercion::Cidr) => cidr_compare(self.op, left, right),
            Some(Coercion::CidrSize) => {
                let Some(net) = coerce::parse_cidr(left) else {
                    return false;
                };
                self.op.apply(&json!(net.prefix()), right)
            }
        }
    }
}

/// CIDR membership semantics: `in`/`ni` test whether any right block covers
/// the left one, `contains` tests the reverse, `eq`/`ne` compare blocks.
fn cidr_compare(op: CmpOp, left: &Value, right: &Value) -> bool {
    let Some(l) = coerce::parse_cidr(left) else {
        return false;
    };
    let rights: Vec<Value> = match right {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    };
    let covered = rights
        .iter()
        .filter_map(coerce::parse_cidr)
        .any(|r| coerce::cidr_contains(&r, &l));
    match op {
        CmpOp::In => covered,
        CmpOp::NotIn => !covered,
        CmpOp::Contains => rights
            .iter()
            .filter_map(coerce::parse_cidr)
            .any(|r| coerce::cidr_contains(&l, &r)),
        CmpOp::Eq => rights.iter().filter_map(coerce::parse_cidr).any(|r| r == l),
        CmpOp::Ne => !rights.iter().filter_map(coerce::parse_cidr).any(|r| r == l),
        _ => false,
    }
}
