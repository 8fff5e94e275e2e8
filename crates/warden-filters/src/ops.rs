//! Comparison operators for value filters.
//!
//! The left operand is always the projected resource value, the right is
//! the filter's `value` parameter. Scalar right operands are coerced to
//! single-element sets for the membership and set operators (`in`, `ni`,
//! `intersect`, `difference`) only; ordered comparators never coerce.

use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use tracing::debug;

/// Element-wise semantics when the projected value is a list and the
/// operator is a scalar comparator. Chosen with the `any-` / `all-` op
/// prefix; ANY is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListSemantics {
    #[default]
    Any,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Contains,
    Glob,
    Regex,
    RegexCase,
    Intersect,
    Difference,
}

impl CmpOp {
    /// Parse an op name, peeling an optional `any-` / `all-` prefix.
    pub fn parse(name: &str) -> Option<(Self, ListSemantics)> {
        let (semantics, bare) = if let Some(rest) = name.strip_prefix("any-") {
            (ListSemantics::Any, rest)
        } else if let Some(rest) = name.strip_prefix("all-") {
            (ListSemantics::All, rest)
        } else {
            (ListSemantics::Any, name)
        };

        let op = match bare {
            "eq" | "equal" => Self::Eq,
            "ne" | "not-equal" => Self::Ne,
            "lt" | "less-than" => Self::Lt,
            "le" | "lte" => Self::Le,
            "gt" | "greater-than" => Self::Gt,
            "ge" | "gte" => Self::Ge,
            "in" => Self::In,
            "ni" | "not-in" => Self::NotIn,
            "contains" => Self::Contains,
            "glob" => Self::Glob,
            "regex" => Self::Regex,
            "regex-case" => Self::RegexCase,
            "intersect" => Self::Intersect,
            "difference" => Self::Difference,
            _ => return None,
        };
        Some((op, semantics))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::In => "in",
            Self::NotIn => "ni",
            Self::Contains => "contains",
            Self::Glob => "glob",
            Self::Regex => "regex",
            Self::RegexCase => "regex-case",
            Self::Intersect => "intersect",
            Self::Difference => "difference",
        }
    }

    /// All accepted op names, for schema assembly.
    pub fn names() -> Vec<String> {
        const BARE: [&str; 14] = [
            "eq",
            "ne",
            "lt",
            "le",
            "gt",
            "ge",
            "in",
            "ni",
            "contains",
            "glob",
            "regex",
            "regex-case",
            "intersect",
            "difference",
        ];
        let mut names = Vec::with_capacity(BARE.len() * 3);
        for op in BARE {
            names.push(op.to_string());
            names.push(format!("any-{op}"));
            names.push(format!("all-{op}"));
        }
        names
    }

    /// Operators that consume the projected list as a whole rather than
    /// element-wise.
    pub fn is_list_op(&self) -> bool {
        matches!(self, Self::Contains | Self::Intersect | Self::Difference)
    }

    pub fn apply(&self, left: &Value, right: &Value) -> bool {
        match self {
            Self::Eq => value_eq(left, right),
            Self::Ne => !value_eq(left, right),
            Self::Lt => matches!(ord(left, right), Some(Ordering::Less)),
            Self::Le => matches!(ord(left, right), Some(Ordering::Less | Ordering::Equal)),
            Self::Gt => matches!(ord(left, right), Some(Ordering::Greater)),
            Self::Ge => matches!(ord(left, right), Some(Ordering::Greater | Ordering::Equal)),
            Self::In => as_set(right).iter().any(|r| value_eq(left, r)),
            Self::NotIn => !as_set(right).iter().any(|r| value_eq(left, r)),
            Self::Contains => contains(left, right),
            Self::Glob => glob_match(left, right),
            Self::Regex => regex_match(left, right, true),
            Self::RegexCase => regex_match(left, right, false),
            Self::Intersect => {
                let rs = as_set(right);
                as_set(left).iter().any(|l| rs.iter().any(|r| value_eq(l, r)))
            }
            Self::Difference => {
                let rs = as_set(right);
                as_set(left).iter().any(|l| !rs.iter().any(|r| value_eq(l, r)))
            }
        }
    }
}

/// Equality with numeric cross-type comparison (`1 == 1.0`).
pub fn value_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Ordering over numbers and strings; anything else is unordered.
fn ord(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
        return Some(x.cmp(y));
    }
    None
}

/// A scalar on either side of a set operator acts as a one-element set.
fn as_set(v: &Value) -> Vec<Value> {
    match v {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

fn contains(left: &Value, right: &Value) -> bool {
    match left {
        Value::Array(items) => items.iter().any(|i| value_eq(i, right)),
        Value::String(s) => match right {
            Value::String(needle) => s.contains(needle.as_str()),
            Value::Number(n) => s.contains(&n.to_string()),
            _ => false,
        },
        _ => false,
    }
}

fn glob_match(left: &Value, pattern: &Value) -> bool {
    let (Some(s), Some(pat)) = (left.as_str(), pattern.as_str()) else {
        return false;
    };
    match Regex::new(&glob_to_regex(pat)) {
        Ok(re) => re.is_match(s),
        Err(e) => {
            debug!(pattern = pat, error = %e, "glob pattern did not compile");
            false
        }
    }
}

/// Translate a shell glob into an anchored regex.
pub fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

fn regex_match(left: &Value, pattern: &Value, case_insensitive: bool) -> bool {
    let (Some(s), Some(pat)) = (left.as_str(), pattern.as_str()) else {
        return false;
    };
    let full = if case_insensitive {
        format!("(?i){pat}")
    } else {
        pat.to_string()
    };
    match Regex::new(&full) {
        Ok(re) => re.is_match(s),
        Err(e) => {
            debug!(pattern = pat, error = %e, "regex did not compile");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_with_prefixes() {
        assert_eq!(CmpOp::parse("eq"), Some((CmpOp::Eq, ListSemantics::Any)));
        assert_eq!(
            CmpOp::parse("all-eq"),
            Some((CmpOp::Eq, ListSemantics::All))
        );
        assert_eq!(
            CmpOp::parse("any-regex"),
            Some((CmpOp::Regex, ListSemantics::Any))
        );
        assert_eq!(CmpOp::parse("not-in"), Some((CmpOp::NotIn, ListSemantics::Any)));
        assert!(CmpOp::parse("unknown").is_none());
    }

    #[test]
    fn test_numeric_equality_across_types() {
        assert!(CmpOp::Eq.apply(&json!(1), &json!(1.0)));
        assert!(CmpOp::Ne.apply(&json!(1), &json!(2)));
        assert!(CmpOp::Eq.apply(&json!("a"), &json!("a")));
        assert!(!CmpOp::Eq.apply(&json!("1"), &json!(1)));
    }

    #[test]
    fn test_ordered_comparisons() {
        assert!(CmpOp::Lt.apply(&json!(1), &json!(2)));
        assert!(CmpOp::Ge.apply(&json!(2.5), &json!(2.5)));
        assert!(CmpOp::Gt.apply(&json!("b"), &json!("a")));
        // Mixed types are unordered.
        assert!(!CmpOp::Lt.apply(&json!("1"), &json!(2)));
        assert!(!CmpOp::Gt.apply(&json!(null), &json!(2)));
    }

    #[test]
    fn test_membership() {
        assert!(CmpOp::In.apply(&json!("b"), &json!(["a", "b"])));
        assert!(CmpOp::NotIn.apply(&json!("c"), &json!(["a", "b"])));
        // Scalar right coerces to a one-element set.
        assert!(CmpOp::In.apply(&json!("a"), &json!("a")));
    }

    #[test]
    fn test_contains() {
        assert!(CmpOp::Contains.apply(&json!(["a", "b"]), &json!("a")));
        assert!(CmpOp::Contains.apply(&json!("production"), &json!("prod")));
        assert!(!CmpOp::Contains.apply(&json!(["a"]), &json!("b")));
        assert!(CmpOp::Contains.apply(&json!("port 8080"), &json!(8080)));
    }

    #[test]
    fn test_glob() {
        assert!(CmpOp::Glob.apply(&json!("web-prod-1"), &json!("web-*")));
        assert!(CmpOp::Glob.apply(&json!("i-abc"), &json!("i-???")));
        assert!(!CmpOp::Glob.apply(&json!("db-prod"), &json!("web-*")));
        // Regex metacharacters in the glob are literal.
        assert!(CmpOp::Glob.apply(&json!("a.b"), &json!("a.b")));
        assert!(!CmpOp::Glob.apply(&json!("axb"), &json!("a.b")));
    }

    #[test]
    fn test_regex_case_handling() {
        assert!(CmpOp::Regex.apply(&json!("Running"), &json!("^running$")));
        assert!(!CmpOp::RegexCase.apply(&json!("Running"), &json!("^running$")));
        assert!(CmpOp::RegexCase.apply(&json!("Running"), &json!("^Running$")));
    }

    #[test]
    fn test_invalid_regex_is_false() {
        assert!(!CmpOp::Regex.apply(&json!("x"), &json!("[")));
    }

    #[test]
    fn test_intersect_and_difference() {
        assert!(CmpOp::Intersect.apply(&json!(["a", "b"]), &json!(["b", "c"])));
        assert!(!CmpOp::Intersect.apply(&json!(["a"]), &json!(["b"])));
        assert!(CmpOp::Difference.apply(&json!(["a", "b"]), &json!(["b"])));
        assert!(!CmpOp::Difference.apply(&json!(["b"]), &json!(["a", "b"])));
        // Scalars coerce to one-element sets.
        assert!(CmpOp::Intersect.apply(&json!("a"), &json!(["a"])));
    }

    #[test]
    fn test_names_cover_prefixes() {
        let names = CmpOp::names();
        assert!(names.contains(&"eq".to_string()));
        assert!(names.contains(&"all-contains".to_string()));
        assert!(names.contains(&"any-ni".to_string()));
    }
}
