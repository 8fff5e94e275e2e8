//! Restricted JMESPath-style value projection.
//!
//! Filters address into a resource with a small path language rather than a
//! full query language:
//!
//! ```text
//! path     = segment ("." segment)*
//! segment  = identifier index*
//! index    = "[" digits "]"        ; element access
//!          / "[]"                  ; flatten-projection over an array
//! ```
//!
//! A whole-key `tag:Name` form resolves through the conventional
//! `Tags: [{Key, Value}]` array.
//!
//! Projection never fails on a single resource: a missing key, a type
//! mismatch, or an out-of-range index all yield [`Projected::Absent`].

use crate::error::{CoreError, Result};
use serde_json::Value;

/// One step of a parsed path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Object member access.
    Key(String),
    /// Array element access.
    Index(usize),
    /// Flatten-projection: fan out over array elements.
    Flatten,
    /// `tag:Name` sugar over the `Tags` array.
    Tag(String),
}

/// A parsed, reusable path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    raw: String,
    segments: Vec<Segment>,
}

/// Result of projecting a path over a resource.
#[derive(Debug, Clone, PartialEq)]
pub enum Projected {
    /// The path did not resolve to any value.
    Absent,
    /// The path resolved to exactly one value (which may itself be a list).
    One(Value),
    /// A flatten-projection fanned out to zero or more values.
    Many(Vec<Value>),
}

impl Projected {
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// All projected values, empty when absent.
    pub fn into_values(self) -> Vec<Value> {
        match self {
            Self::Absent => Vec::new(),
            Self::One(v) => vec![v],
            Self::Many(vs) => vs,
        }
    }
}

impl PathExpr {
    pub fn parse(input: &str) -> Result<Self> {
        if input.is_empty() {
            return Err(CoreError::invalid_path(input, "empty expression"));
        }

        // Whole-key tag sugar: "tag:Name".
        if let Some(name) = input.strip_prefix("tag:") {
            if name.is_empty() {
                return Err(CoreError::invalid_path(input, "empty tag name"));
            }
            return Ok(Self {
                raw: input.to_string(),
                segments: vec![Segment::Tag(name.to_string())],
            });
        }

        let mut segments = Vec::new();
        for part in input.split('.') {
            if part.is_empty() {
                return Err(CoreError::invalid_path(input, "empty segment"));
            }
            let (ident, indexes) = split_indexes(input, part)?;
            if ident.is_empty() {
                return Err(CoreError::invalid_path(input, "segment without a key"));
            }
            segments.push(Segment::Key(ident.to_string()));
            segments.extend(indexes);
        }

        Ok(Self {
            raw: input.to_string(),
            segments,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Project this path over a resource value.
    pub fn project(&self, root: &Value) -> Projected {
        let mut current: Vec<Value> = vec![root.clone()];
        let mut fanned = false;

        for segment in &self.segments {
            current = match segment {
                Segment::Key(key) => current
                    .iter()
                    .filter_map(|v| v.get(key.as_str()).cloned())
                    .collect(),
                Segment::Index(i) => current.iter().filter_map(|v| v.get(*i).cloned()).collect(),
                Segment::Flatten => {
                    fanned = true;
                    current
                        .iter()
                        .filter_map(|v| v.as_array().cloned())
                        .flatten()
                        .collect()
                }
                Segment::Tag(name) => current.iter().filter_map(|v| tag_value(v, name)).collect(),
            };
            if current.is_empty() {
                // A fanned-out projection that matched an empty array is an
                // empty set, not an absent key.
                if fanned {
                    return Projected::Many(Vec::new());
                }
                return Projected::Absent;
            }
        }

        if fanned {
            Projected::Many(current)
        } else {
            match current.into_iter().next() {
                Some(v) => Projected::One(v),
                None => Projected::Absent,
            }
        }
    }
}

impl std::fmt::Display for PathExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Split a dotted segment like `IpPermissions[0][]` into its identifier and
/// index accessors.
fn split_indexes(full: &str, part: &str) -> Result<(String, Vec<Segment>)> {
    let mut indexes = Vec::new();
    let ident_end = part.find('[').unwrap_or(part.len());
    let ident = &part[..ident_end];
    let mut rest = &part[ident_end..];

    while !rest.is_empty() {
        let close = rest
            .find(']')
            .ok_or_else(|| CoreError::invalid_path(full, "unterminated index"))?;
        if !rest.starts_with('[') {
            return Err(CoreError::invalid_path(full, "malformed index"));
        }
        let inner = &rest[1..close];
        if inner.is_empty() {
            indexes.push(Segment::Flatten);
        } else {
            let n: usize = inner
                .parse()
                .map_err(|_| CoreError::invalid_path(full, "index is not a number"))?;
            indexes.push(Segment::Index(n));
        }
        rest = &rest[close + 1..];
    }

    Ok((ident.to_string(), indexes))
}

/// Resolve a tag by key through the conventional `Tags: [{Key, Value}]` shape.
fn tag_value(resource: &Value, name: &str) -> Option<Value> {
    let tags = resource.get("Tags")?.as_array()?;
    tags.iter()
        .find(|t| t.get("Key").and_then(Value::as_str) == Some(name))
        .and_then(|t| t.get("Value").cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn project(path: &str, value: &Value) -> Projected {
        PathExpr::parse(path).unwrap().project(value)
    }

    #[test]
    fn test_simple_key() {
        let v = json!({"State": {"Name": "running"}});
        assert_eq!(project("State.Name", &v), Projected::One(json!("running")));
    }

    #[test]
    fn test_missing_key_is_absent() {
        let v = json!({"State": {"Name": "running"}});
        assert!(project("State.Code", &v).is_absent());
        assert!(project("Missing.Deep.Path", &v).is_absent());
    }

    #[test]
    fn test_null_is_present() {
        let v = json!({"IamInstanceProfile": null});
        assert_eq!(
            project("IamInstanceProfile", &v),
            Projected::One(Value::Null)
        );
    }

    #[test]
    fn test_index_access() {
        let v = json!({"NetworkInterfaces": [{"SubnetId": "s-1"}, {"SubnetId": "s-2"}]});
        assert_eq!(
            project("NetworkInterfaces[1].SubnetId", &v),
            Projected::One(json!("s-2"))
        );
        assert!(project("NetworkInterfaces[9].SubnetId", &v).is_absent());
    }

    #[test]
    fn test_flatten_projection() {
        let v = json!({"IpPermissions": [
            {"CidrIp": ["0.0.0.0/0", "10.0.0.0/8"]},
            {"CidrIp": ["192.168.0.0/16"]}
        ]});
        assert_eq!(
            project("IpPermissions[].CidrIp[]", &v),
            Projected::Many(vec![
                json!("0.0.0.0/0"),
                json!("10.0.0.0/8"),
                json!("192.168.0.0/16")
            ])
        );
    }

    #[test]
    fn test_flatten_over_empty_array_is_empty_not_absent() {
        let v = json!({"IpPermissions": []});
        assert_eq!(
            project("IpPermissions[].CidrIp", &v),
            Projected::Many(Vec::new())
        );
    }

    #[test]
    fn test_flatten_drops_elements_missing_the_key() {
        let v = json!({"Mounts": [{"Device": "xvda"}, {"Other": 1}]});
        assert_eq!(
            project("Mounts[].Device", &v),
            Projected::Many(vec![json!("xvda")])
        );
    }

    #[test]
    fn test_tag_sugar() {
        let v = json!({"Tags": [
            {"Key": "env", "Value": "prod"},
            {"Key": "team", "Value": "infra"}
        ]});
        assert_eq!(project("tag:env", &v), Projected::One(json!("prod")));
        assert!(project("tag:owner", &v).is_absent());
    }

    #[test]
    fn test_tag_sugar_without_tags_array() {
        let v = json!({"InstanceId": "i-1"});
        assert!(project("tag:env", &v).is_absent());
    }

    #[test]
    fn test_parse_errors() {
        assert!(PathExpr::parse("").is_err());
        assert!(PathExpr::parse("a..b").is_err());
        assert!(PathExpr::parse("a[").is_err());
        assert!(PathExpr::parse("a[x]").is_err());
        assert!(PathExpr::parse("tag:").is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        let expr = PathExpr::parse("IpPermissions[].CidrIp").unwrap();
        assert_eq!(expr.to_string(), "IpPermissions[].CidrIp");
    }

    #[test]
    fn test_key_on_array_is_absent() {
        let v = json!({"Items": [1, 2, 3]});
        assert!(project("Items.Length", &v).is_absent());
    }
}
