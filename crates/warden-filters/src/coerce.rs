//! Operand coercions selected by the `value_type` filter parameter.

use ipnetwork::IpNetwork;
use serde_json::Value;
use std::net::IpAddr;
use std::str::FromStr;
use warden_core::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    /// Right is days; left a timestamp; compare `now - left` in days.
    Age,
    /// Both sides parse byte sizes with `K`/`M`/`G` units.
    Size,
    /// Coerce both sides to integer.
    Integer,
    /// Lowercase and strip both sides.
    Normalize,
    /// Swap operands before comparison.
    Swap,
    /// Treat operands as CIDR blocks with membership semantics.
    Cidr,
    /// Project the prefix length of the left operand.
    CidrSize,
    /// Parse both sides as timestamps.
    Date,
    /// Right is days; compare left against `now + days`.
    Expiration,
}

impl Coercion {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "age" => Some(Self::Age),
            "size" => Some(Self::Size),
            "integer" => Some(Self::Integer),
            "normalize" => Some(Self::Normalize),
            "swap" => Some(Self::Swap),
            "cidr" => Some(Self::Cidr),
            "cidr_size" => Some(Self::CidrSize),
            "date" => Some(Self::Date),
            "expiration" => Some(Self::Expiration),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Age => "age",
            Self::Size => "size",
            Self::Integer => "integer",
            Self::Normalize => "normalize",
            Self::Swap => "swap",
            Self::Cidr => "cidr",
            Self::CidrSize => "cidr_size",
            Self::Date => "date",
            Self::Expiration => "expiration",
        }
    }

    pub fn names() -> Vec<String> {
        [
            "age",
            "size",
            "integer",
            "normalize",
            "swap",
            "cidr",
            "cidr_size",
            "date",
            "expiration",
        ]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
    }
}

/// Parse a byte size, accepting numbers and `K`/`M`/`G`-suffixed strings.
pub fn parse_size(v: &Value) -> Option<f64> {
    if let Some(n) = v.as_f64() {
        return Some(n);
    }
    let s = v.as_str()?.trim();
    let (digits, unit) = match s.chars().last()? {
        'k' | 'K' => (&s[..s.len() - 1], 1024.0),
        'm' | 'M' => (&s[..s.len() - 1], 1024.0 * 1024.0),
        'g' | 'G' => (&s[..s.len() - 1], 1024.0 * 1024.0 * 1024.0),
        _ => (s, 1.0),
    };
    digits.trim().parse::<f64>().ok().map(|n| n * unit)
}

/// Coerce to integer: numbers truncate, strings parse.
pub fn to_integer(v: &Value) -> Option<i64> {
    if let Some(n) = v.as_i64() {
        return Some(n);
    }
    if let Some(f) = v.as_f64() {
        return Some(f as i64);
    }
    v.as_str()?.trim().parse().ok()
}

/// Lowercase and strip string values; everything else passes through.
pub fn normalize(v: &Value) -> Value {
    match v.as_str() {
        Some(s) => Value::String(s.trim().to_lowercase()),
        None => v.clone(),
    }
}

/// Parse a timestamp from a string or a unix-seconds number.
pub fn to_timestamp(v: &Value) -> Option<Timestamp> {
    if let Some(s) = v.as_str() {
        return Timestamp::from_str(s).ok();
    }
    let secs = v.as_i64()?;
    time::OffsetDateTime::from_unix_timestamp(secs)
        .ok()
        .map(Timestamp::new)
}

/// Parse a CIDR block; bare addresses get a host-length prefix.
pub fn parse_cidr(v: &Value) -> Option<IpNetwork> {
    let s = v.as_str()?.trim();
    if let Ok(net) = IpNetwork::from_str(s) {
        return Some(net);
    }
    let addr: IpAddr = s.parse().ok()?;
    IpNetwork::new(addr, if addr.is_ipv4() { 32 } else { 128 }).ok()
}

/// Whether `container` covers every address of `inner`.
pub fn cidr_contains(container: &IpNetwork, inner: &IpNetwork) -> bool {
    container.contains(inner.network()) && container.prefix() <= inner.prefix()
}
