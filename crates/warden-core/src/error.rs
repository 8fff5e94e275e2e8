use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Normalized error kinds shared across providers.
///
/// The engine never inspects provider error strings; session adapters map
/// their SDK failures onto one of these kinds and the core decides
/// propagation from the kind alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Policy document invalid; surfaced before any I/O.
    PolicySchema,
    /// Duplicate plugin registration; fatal at startup.
    PluginConflict,
    /// Provider rate-limit; retried at the session layer.
    Throttled,
    /// 5xx or connection reset; retried at the session layer.
    Transient,
    /// Resource disappeared between enumerate and act; per-resource soft failure.
    NotFound,
    /// Missing permission; per-call soft failure.
    Forbidden,
    /// Deadline exceeded; dispatch stops and the run ends with a partial report.
    Timeout,
    /// Anything else; aborts the policy, the runner continues with the next one.
    Fatal,
}

impl ErrorKind {
    /// Kinds the session layer retries with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled | Self::Transient)
    }

    /// Kinds that abort the whole policy rather than a single resource.
    pub fn is_policy_fatal(&self) -> bool {
        matches!(self, Self::PolicySchema | Self::PluginConflict | Self::Fatal)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PolicySchema => write!(f, "policy_schema"),
            Self::PluginConflict => write!(f, "plugin_conflict"),
            Self::Throttled => write!(f, "throttled"),
            Self::Transient => write!(f, "transient"),
            Self::NotFound => write!(f, "not_found"),
            Self::Forbidden => write!(f, "forbidden"),
            Self::Timeout => write!(f, "timeout"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// A single schema violation: where in the document and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// JSON-pointer-ish path into the policy document.
    pub path: String,
    pub reason: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at {}: {}", self.path, self.reason)
    }
}

/// Core error type for Warden operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("policy document invalid ({} violation{})", .0.len(), if .0.len() == 1 { "" } else { "s" })]
    Schema(Vec<Violation>),

    #[error("plugin {name:?} already registered in {registry} registry")]
    PluginConflict { registry: String, name: String },

    #[error("{registry} registry is frozen; cannot register {name:?}")]
    RegistryFrozen { registry: String, name: String },

    #[error("rate limited: {0}")]
    Throttled(String),

    #[error("transient provider failure: {0}")]
    Transient(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("access denied ({permission} required): {message}")]
    Forbidden { permission: String, message: String },

    #[error("deadline exceeded: {0}")]
    Timeout(String),

    #[error("invalid path expression {expr:?}: {reason}")]
    InvalidPath { expr: String, reason: String },

    #[error("invalid timestamp {value:?}: {reason}")]
    InvalidTimestamp { value: String, reason: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Fatal(String),
}

impl CoreError {
    pub fn schema(violations: Vec<Violation>) -> Self {
        Self::Schema(violations)
    }

    /// A schema error with a single violation.
    pub fn schema_at(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Schema(vec![Violation::new(path, reason)])
    }

    pub fn plugin_conflict(registry: impl Into<String>, name: impl Into<String>) -> Self {
        Self::PluginConflict {
            registry: registry.into(),
            name: name.into(),
        }
    }

    pub fn forbidden(permission: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Forbidden {
            permission: permission.into(),
            message: message.into(),
        }
    }

    pub fn invalid_path(expr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            expr: expr.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_timestamp(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTimestamp {
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Normalized kind used for propagation decisions and reports.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Schema(_) | Self::InvalidPath { .. } | Self::InvalidTimestamp { .. } => {
                ErrorKind::PolicySchema
            }
            Self::PluginConflict { .. } => ErrorKind::PluginConflict,
            Self::Throttled(_) => ErrorKind::Throttled,
            Self::Transient(_) => ErrorKind::Transient,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::RegistryFrozen { .. } | Self::Json(_) | Self::Io(_) | Self::Fatal(_) => {
                ErrorKind::Fatal
            }
        }
    }

    /// The violations carried by a schema error, empty otherwise.
    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::Schema(v) => v,
            _ => &[],
        }
    }

    /// Required permission for `Forbidden`, if known.
    pub fn permission(&self) -> Option<&str> {
        match self {
            Self::Forbidden { permission, .. } => Some(permission),
            _ => None,
        }
    }
}

/// Convenience result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
