pub mod error;
pub mod path;
pub mod registry;
pub mod resource;
pub mod time;

pub use error::{CoreError, ErrorKind, Result, Violation};
pub use path::{PathExpr, Projected};
pub use registry::PluginRegistry;
pub use resource::{Resource, ResourceTypeDef};
pub use time::{Timestamp, now_utc};
