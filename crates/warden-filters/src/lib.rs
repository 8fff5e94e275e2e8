pub mod coerce;
pub mod marked;
pub mod node;
pub mod ops;
pub mod related;
pub mod value;

pub use coerce::Coercion;
pub use marked::{DEFAULT_MARK_TAG, MarkedForOpFilter, Marker};
pub use node::{
    FilterDescriptor, FilterNode, FilterRegistry, RelatedSource, TypedFilter, filter_registry,
    value_descriptor,
};
pub use ops::{CmpOp, ListSemantics};
pub use related::{MatchOperator, RelatedFilter, RelatedSpec};
pub use value::{FilterContext, ValueFilter};
