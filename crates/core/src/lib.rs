pub mod aggregate;
pub mod api;
pub mod dataset;
pub mod error;
pub mod facet;
pub mod filter;
pub mod ids;
pub mod inference;
pub mod partition;
pub mod row;
pub mod time_base;
pub mod transform;
pub mod value;

pub use aggregate::{Accumulator, Aggregate, AggregateOp, ExactSum};
pub use api::{DatasetBackend, DatasetView, RecordCounts};
pub use dataset::Dataset;
pub use error::{FacetError, FacetResult};
pub use facet::{Facet, FacetKind, Facets};
pub use filter::{
    DeliveryTicket, Filter, FilterOutput, FilterState, KeyPredicate, NewData, PartitionSnapshot,
};
pub use ids::*;
pub use partition::{Group, GroupBounds, Grouping, Partition};
pub use row::{DataRow, KEY_SEPARATOR, OTHER_LABEL};
pub use transform::{
    CategorialRule, CategorialTransform, ContinuousTransform, ControlPoint, TransformKind,
};
