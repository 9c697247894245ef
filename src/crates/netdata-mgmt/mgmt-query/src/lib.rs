//! Query composition and dimension updaters for management endpoints.
//!
//! A management endpoint exposes named objects with attributes and
//! operations. This crate turns declarative queries over those objects into
//! chart dimensions:
//!
//! - [`query`] builds node graphs (attribute reads, method calls, composite
//!   fields) from [`query::QueryConfig`] values,
//! - [`store`] converts queried values into scaled dimension values,
//! - [`updater`] refreshes dimensions once per collection cycle, either for
//!   a fixed destination or for a varying set of instances.

pub mod dimension;
pub mod endpoint;
pub mod error;
pub mod query;
pub mod store;
pub mod testing;
pub mod updater;
pub mod value;

pub use dimension::{Chart, ChartHandle, ChartType, Dimension, DimensionAlgorithm, DimensionHandle};
pub use endpoint::{AttributeInfo, ManagementEndpoint, OperationInfo, TypeDescriptor};
pub use error::{CollectorError, EndpointError, MethodResolutionError, Result};
pub use query::{Arity, QueryConfig, QueryFactory, QueryNode, TransformArg, TransformConfig};
pub use updater::{
    AggregationPolicy, DimensionLoader, DimensionMapping, DimensionUpdater, DynamicDimensionUpdater, InstanceKey,
    MappingDimensionUpdater, QueryDestination, UpdaterState,
};
pub use value::{ObjectName, Value, ValueKind};
