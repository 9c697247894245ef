//! Dimension updaters: the per-cycle work of a collector.

mod attribute;
mod dynamic;
mod thread;

use std::fmt;

pub use attribute::{AttributeQuery, AttributeQueryKind};
pub use dynamic::{AggregationPolicy, DimensionLoader, DynamicDimensionUpdater, InstanceArena, InstanceKey, LoadResult};
pub use thread::{THREAD_VALUE_MISSING, THREADING_OBJECT_NAME, ThreadAttribute, ThreadQueries, thread_queries};

use crate::dimension::DimensionHandle;
use crate::endpoint::ManagementEndpoint;
use crate::error::{CollectorError, Result};
use crate::query::{QueryConfig, QueryNode, TransformArg, TransformConfig};
use crate::value::ObjectName;

/// Lifecycle of an updater. There is no terminal state: a failed updater is
/// dropped by its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdaterState {
    #[default]
    Uninitialized,
    Running,
}

/// Something that refreshes dimension values once per collection cycle.
pub trait DimensionUpdater: Send {
    /// Update values in all dimensions served by this updater.
    fn update_dimension_values(&mut self, endpoint: &dyn ManagementEndpoint) -> Result<()>;

    /// Dimensions written by this updater.
    fn dimensions(&self) -> Vec<DimensionHandle>;

    fn state(&self) -> UpdaterState;
}

/// An updater serving a fixed destination, able to take more dimensions for
/// that same destination.
pub trait MappingDimensionUpdater: DimensionUpdater {
    fn destination(&self) -> &QueryDestination;

    fn add_dimension(&mut self, mapping: &DimensionMapping, endpoint: &dyn ManagementEndpoint) -> Result<()>;

    fn query_destination_equals(&self, destination: &QueryDestination) -> bool {
        self.destination() == destination
    }
}

/// What a static query reads: an attribute (or the object itself) followed
/// by a transform chain.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDestination {
    pub object: ObjectName,
    pub attribute: Option<String>,
    pub transform: Vec<TransformConfig>,
}

impl QueryDestination {
    pub(crate) fn root_node(&self) -> QueryNode {
        match &self.attribute {
            Some(attribute) => QueryNode::attribute(self.object.clone(), attribute.as_str()),
            None => QueryNode::object(self.object.clone()),
        }
    }
}

impl fmt::Display for QueryDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.attribute {
            Some(attribute) => write!(f, "'{attribute}' of '{}'", self.object)?,
            None => write!(f, "'{}'", self.object)?,
        }
        for step in &self.transform {
            write!(f, ".{}(", step.method)?;
            for (i, arg) in step.args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                match arg {
                    TransformArg::Placeholder => f.write_str("$")?,
                    TransformArg::Literal(value) => write!(f, "{value}")?,
                }
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}

/// A dimension bound to the destination feeding it.
#[derive(Debug, Clone)]
pub struct DimensionMapping {
    pub dimension: DimensionHandle,
    pub destination: QueryDestination,
    /// Field of a composite value
    pub field_key: Option<String>,
}

impl DimensionMapping {
    /// Bind `dimension` to the query described by `config`.
    ///
    /// A chain made of a single `get("X")` reads field `X` of the attribute,
    /// exactly like `composite_data_key: X`, so both forms share one query.
    /// A composite key followed by more transforms becomes the first step of
    /// the chain.
    pub fn from_query(dimension: DimensionHandle, config: &QueryConfig) -> Result<Self> {
        let object = ObjectName::parse(&config.from)?;
        let mut transform = config.transform.clone();
        let mut field_key = config.composite_data_key.clone();

        let single_get = match transform.as_slice() {
            [step] => step.as_field_get().map(str::to_string),
            _ => None,
        };
        match field_key.take() {
            None if config.value.is_some() && single_get.is_some() => {
                field_key = single_get;
                transform.clear();
            }
            Some(key) if transform.is_empty() => field_key = Some(key),
            Some(key) => transform.insert(0, TransformConfig::with_arg("get", key)),
            None => {}
        }
        if config.value.is_none() && field_key.is_some() {
            return Err(CollectorError::config(format!(
                "'{}': a composite data key needs an attribute",
                config.from
            )));
        }

        Ok(Self {
            dimension,
            destination: QueryDestination {
                object,
                attribute: config.value.clone(),
                transform,
            },
            field_key,
        })
    }

    /// Same destination and same field.
    pub fn same_source(&self, other: &DimensionMapping) -> bool {
        self.destination == other.destination && self.field_key == other.field_key
    }
}
