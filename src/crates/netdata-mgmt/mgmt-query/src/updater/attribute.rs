use crate::dimension::DimensionHandle;
use crate::endpoint::ManagementEndpoint;
use crate::error::{CollectorError, Result};
use crate::query::QueryNode;
use crate::store::{CompositeStore, StoreKind, ValueStore};
use crate::updater::{DimensionMapping, DimensionUpdater, MappingDimensionUpdater, QueryDestination, UpdaterState};
use crate::value::Value;

/// Flavour of a static query, picked from its first value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeQueryKind {
    /// Integer values
    Default,
    /// Fractional values, kept with two decimals
    Double,
    /// Composite values, one store per field
    Composite,
}

#[derive(Debug)]
enum Target {
    Single(ValueStore),
    Composite(CompositeStore),
}

/// Reads one destination per cycle and feeds every dimension mapped to it.
#[derive(Debug)]
pub struct AttributeQuery {
    destination: QueryDestination,
    description: String,
    node: QueryNode,
    target: Target,
    state: UpdaterState,
}

impl AttributeQuery {
    pub(crate) fn new(destination: QueryDestination, node: QueryNode, example: &Value) -> Result<Self> {
        let target = match example {
            Value::Composite(_) => Target::Composite(CompositeStore::new()),
            other => Target::Single(ValueStore::for_example(other)?),
        };
        Ok(Self {
            description: destination.to_string(),
            destination,
            node,
            target,
            state: UpdaterState::default(),
        })
    }

    pub fn kind(&self) -> AttributeQueryKind {
        match &self.target {
            Target::Single(store) if store.kind() == StoreKind::Double => AttributeQueryKind::Double,
            Target::Single(_) => AttributeQueryKind::Default,
            Target::Composite(_) => AttributeQueryKind::Composite,
        }
    }
}

impl DimensionUpdater for AttributeQuery {
    fn update_dimension_values(&mut self, endpoint: &dyn ManagementEndpoint) -> Result<()> {
        let value = self.node.get(endpoint)?;
        match &self.target {
            Target::Single(store) => store.store(&value, &self.description)?,
            Target::Composite(store) => store.store(&value, &self.description)?,
        }
        self.state = UpdaterState::Running;
        Ok(())
    }

    fn dimensions(&self) -> Vec<DimensionHandle> {
        match &self.target {
            Target::Single(store) => store.dimensions().to_vec(),
            Target::Composite(store) => store.dimensions().cloned().collect(),
        }
    }

    fn state(&self) -> UpdaterState {
        self.state
    }
}

impl MappingDimensionUpdater for AttributeQuery {
    fn destination(&self) -> &QueryDestination {
        &self.destination
    }

    fn add_dimension(&mut self, mapping: &DimensionMapping, endpoint: &dyn ManagementEndpoint) -> Result<()> {
        if !self.query_destination_equals(&mapping.destination) {
            return Err(CollectorError::config(format!(
                "{} cannot serve {}",
                self.description, mapping.destination
            )));
        }

        match (&mut self.target, &mapping.field_key) {
            (Target::Single(store), None) => {
                store.add_dimension(mapping.dimension.clone());
                Ok(())
            }
            (Target::Single(_), Some(key)) => Err(CollectorError::config(format!(
                "{} is not a composite value, cannot read field '{key}'",
                self.description
            ))),
            (Target::Composite(store), Some(key)) => {
                let node = &self.node;
                store.add_dimension(key, mapping.dimension.clone(), || node.get(endpoint))
            }
            (Target::Composite(_), None) => Err(CollectorError::config(format!(
                "{} is a composite value, set composite_data_key or a get transform",
                self.description
            ))),
        }
    }
}
