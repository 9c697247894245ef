//! Value stores: fan a queried value out to the dimensions that watch it.

use std::collections::BTreeMap;

use crate::dimension::DimensionHandle;
use crate::error::{CollectorError, Result};
use crate::value::{Value, ValueKind};

/// Resolution given to dimensions fed by fractional values.
pub const DOUBLE_RESOLUTION: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Long,
    Double,
}

/// Stores one scalar value into every registered dimension.
#[derive(Debug)]
pub struct ValueStore {
    kind: StoreKind,
    dimensions: Vec<DimensionHandle>,
}

impl ValueStore {
    pub fn new(kind: StoreKind) -> Self {
        Self {
            kind,
            dimensions: Vec::new(),
        }
    }

    /// Pick the store able to hold values shaped like `example`.
    pub fn for_example(example: &Value) -> Result<Self> {
        match example.kind() {
            ValueKind::Long | ValueKind::Bool => Ok(Self::new(StoreKind::Long)),
            ValueKind::Double => Ok(Self::new(StoreKind::Double)),
            kind => Err(CollectorError::TypeNotSupported {
                type_name: kind.to_string(),
            }),
        }
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    pub fn dimensions(&self) -> &[DimensionHandle] {
        &self.dimensions
    }

    pub fn add_dimension(&mut self, dimension: DimensionHandle) {
        if self.dimensions.iter().any(|d| d.ptr_eq(&dimension)) {
            return;
        }
        if self.kind == StoreKind::Double {
            dimension.write().set_resolution(DOUBLE_RESOLUTION);
        }
        self.dimensions.push(dimension);
    }

    /// Write `raw` into every dimension. `Null` clears them.
    pub fn store(&self, raw: &Value, destination: &str) -> Result<()> {
        let unexpected = || CollectorError::UnexpectedValue {
            destination: destination.to_string(),
            expected: match self.kind {
                StoreKind::Long => "long".to_string(),
                StoreKind::Double => "number".to_string(),
            },
            found: raw.kind().to_string(),
        };

        match (self.kind, raw) {
            (_, Value::Null) => {
                for dimension in &self.dimensions {
                    dimension.clear();
                }
            }
            (StoreKind::Long, Value::Long(_) | Value::Bool(_)) => {
                let raw = match raw {
                    Value::Bool(b) => i64::from(*b),
                    _ => raw.as_i64().ok_or_else(unexpected)?,
                };
                for dimension in &self.dimensions {
                    let mut dimension = dimension.write();
                    let value = dimension.scale(raw);
                    dimension.set_current_value(Some(value));
                }
            }
            (StoreKind::Double, Value::Long(_) | Value::Double(_)) => {
                let raw = raw.as_f64().ok_or_else(unexpected)?;
                for dimension in &self.dimensions {
                    let mut dimension = dimension.write();
                    let value = dimension.scale_fractional(raw);
                    dimension.set_current_value(Some(value));
                }
            }
            _ => return Err(unexpected()),
        }
        Ok(())
    }
}

/// One store per registered field of a composite value.
#[derive(Debug, Default)]
pub struct CompositeStore {
    stores: BTreeMap<String, ValueStore>,
}

impl CompositeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `dimension` for `key`. The first registration of a key picks
    /// the store kind from that field of the value returned by `example`.
    pub fn add_dimension(
        &mut self,
        key: &str,
        dimension: DimensionHandle,
        example: impl FnOnce() -> Result<Value>,
    ) -> Result<()> {
        if !self.stores.contains_key(key) {
            let example = example()?;
            let field = match &example {
                Value::Composite(fields) => fields.get(key).ok_or_else(|| {
                    CollectorError::config(format!(
                        "composite value has no field '{key}' (fields: {:?})",
                        fields.keys().collect::<Vec<_>>()
                    ))
                })?,
                other => {
                    return Err(CollectorError::TypeNotSupported {
                        type_name: other.kind().to_string(),
                    });
                }
            };
            self.stores.insert(key.to_string(), ValueStore::for_example(field)?);
        }
        if let Some(store) = self.stores.get_mut(key) {
            store.add_dimension(dimension);
        }
        Ok(())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.stores.keys().map(String::as_str)
    }

    pub fn dimensions(&self) -> impl Iterator<Item = &DimensionHandle> {
        self.stores.values().flat_map(|s| s.dimensions().iter())
    }

    /// Store every registered field of `raw`; unregistered fields are ignored.
    pub fn store(&self, raw: &Value, destination: &str) -> Result<()> {
        match raw {
            Value::Composite(fields) => {
                for (key, store) in &self.stores {
                    let field = fields.get(key).unwrap_or(&Value::Null);
                    store.store(field, destination)?;
                }
                Ok(())
            }
            Value::Null => {
                for store in self.stores.values() {
                    store.store(&Value::Null, destination)?;
                }
                Ok(())
            }
            other => Err(CollectorError::UnexpectedValue {
                destination: destination.to_string(),
                expected: "composite".to_string(),
                found: other.kind().to_string(),
            }),
        }
    }
}
