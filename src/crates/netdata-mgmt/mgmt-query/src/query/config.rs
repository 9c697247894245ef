//! Declarative description of a query.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::value::Value;

/// Where a value comes from and how it is transformed.
///
/// ```yaml
/// from: java.lang:type=Memory
/// value: HeapMemoryUsage
/// transform:
///   - method: get
///     args: [used]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Name of the object to query
    pub from: String,

    /// Attribute to read; the object itself is the root when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Field of a composite attribute (same as a leading `get` transform)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composite_data_key: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transform: Vec<TransformConfig>,
}

impl QueryConfig {
    pub fn new(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            ..Default::default()
        }
    }

    pub fn attribute(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn composite_data_key(mut self, key: impl Into<String>) -> Self {
        self.composite_data_key = Some(key.into());
        self
    }

    pub fn then(mut self, step: TransformConfig) -> Self {
        self.transform.push(step);
        self
    }
}

/// One method call of a transform chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformConfig {
    pub method: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<TransformArg>,
}

impl TransformConfig {
    pub fn call(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            args: Vec::new(),
        }
    }

    pub fn with_arg(method: impl Into<String>, arg: impl Into<Value>) -> Self {
        Self {
            method: method.into(),
            args: vec![TransformArg::Literal(arg.into())],
        }
    }

    pub fn with_placeholder(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            args: vec![TransformArg::Placeholder],
        }
    }

    /// The literal string argument of a `get` call, if this step is one.
    pub(crate) fn as_field_get(&self) -> Option<&str> {
        match (self.method.as_str(), self.args.as_slice()) {
            ("get", [TransformArg::Literal(Value::String(key))]) => Some(key),
            _ => None,
        }
    }
}

/// Argument of a transform step.
///
/// The empty map `{}` marks the position where the per-instance parameter
/// goes; anything else is a literal.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformArg {
    Placeholder,
    Literal(Value),
}

impl<'de> Deserialize<'de> for TransformArg {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::Object(map) if map.is_empty() => Ok(TransformArg::Placeholder),
            serde_json::Value::Object(_) => Err(D::Error::custom(
                "maps are not accepted as arguments, use {} for the placeholder",
            )),
            other => Ok(TransformArg::Literal(Value::from_json(other))),
        }
    }
}

impl Serialize for TransformArg {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TransformArg::Placeholder => serde_json::Map::new().serialize(serializer),
            TransformArg::Literal(value) => value.to_json().serialize(serializer),
        }
    }
}
