//! Values exchanged with a management endpoint.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::CollectorError;

/// Name of an object registered on a management endpoint.
///
/// The textual form is `domain:key=value[,key=value]*`. Two names are equal
/// when they have the same domain and the same set of properties, whatever
/// order the properties were written in.
#[derive(Debug, Clone)]
pub struct ObjectName {
    name: String,
    canonical: String,
    domain_len: usize,
    properties: Vec<(String, String)>,
}

impl ObjectName {
    pub fn parse(name: &str) -> Result<Self, CollectorError> {
        let invalid = |reason: &str| CollectorError::config(format!("invalid object name '{name}': {reason}"));

        let name = name.trim();
        let Some((domain, list)) = name.split_once(':') else {
            return Err(invalid("missing ':' between domain and properties"));
        };
        if domain.is_empty() {
            return Err(invalid("empty domain"));
        }
        if list.is_empty() {
            return Err(invalid("no properties"));
        }

        let mut properties: Vec<(String, String)> = Vec::new();
        let mut wildcard = false;
        for property in split_properties(list).ok_or_else(|| invalid("unterminated quoted value"))? {
            if property == "*" {
                wildcard = true;
                continue;
            }
            let Some((key, value)) = property.split_once('=') else {
                return Err(invalid("property without '='"));
            };
            if key.is_empty() || value.is_empty() {
                return Err(invalid("empty property key or value"));
            }
            if properties.iter().any(|(k, _)| k == key) {
                return Err(invalid("duplicate property key"));
            }
            properties.push((key.to_string(), value.to_string()));
        }

        let mut sorted: Vec<&(String, String)> = properties.iter().collect();
        sorted.sort();
        let mut canonical = String::with_capacity(name.len());
        canonical.push_str(domain);
        canonical.push(':');
        for (i, (key, value)) in sorted.into_iter().enumerate() {
            if i > 0 {
                canonical.push(',');
            }
            canonical.push_str(key);
            canonical.push('=');
            canonical.push_str(value);
        }
        if wildcard {
            canonical.push_str(if properties.is_empty() { "*" } else { ",*" });
        }

        Ok(Self {
            name: name.to_string(),
            canonical,
            domain_len: domain.len(),
            properties,
        })
    }

    pub fn domain(&self) -> &str {
        &self.name[..self.domain_len]
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The name as it was written.
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Domain followed by the properties sorted by key.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// Whether this name selects several objects (`*`, `?` wildcards).
    pub fn is_pattern(&self) -> bool {
        self.name.contains(['*', '?'])
    }
}

/// Split a property list on the commas outside quoted values.
fn split_properties(list: &str) -> Option<Vec<&str>> {
    let mut properties = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;

    for (i, c) in list.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ',' if !quoted => {
                properties.push(&list[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if quoted {
        return None;
    }
    properties.push(&list[start..]);
    Some(properties)
}

impl PartialEq for ObjectName {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for ObjectName {}

impl Hash for ObjectName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl PartialOrd for ObjectName {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ObjectName {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.canonical.cmp(&other.canonical)
    }
}

impl FromStr for ObjectName {
    type Err = CollectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Shape of a [`Value`], used in error messages and method matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Bool,
    Long,
    Double,
    String,
    List,
    Composite,
    Object,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "boolean",
            ValueKind::Long => "long",
            ValueKind::Double => "double",
            ValueKind::String => "string",
            ValueKind::List => "list",
            ValueKind::Composite => "composite",
            ValueKind::Object => "object",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value read from, or passed to, a management endpoint.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Long(i64),
    Double(f64),
    String(String),
    List(Vec<Value>),
    Composite(BTreeMap<String, Value>),
    Object(ObjectName),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Long(_) => ValueKind::Long,
            Value::Double(_) => ValueKind::Double,
            Value::String(_) => ValueKind::String,
            Value::List(_) => ValueKind::List,
            Value::Composite(_) => ValueKind::Composite,
            Value::Object(_) => ValueKind::Object,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view of the value, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Long(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Field of a composite value.
    pub fn field(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Composite(fields) => fields.get(key),
            _ => None,
        }
    }

    /// Convert a JSON document into a value.
    ///
    /// Integers that do not fit an `i64` become doubles.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(v) => Value::Long(v),
                None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(fields) => Value::Composite(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Long(v) => serde_json::Value::from(*v),
            Value::Double(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Composite(fields) => serde_json::Value::Object(
                fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Object(name) => serde_json::Value::String(name.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::String(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Composite(fields) => {
                f.write_str("{")?;
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}={value}")?;
                }
                f.write_str("}")
            }
            Value::Object(name) => write!(f, "{name}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<ObjectName> for Value {
    fn from(v: ObjectName) -> Self {
        Value::Object(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl FromIterator<(String, Value)> for Value {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Value::Composite(iter.into_iter().collect())
    }
}
