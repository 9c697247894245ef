//! Lazy method binding for transform chains.
//!
//! A method is bound the first time its node is evaluated, using the shape
//! of the receiver and of the argument seen at that moment. The outcome,
//! success or failure, is kept for the life of the node.

use std::fmt;
use std::sync::OnceLock;

use crate::endpoint::{ManagementEndpoint, OperationInfo, TypeDescriptor};
use crate::error::{CollectorError, MethodResolutionError, Result};
use crate::value::{Value, ValueKind};

/// Declared type of an operation parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamType {
    Primitive(ValueKind),
    Boxed(ValueKind),
    Array,
    Any,
    Other,
}

impl ParamType {
    fn parse(type_name: &str) -> Self {
        match type_name {
            "long" | "int" | "short" | "byte" => ParamType::Primitive(ValueKind::Long),
            "double" | "float" => ParamType::Primitive(ValueKind::Double),
            "boolean" => ParamType::Primitive(ValueKind::Bool),
            "java.lang.Long" | "java.lang.Integer" | "java.lang.Short" | "java.lang.Byte" => {
                ParamType::Boxed(ValueKind::Long)
            }
            "java.lang.Double" | "java.lang.Float" => ParamType::Boxed(ValueKind::Double),
            "java.lang.Boolean" => ParamType::Boxed(ValueKind::Bool),
            "java.lang.String" => ParamType::Boxed(ValueKind::String),
            "javax.management.ObjectName" => ParamType::Boxed(ValueKind::Object),
            "javax.management.openmbean.CompositeData" | "java.util.Map" => {
                ParamType::Boxed(ValueKind::Composite)
            }
            "java.util.List" | "java.util.Collection" => ParamType::Boxed(ValueKind::List),
            "java.lang.Object" => ParamType::Any,
            t if t.ends_with("[]") || t.starts_with('[') => ParamType::Array,
            _ => ParamType::Other,
        }
    }

    /// The declared type an argument carries by itself.
    fn natural(arg: &Value) -> Self {
        match arg.kind() {
            ValueKind::Null => ParamType::Any,
            ValueKind::List => ParamType::Array,
            kind => ParamType::Boxed(kind),
        }
    }

    /// Whether `arg` may be passed for a parameter of this type, treating
    /// primitives and their boxed forms alike.
    fn accepts(self, arg: &Value) -> bool {
        match (self, arg.kind()) {
            (ParamType::Primitive(_), ValueKind::Null) => false,
            (_, ValueKind::Null) => true,
            (ParamType::Any, _) => true,
            (ParamType::Array, ValueKind::List) => true,
            (ParamType::Primitive(kind) | ParamType::Boxed(kind), actual) => kind == actual,
            _ => false,
        }
    }
}

/// A method bound to a receiver shape.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MethodHandle {
    /// Remote operation of an endpoint object
    Operation(OperationInfo),
    /// `getX()` on an object declaring attribute `X`
    AttributeGetter(String),
    CompositeGet,
    CompositeContainsKey,
    /// `getX()` or `isX()` on a composite with field `x`
    FieldGetter(String),
    ListGet,
    Size,
    ToString,
    LongValue,
    IntValue,
    DoubleValue,
}

/// How resolution failed.
enum Unresolved {
    /// The method does not exist for this receiver; cached.
    Missing(MethodResolutionError),
    /// The endpoint could not be asked; retried at the next evaluation.
    Endpoint(CollectorError),
}

/// A named method call inside a query node, bound on first use.
pub struct MethodCall {
    name: String,
    handle: OnceLock<std::result::Result<MethodHandle, MethodResolutionError>>,
}

impl MethodCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handle: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a resolution attempt has completed.
    pub fn is_resolved(&self) -> bool {
        self.handle.get().is_some()
    }

    /// Call the method on `receiver`.
    ///
    /// A `Null` receiver yields `Null` without binding, so a chain over a
    /// vanished instance reads as "no value".
    pub(crate) fn call(
        &self,
        receiver: &Value,
        args: &[Value],
        endpoint: &dyn ManagementEndpoint,
        destination: &dyn fmt::Display,
    ) -> Result<Value> {
        if receiver.is_null() {
            return Ok(Value::Null);
        }

        let resolved = match self.handle.get() {
            Some(resolved) => resolved,
            None => match resolve(&self.name, receiver, args, endpoint, destination) {
                Ok(handle) => self.handle.get_or_init(|| Ok(handle)),
                Err(Unresolved::Missing(e)) => {
                    tracing::debug!("method {}: {}", self.name, e);
                    self.handle.get_or_init(|| Err(e))
                }
                Err(Unresolved::Endpoint(e)) => return Err(e),
            },
        };

        match resolved {
            Ok(handle) => handle.invoke(receiver, args, endpoint, destination),
            Err(e) => Err(e.clone().into()),
        }
    }
}

impl fmt::Debug for MethodCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodCall")
            .field("name", &self.name)
            .field("handle", &self.handle.get())
            .finish()
    }
}

fn describe_arguments(args: &[Value]) -> String {
    args.iter()
        .map(|a| a.kind().as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn missing(name: &str, receiver: &Value, args: &[Value], reason: impl Into<String>) -> Unresolved {
    Unresolved::Missing(MethodResolutionError {
        method: name.to_string(),
        arguments: describe_arguments(args),
        receiver: match receiver {
            Value::Object(object) => format!("'{object}'"),
            other => other.kind().to_string(),
        },
        reason: reason.into(),
    })
}

/// `getUsed` → `Used`, `isValid` → `Valid`.
fn getter_property(name: &str) -> Option<&str> {
    name.strip_prefix("get")
        .or_else(|| name.strip_prefix("is"))
        .filter(|p| p.starts_with(|c: char| c.is_ascii_uppercase()))
}

fn lower_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn resolve(
    name: &str,
    receiver: &Value,
    args: &[Value],
    endpoint: &dyn ManagementEndpoint,
    destination: &dyn fmt::Display,
) -> std::result::Result<MethodHandle, Unresolved> {
    if let Some(handle) = resolve_common(name, receiver, args) {
        return Ok(handle);
    }

    match receiver {
        Value::Object(object) => {
            let descriptor = endpoint
                .resolve_object_type(object)
                .map_err(|e| Unresolved::Endpoint(CollectorError::query(destination, e)))?;
            resolve_operation(name, &descriptor, args).ok_or_else(|| {
                missing(name, receiver, args, format!("no matching operation on {}", descriptor.class_name))
            })
        }
        Value::Composite(fields) => match (name, args) {
            ("get", [Value::String(_)]) => Ok(MethodHandle::CompositeGet),
            ("containsKey", [Value::String(_)]) => Ok(MethodHandle::CompositeContainsKey),
            (getter, []) => getter_property(getter)
                .and_then(|property| {
                    [property.to_string(), lower_first(property)]
                        .into_iter()
                        .find(|field| fields.contains_key(field))
                })
                .map(MethodHandle::FieldGetter)
                .ok_or_else(|| missing(name, receiver, args, "no such field")),
            _ => Err(missing(name, receiver, args, "composites support get(key), containsKey(key) and getters")),
        },
        Value::List(_) => match (name, args) {
            ("get", [Value::Long(_)]) => Ok(MethodHandle::ListGet),
            _ => Err(missing(name, receiver, args, "lists support get(index) and size()")),
        },
        _ => Err(missing(name, receiver, args, "no such method")),
    }
}

/// Methods every value answers.
fn resolve_common(name: &str, receiver: &Value, args: &[Value]) -> Option<MethodHandle> {
    if !args.is_empty() {
        return None;
    }
    let numeric = matches!(receiver, Value::Long(_) | Value::Double(_));
    match name {
        "toString" => Some(MethodHandle::ToString),
        "longValue" if numeric => Some(MethodHandle::LongValue),
        "intValue" if numeric => Some(MethodHandle::IntValue),
        "doubleValue" if numeric => Some(MethodHandle::DoubleValue),
        "size" if matches!(receiver, Value::List(_) | Value::Composite(_)) => Some(MethodHandle::Size),
        _ => None,
    }
}

/// Exact declared types first, then the first overload the arguments can be
/// passed to, then attribute getters.
fn resolve_operation(name: &str, descriptor: &TypeDescriptor, args: &[Value]) -> Option<MethodHandle> {
    let same_arity = || descriptor.operations_named(name).filter(|op| op.parameters.len() == args.len());

    let exact = same_arity().find(|op| {
        op.parameters
            .iter()
            .zip(args)
            .all(|(param, arg)| ParamType::parse(param) == ParamType::natural(arg))
    });
    let assignable = || {
        same_arity().find(|op| {
            op.parameters
                .iter()
                .zip(args)
                .all(|(param, arg)| ParamType::parse(param).accepts(arg))
        })
    };
    if let Some(op) = exact.or_else(assignable) {
        return Some(MethodHandle::Operation(op.clone()));
    }

    if args.is_empty() {
        let property = getter_property(name)?;
        return descriptor
            .attribute(property)
            .map(|attribute| MethodHandle::AttributeGetter(attribute.name.clone()));
    }
    None
}

impl MethodHandle {
    fn invoke(
        &self,
        receiver: &Value,
        args: &[Value],
        endpoint: &dyn ManagementEndpoint,
        destination: &dyn fmt::Display,
    ) -> Result<Value> {
        let unexpected = |expected: &str| CollectorError::UnexpectedValue {
            destination: destination.to_string(),
            expected: expected.to_string(),
            found: receiver.kind().to_string(),
        };

        match (self, receiver) {
            (MethodHandle::Operation(operation), Value::Object(object)) => endpoint
                .invoke(object, operation, args)
                .map_err(|e| CollectorError::query(destination, e)),
            (MethodHandle::AttributeGetter(attribute), Value::Object(object)) => endpoint
                .read_attribute(object, attribute)
                .map_err(|e| CollectorError::query(destination, e)),
            (MethodHandle::CompositeGet, Value::Composite(fields)) => {
                let key = args.first().and_then(Value::as_str).unwrap_or_default();
                fields.get(key).cloned().ok_or_else(|| CollectorError::UnexpectedValue {
                    destination: destination.to_string(),
                    expected: format!("field '{key}'"),
                    found: format!("fields {:?}", fields.keys().collect::<Vec<_>>()),
                })
            }
            (MethodHandle::CompositeContainsKey, Value::Composite(fields)) => {
                let key = args.first().and_then(Value::as_str).unwrap_or_default();
                Ok(Value::Bool(fields.contains_key(key)))
            }
            (MethodHandle::FieldGetter(field), Value::Composite(fields)) => {
                Ok(fields.get(field).cloned().unwrap_or_default())
            }
            (MethodHandle::ListGet, Value::List(items)) => {
                let index = args.first().and_then(Value::as_i64).unwrap_or(-1);
                usize::try_from(index)
                    .ok()
                    .and_then(|i| items.get(i))
                    .cloned()
                    .ok_or_else(|| CollectorError::UnexpectedValue {
                        destination: destination.to_string(),
                        expected: format!("index {index}"),
                        found: format!("list of {} elements", items.len()),
                    })
            }
            (MethodHandle::Size, Value::List(items)) => Ok(Value::Long(items.len() as i64)),
            (MethodHandle::Size, Value::Composite(fields)) => Ok(Value::Long(fields.len() as i64)),
            (MethodHandle::ToString, value) => Ok(Value::String(value.to_string())),
            (MethodHandle::LongValue, Value::Long(v)) => Ok(Value::Long(*v)),
            (MethodHandle::LongValue, Value::Double(v)) => Ok(Value::Long(*v as i64)),
            (MethodHandle::IntValue, Value::Long(v)) => Ok(Value::Long(i64::from(*v as i32))),
            (MethodHandle::IntValue, Value::Double(v)) => Ok(Value::Long(i64::from(*v as i32))),
            (MethodHandle::DoubleValue, Value::Long(v)) => Ok(Value::Double(*v as f64)),
            (MethodHandle::DoubleValue, Value::Double(v)) => Ok(Value::Double(*v)),
            (MethodHandle::Operation(_) | MethodHandle::AttributeGetter(_), _) => Err(unexpected("object")),
            (MethodHandle::ListGet, _) => Err(unexpected("list")),
            (MethodHandle::Size, _) => Err(unexpected("list or composite")),
            (MethodHandle::LongValue | MethodHandle::IntValue | MethodHandle::DoubleValue, _) => {
                Err(unexpected("number"))
            }
            _ => Err(unexpected("composite")),
        }
    }
}
