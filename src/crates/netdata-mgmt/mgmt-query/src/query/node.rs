//! Query nodes.
//!
//! A node either produces a value on its own (arity [`Arity::Query`]) or
//! needs one parameter to do so (arity [`Arity::Function`]). Nodes are
//! immutable once built; the only state they carry is the lazily bound
//! method of method-call nodes.

use std::fmt;
use std::slice;

use crate::endpoint::ManagementEndpoint;
use crate::error::{CollectorError, Result};
use crate::query::method::MethodCall;
use crate::value::{ObjectName, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// No parameter
    Query,
    /// Exactly one parameter
    Function,
}

#[derive(Debug)]
pub struct QueryNode {
    arity: Arity,
    kind: NodeKind,
}

#[derive(Debug)]
enum NodeKind {
    Object(ObjectName),
    Attribute {
        object: ObjectName,
        attribute: String,
    },
    NoArgMethod {
        parent: Box<QueryNode>,
        method: MethodCall,
    },
    BoundMethod {
        parent: Box<QueryNode>,
        method: MethodCall,
        argument: Value,
    },
    PlaceholderMethod {
        parent: Box<QueryNode>,
        method: MethodCall,
    },
    CompositeField {
        parent: Box<QueryNode>,
        key: String,
    },
}

impl QueryNode {
    /// The object itself, as a receiver for method calls. A pattern evaluates
    /// to the list of matching objects.
    pub fn object(object: ObjectName) -> Self {
        Self {
            arity: Arity::Query,
            kind: NodeKind::Object(object),
        }
    }

    /// Reads `attribute` of `object` every time it is evaluated.
    pub fn attribute(object: ObjectName, attribute: impl Into<String>) -> Self {
        Self {
            arity: Arity::Query,
            kind: NodeKind::Attribute {
                object,
                attribute: attribute.into(),
            },
        }
    }

    /// Calls a method without arguments on the parent's value. Keeps the
    /// parent's arity.
    pub fn no_arg_method(parent: QueryNode, method: impl Into<String>) -> Self {
        Self {
            arity: parent.arity,
            kind: NodeKind::NoArgMethod {
                parent: Box::new(parent),
                method: MethodCall::new(method),
            },
        }
    }

    /// Calls a method with a fixed argument.
    pub fn bound_method(parent: QueryNode, method: impl Into<String>, argument: Value) -> Result<Self> {
        let method = method.into();
        if parent.arity != Arity::Query {
            return Err(CollectorError::config(format!(
                "cannot bind an argument to '{method}' after a placeholder in {parent}"
            )));
        }
        Ok(Self {
            arity: Arity::Query,
            kind: NodeKind::BoundMethod {
                parent: Box::new(parent),
                method: MethodCall::new(method),
                argument,
            },
        })
    }

    /// Calls a method with the parameter as its argument.
    pub fn placeholder_method(parent: QueryNode, method: impl Into<String>) -> Result<Self> {
        let method = method.into();
        if parent.arity != Arity::Query {
            return Err(CollectorError::config(format!(
                "only one placeholder is allowed, '{method}' follows {parent}"
            )));
        }
        Ok(Self {
            arity: Arity::Function,
            kind: NodeKind::PlaceholderMethod {
                parent: Box::new(parent),
                method: MethodCall::new(method),
            },
        })
    }

    /// Extracts a field of the parent's composite value. A `Null` parent
    /// value gives `Null`.
    pub fn composite_field(parent: QueryNode, key: impl Into<String>) -> Self {
        Self {
            arity: parent.arity,
            kind: NodeKind::CompositeField {
                parent: Box::new(parent),
                key: key.into(),
            },
        }
    }

    pub fn arity(&self) -> Arity {
        self.arity
    }

    /// Evaluate a [`Arity::Query`] node.
    pub fn get(&self, endpoint: &dyn ManagementEndpoint) -> Result<Value> {
        if self.arity != Arity::Query {
            return Err(CollectorError::config(format!("{self} needs a parameter")));
        }
        self.eval(endpoint, None)
    }

    /// Evaluate a [`Arity::Function`] node with its parameter.
    pub fn apply(&self, endpoint: &dyn ManagementEndpoint, parameter: &Value) -> Result<Value> {
        if self.arity != Arity::Function {
            return Err(CollectorError::config(format!("{self} does not take a parameter")));
        }
        self.eval(endpoint, Some(parameter))
    }

    fn eval(&self, endpoint: &dyn ManagementEndpoint, parameter: Option<&Value>) -> Result<Value> {
        match &self.kind {
            NodeKind::Object(object) if object.is_pattern() => endpoint
                .enumerate_instances(object)
                .map(|names| Value::List(names.into_iter().map(Value::Object).collect()))
                .map_err(|e| CollectorError::query(self, e)),
            NodeKind::Object(object) => Ok(Value::Object(object.clone())),
            NodeKind::Attribute { object, attribute } => endpoint
                .read_attribute(object, attribute)
                .map_err(|e| CollectorError::query(self, e)),
            NodeKind::NoArgMethod { parent, method } => {
                let receiver = parent.eval(endpoint, parameter)?;
                method.call(&receiver, &[], endpoint, self)
            }
            NodeKind::BoundMethod {
                parent,
                method,
                argument,
            } => {
                let receiver = parent.eval(endpoint, None)?;
                method.call(&receiver, slice::from_ref(argument), endpoint, self)
            }
            NodeKind::PlaceholderMethod { parent, method } => {
                let receiver = parent.eval(endpoint, None)?;
                let parameter = parameter.ok_or_else(|| CollectorError::config(format!("{self} needs a parameter")))?;
                method.call(&receiver, slice::from_ref(parameter), endpoint, self)
            }
            NodeKind::CompositeField { parent, key } => match parent.eval(endpoint, parameter)? {
                Value::Null => Ok(Value::Null),
                Value::Composite(mut fields) => fields.remove(key).ok_or_else(|| CollectorError::UnexpectedValue {
                    destination: self.to_string(),
                    expected: format!("field '{key}'"),
                    found: format!("fields {:?}", fields.keys().collect::<Vec<_>>()),
                }),
                other => Err(CollectorError::UnexpectedValue {
                    destination: self.to_string(),
                    expected: "composite".to_string(),
                    found: other.kind().to_string(),
                }),
            },
        }
    }

    /// Object and attribute at the root of the chain.
    pub fn root(&self) -> (&ObjectName, Option<&str>) {
        match &self.kind {
            NodeKind::Object(object) => (object, None),
            NodeKind::Attribute { object, attribute } => (object, Some(attribute)),
            NodeKind::NoArgMethod { parent, .. }
            | NodeKind::BoundMethod { parent, .. }
            | NodeKind::PlaceholderMethod { parent, .. }
            | NodeKind::CompositeField { parent, .. } => parent.root(),
        }
    }
}

impl fmt::Display for QueryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            NodeKind::Object(object) => write!(f, "'{object}'"),
            NodeKind::Attribute { object, attribute } => write!(f, "'{attribute}' of '{object}'"),
            NodeKind::NoArgMethod { parent, method } => write!(f, "{parent}.{}()", method.name()),
            NodeKind::BoundMethod {
                parent,
                method,
                argument,
            } => write!(f, "{parent}.{}({argument})", method.name()),
            NodeKind::PlaceholderMethod { parent, method } => write!(f, "{parent}.{}($)", method.name()),
            NodeKind::CompositeField { parent, key } => write!(f, "{parent}[{key}]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticEndpoint;

    const MEMORY: &str = "java.lang:type=Memory";
    const THREADING: &str = "java.lang:type=Threading";

    fn name(s: &str) -> ObjectName {
        ObjectName::parse(s).unwrap()
    }

    fn heap_usage(used: i64) -> Value {
        [
            ("used".to_string(), Value::Long(used)),
            ("max".to_string(), Value::Long(1000)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn attribute_reads_are_not_cached() {
        let endpoint = StaticEndpoint::new();
        endpoint.set_attribute(MEMORY, "ObjectPendingFinalizationCount", 1i64);
        let node = QueryNode::attribute(name(MEMORY), "ObjectPendingFinalizationCount");

        assert_eq!(node.get(&endpoint).unwrap(), Value::Long(1));
        endpoint.set_attribute(MEMORY, "ObjectPendingFinalizationCount", 2i64);
        assert_eq!(node.get(&endpoint).unwrap(), Value::Long(2));
    }

    #[test]
    fn chained_composite_access() {
        let endpoint = StaticEndpoint::new();
        endpoint.set_attribute(MEMORY, "HeapMemoryUsage", heap_usage(10));

        let usage = QueryNode::attribute(name(MEMORY), "HeapMemoryUsage");
        let used = QueryNode::bound_method(usage, "get", Value::from("used")).unwrap();
        assert_eq!(used.arity(), Arity::Query);
        assert_eq!(used.get(&endpoint).unwrap(), Value::Long(10));
        assert_eq!(used.to_string(), "'HeapMemoryUsage' of 'java.lang:type=Memory'.get(used)");
    }

    #[test]
    fn placeholder_turns_the_chain_into_a_function() {
        let endpoint = StaticEndpoint::new();
        endpoint.set_operation(THREADING, "getThreadInfo", &["long"], "CompositeData", |args| {
            let id = args[0].as_i64().unwrap_or_default();
            Ok([("threadName".to_string(), Value::String(format!("worker-{id}")))]
                .into_iter()
                .collect())
        });

        let info = QueryNode::placeholder_method(QueryNode::object(name(THREADING)), "getThreadInfo").unwrap();
        let thread_name = QueryNode::composite_field(info, "threadName");
        assert_eq!(thread_name.arity(), Arity::Function);

        assert_eq!(
            thread_name.apply(&endpoint, &Value::Long(3)).unwrap(),
            Value::from("worker-3")
        );
        assert!(matches!(
            thread_name.get(&endpoint),
            Err(CollectorError::Configuration { .. })
        ));
        assert_eq!(thread_name.root(), (&name(THREADING), None));
    }

    #[test]
    fn no_arg_method_keeps_parent_arity() {
        let endpoint = StaticEndpoint::new();
        endpoint.set_operation(THREADING, "getThreadCpuTime", &["long"], "long", |args| {
            Ok(Value::Long(args[0].as_i64().unwrap_or_default() * 2))
        });

        let cpu = QueryNode::placeholder_method(QueryNode::object(name(THREADING)), "getThreadCpuTime").unwrap();
        let text = QueryNode::no_arg_method(cpu, "toString");
        assert_eq!(text.arity(), Arity::Function);
        assert_eq!(text.apply(&endpoint, &Value::Long(21)).unwrap(), Value::from("42"));
    }

    #[test]
    fn only_one_placeholder() {
        let first = QueryNode::placeholder_method(QueryNode::object(name(THREADING)), "getThreadInfo").unwrap();
        assert!(matches!(
            QueryNode::placeholder_method(first, "get"),
            Err(CollectorError::Configuration { .. })
        ));

        let first = QueryNode::placeholder_method(QueryNode::object(name(THREADING)), "getThreadInfo").unwrap();
        assert!(matches!(
            QueryNode::bound_method(first, "get", Value::from("threadName")),
            Err(CollectorError::Configuration { .. })
        ));
    }

    #[test]
    fn composite_field_of_null_is_null() {
        let endpoint = StaticEndpoint::new();
        endpoint.set_operation(THREADING, "getThreadInfo", &["long"], "CompositeData", |_| Ok(Value::Null));

        let info = QueryNode::placeholder_method(QueryNode::object(name(THREADING)), "getThreadInfo").unwrap();
        let waited = QueryNode::composite_field(info, "waitedTime");
        assert_eq!(waited.apply(&endpoint, &Value::Long(1)).unwrap(), Value::Null);
    }

    #[test]
    fn query_errors_name_the_failing_node() {
        let endpoint = StaticEndpoint::new();
        endpoint.set_attribute(MEMORY, "HeapMemoryUsage", heap_usage(10));

        let node = QueryNode::attribute(name(MEMORY), "NonHeapMemoryUsage");
        let err = node.get(&endpoint).unwrap_err();
        assert!(matches!(
            &err,
            CollectorError::Query { destination, .. } if destination == "'NonHeapMemoryUsage' of 'java.lang:type=Memory'"
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn pattern_object_lists_the_matching_objects() {
        let endpoint = StaticEndpoint::new();
        endpoint.set_attribute("java.lang:type=GarbageCollector,name=Young", "CollectionCount", 1i64);
        endpoint.set_attribute("java.lang:type=GarbageCollector,name=Old", "CollectionCount", 2i64);
        endpoint.set_attribute(MEMORY, "Verbose", false);

        let node = QueryNode::object(name("java.lang:type=GarbageCollector,*"));
        assert_eq!(
            node.get(&endpoint).unwrap(),
            Value::List(vec![
                Value::Object(name("java.lang:type=GarbageCollector,name=Old")),
                Value::Object(name("java.lang:type=GarbageCollector,name=Young")),
            ])
        );
    }
}
