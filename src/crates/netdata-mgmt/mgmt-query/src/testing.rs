//! In-memory endpoint for tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::endpoint::{AttributeInfo, ManagementEndpoint, OperationInfo, TypeDescriptor};
use crate::error::EndpointError;
use crate::value::{ObjectName, Value};

type Operation = Arc<dyn Fn(&[Value]) -> Result<Value, EndpointError> + Send + Sync>;

#[derive(Default)]
struct StaticObject {
    attributes: BTreeMap<String, Value>,
    operations: Vec<(OperationInfo, Operation)>,
}

/// Endpoint whose objects are scripted by the test.
///
/// Objects are created on first use by [`StaticEndpoint::set_attribute`] or
/// [`StaticEndpoint::set_operation`]. Every trait call is counted.
///
/// The setters panic on malformed object names.
#[derive(Default)]
pub struct StaticEndpoint {
    objects: RwLock<HashMap<ObjectName, StaticObject>>,
    failure: RwLock<Option<EndpointError>>,
    calls: AtomicUsize,
}

fn object_name(name: &str) -> ObjectName {
    match ObjectName::parse(name) {
        Ok(name) => name,
        Err(e) => panic!("{e}"),
    }
}

impl StaticEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_attribute(&self, object: &str, attribute: &str, value: impl Into<Value>) {
        self.objects
            .write()
            .entry(object_name(object))
            .or_default()
            .attributes
            .insert(attribute.to_string(), value.into());
    }

    pub fn remove_attribute(&self, object: &str, attribute: &str) {
        if let Some(o) = self.objects.write().get_mut(&object_name(object)) {
            o.attributes.remove(attribute);
        }
    }

    /// Declare an operation overload. Overloads are matched by signature.
    pub fn set_operation<F>(&self, object: &str, operation: &str, parameters: &[&str], return_type: &str, f: F)
    where
        F: Fn(&[Value]) -> Result<Value, EndpointError> + Send + Sync + 'static,
    {
        let info = OperationInfo::new(operation, parameters, return_type);
        let mut objects = self.objects.write();
        let operations = &mut objects.entry(object_name(object)).or_default().operations;
        operations.retain(|(existing, _)| existing != &info);
        operations.push((info, Arc::new(f)));
    }

    pub fn unregister(&self, object: &str) {
        self.objects.write().remove(&object_name(object));
    }

    /// Make every call fail with `error` until cleared with `None`.
    pub fn fail_with(&self, error: Option<EndpointError>) {
        *self.failure.write() = error;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn enter(&self) -> Result<(), EndpointError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        match &*self.failure.read() {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

impl ManagementEndpoint for StaticEndpoint {
    fn read_attribute(&self, object: &ObjectName, attribute: &str) -> Result<Value, EndpointError> {
        self.enter()?;
        let objects = self.objects.read();
        let o = objects
            .get(object)
            .ok_or_else(|| EndpointError::ObjectNotFound(object.to_string()))?;
        o.attributes
            .get(attribute)
            .cloned()
            .ok_or_else(|| EndpointError::AttributeNotFound {
                object: object.to_string(),
                attribute: attribute.to_string(),
            })
    }

    fn invoke(&self, object: &ObjectName, operation: &OperationInfo, args: &[Value]) -> Result<Value, EndpointError> {
        self.enter()?;
        let f = {
            let objects = self.objects.read();
            let o = objects
                .get(object)
                .ok_or_else(|| EndpointError::ObjectNotFound(object.to_string()))?;
            o.operations
                .iter()
                .find(|(info, _)| info.signature() == operation.signature())
                .map(|(_, f)| Arc::clone(f))
                .ok_or_else(|| EndpointError::Invocation {
                    object: object.to_string(),
                    operation: operation.signature(),
                    message: "no such operation".to_string(),
                })?
        };
        f(args)
    }

    fn enumerate_instances(&self, selector: &ObjectName) -> Result<Vec<ObjectName>, EndpointError> {
        self.enter()?;
        let objects = self.objects.read();
        let mut names: Vec<ObjectName> = objects
            .keys()
            .filter(|name| {
                name.domain() == selector.domain()
                    && selector
                        .canonical()
                        .split_once(':')
                        .map(|(_, properties)| properties)
                        .unwrap_or_default()
                        .split(',')
                        .filter(|p| *p != "*")
                        .filter_map(|p| p.split_once('='))
                        .all(|(k, v)| v == "*" || name.property(k) == Some(v))
            })
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    fn resolve_object_type(&self, object: &ObjectName) -> Result<TypeDescriptor, EndpointError> {
        self.enter()?;
        let objects = self.objects.read();
        let o = objects
            .get(object)
            .ok_or_else(|| EndpointError::ObjectNotFound(object.to_string()))?;
        Ok(TypeDescriptor {
            class_name: format!("static:{}", object.domain()),
            attributes: o
                .attributes
                .iter()
                .map(|(name, value)| AttributeInfo {
                    name: name.clone(),
                    type_name: value.kind().to_string(),
                })
                .collect(),
            operations: o.operations.iter().map(|(info, _)| info.clone()).collect(),
        })
    }

    fn describe(&self) -> String {
        "static endpoint".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerates_by_pattern() {
        let endpoint = StaticEndpoint::new();
        endpoint.set_attribute("java.lang:type=GarbageCollector,name=Young", "CollectionCount", 1i64);
        endpoint.set_attribute("java.lang:type=GarbageCollector,name=Old", "CollectionCount", 2i64);
        endpoint.set_attribute("java.lang:type=Memory", "Verbose", false);

        let selector = ObjectName::parse("java.lang:type=GarbageCollector,*").unwrap();
        let names: Vec<String> = endpoint
            .enumerate_instances(&selector)
            .unwrap()
            .iter()
            .map(|n| n.property("name").unwrap_or_default().to_string())
            .collect();
        assert_eq!(names, ["Old", "Young"]);
    }

    #[test]
    fn counts_and_fails_calls() {
        let endpoint = StaticEndpoint::new();
        endpoint.set_attribute("a:type=B", "X", 1i64);
        let name = ObjectName::parse("a:type=B").unwrap();

        assert!(endpoint.is_registered(&name).unwrap());
        endpoint.fail_with(Some(EndpointError::Connection {
            message: "gone".to_string(),
        }));
        assert!(endpoint.read_attribute(&name, "X").unwrap_err().is_retryable());
        assert_eq!(endpoint.call_count(), 2);

        endpoint.fail_with(None);
        endpoint.unregister("a:type=B");
        assert!(!endpoint.is_registered(&name).unwrap());
    }
}
